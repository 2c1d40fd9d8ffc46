//! Network probe engine.
//!
//! A [`ProbeRequest`] names one of five probe kinds. [`ProbeEngine::run`]
//! validates the payload before any network I/O, executes it under a bounded
//! deadline and returns a [`ProbeResult`]:
//!
//! ```json
//! { "kind": "dns", "target": "example.com", "duration_ms": 14, "query": "...", ... }
//! ```
//!
//! Successful results are handed to the configured [`ProbeSink`] on a
//! background task; the caller never waits on persistence.

pub mod connectivity;
pub mod dns;
pub mod http;
pub mod scan;
pub mod tls;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::sink::{ProbeRecord, ProbeSink};

pub use connectivity::{ConnectivityProbe, ConnectivityReport};
pub use dns::{DnsProbe, DnsReport};
pub use http::{HttpProbe, HttpReport};
pub use scan::{ScanProbe, ScanReport};
pub use tls::{TlsProbe, TlsReport};

/// Used when the caller gives no timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Dns,
    Connectivity,
    Scan,
    Tls,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 5] = [
        ProbeKind::Http,
        ProbeKind::Dns,
        ProbeKind::Connectivity,
        ProbeKind::Scan,
        ProbeKind::Tls,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Http => "http",
            ProbeKind::Dns => "dns",
            ProbeKind::Connectivity => "connectivity",
            ProbeKind::Scan => "scan",
            ProbeKind::Tls => "tls",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProbeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ServiceError::invalid(format!("unknown probe kind: {}", s)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeRequest {
    Http(HttpProbe),
    Dns(DnsProbe),
    Connectivity(ConnectivityProbe),
    Scan(ScanProbe),
    Tls(TlsProbe),
}

impl ProbeRequest {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeRequest::Http(_) => ProbeKind::Http,
            ProbeRequest::Dns(_) => ProbeKind::Dns,
            ProbeRequest::Connectivity(_) => ProbeKind::Connectivity,
            ProbeRequest::Scan(_) => ProbeKind::Scan,
            ProbeRequest::Tls(_) => ProbeKind::Tls,
        }
    }

    /// Builds a request of `kind` from an untagged JSON payload.
    pub fn from_payload(kind: ProbeKind, payload: Value) -> Result<Self, ServiceError> {
        let invalid = |e: serde_json::Error| {
            ServiceError::invalid(format!("invalid {} request: {}", kind, e))
        };
        Ok(match kind {
            ProbeKind::Http => {
                ProbeRequest::Http(serde_json::from_value(payload).map_err(invalid)?)
            }
            ProbeKind::Dns => ProbeRequest::Dns(serde_json::from_value(payload).map_err(invalid)?),
            ProbeKind::Connectivity => {
                ProbeRequest::Connectivity(serde_json::from_value(payload).map_err(invalid)?)
            }
            ProbeKind::Scan => {
                ProbeRequest::Scan(serde_json::from_value(payload).map_err(invalid)?)
            }
            ProbeKind::Tls => ProbeRequest::Tls(serde_json::from_value(payload).map_err(invalid)?),
        })
    }

    fn request_headers(&self) -> Option<Value> {
        match self {
            ProbeRequest::Http(probe) if !probe.headers.is_empty() => Some(json!(probe.headers)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProbeBody {
    Http(HttpReport),
    Dns(DnsReport),
    Connectivity(ConnectivityReport),
    Scan(ScanReport),
    Tls(TlsReport),
}

impl ProbeBody {
    /// Compact description stored alongside the persisted record.
    fn summary(&self) -> Value {
        match self {
            ProbeBody::Http(r) => json!({
                "status_code": r.status_code,
                "final_url": r.final_url,
                "content_length": r.content_length,
            }),
            ProbeBody::Dns(r) => json!({
                "record_type": r.record_type,
                "answers": r.answers.len(),
            }),
            ProbeBody::Connectivity(r) => json!({
                "test_type": r.test_type,
                "packets_received": r.packets_received,
                "packet_loss_percent": r.packet_loss_percent,
            }),
            ProbeBody::Scan(r) => json!({
                "ports": r.results.len(),
                "open_ports": r.open_ports,
            }),
            ProbeBody::Tls(r) => json!({
                "valid": r.valid,
                "expired": r.expired,
                "tls_version": r.tls_version,
                "days_until_expiry": r.certificate.as_ref().map(|c| c.days_until_expiry),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub target: String,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub body: ProbeBody,
}

pub struct ProbeEngine {
    sink: Arc<dyn ProbeSink>,
    default_timeout: Duration,
}

impl ProbeEngine {
    pub fn new(sink: Arc<dyn ProbeSink>, default_timeout: Duration) -> Self {
        Self {
            sink,
            default_timeout,
        }
    }

    pub fn sink(&self) -> &Arc<dyn ProbeSink> {
        &self.sink
    }

    pub async fn run(&self, request: ProbeRequest) -> Result<ProbeResult, ServiceError> {
        let kind = request.kind();
        let headers = request.request_headers();
        let started = Instant::now();

        let outcome = match request {
            ProbeRequest::Http(probe) => {
                let plan = probe.validate(self.default_timeout)?;
                plan.execute().await.map(|r| (r.url.clone(), ProbeBody::Http(r)))
            }
            ProbeRequest::Dns(probe) => {
                let plan = probe.validate()?;
                bounded(self.default_timeout, plan.execute())
                    .await
                    .map(|r| (r.query.clone(), ProbeBody::Dns(r)))
            }
            ProbeRequest::Connectivity(probe) => {
                let plan = probe.validate()?;
                bounded(self.default_timeout, plan.execute())
                    .await
                    .map(|r| (plan.target.clone(), ProbeBody::Connectivity(r)))
            }
            ProbeRequest::Scan(probe) => {
                let plan = probe.validate()?;
                plan.execute()
                    .await
                    .map(|r| (plan.target.clone(), ProbeBody::Scan(r)))
            }
            ProbeRequest::Tls(probe) => {
                let plan = probe.validate()?;
                bounded(self.default_timeout, plan.execute())
                    .await
                    .map(|r| (format!("{}:{}", r.host, r.port), ProbeBody::Tls(r)))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (target, body) = match outcome {
            Ok(done) => done,
            Err(err) => {
                tracing::warn!(kind = %kind, error = %err, "probe failed");
                return Err(err);
            }
        };

        tracing::info!(kind = %kind, target = %target, duration_ms, "probe completed");
        self.emit(ProbeRecord {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            target: target.clone(),
            duration_ms: duration_ms as i64,
            request_headers: headers,
            summary: body.summary(),
            created_at: Utc::now(),
        });

        Ok(ProbeResult {
            kind,
            target,
            duration_ms,
            body,
        })
    }

    fn emit(&self, record: ProbeRecord) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(&record).await {
                tracing::warn!(kind = %record.kind, error = %e, "failed to persist probe result");
            }
        });
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ServiceError>
where
    F: std::future::Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| {
            ServiceError::probe(format!("probe timed out after {} ms", limit.as_millis()))
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;

    fn engine() -> ProbeEngine {
        ProbeEngine::new(Arc::new(NullSink), DEFAULT_TIMEOUT)
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("DNS".parse::<ProbeKind>().unwrap(), ProbeKind::Dns);
        assert!("ping".parse::<ProbeKind>().is_err());
    }

    #[test]
    fn tagged_request_deserializes() {
        let request: ProbeRequest =
            serde_json::from_value(json!({ "kind": "scan", "target": "127.0.0.1", "ports": [22] }))
                .unwrap();
        assert_eq!(request.kind(), ProbeKind::Scan);
    }

    #[tokio::test]
    async fn validation_errors_come_before_io() {
        let engine = engine();
        let dns = ProbeRequest::from_payload(
            ProbeKind::Dns,
            json!({ "query": "example.com", "record_type": "AAAA" }),
        )
        .unwrap();
        match engine.run(dns).await {
            Err(ServiceError::InvalidInput(message)) => assert!(message.contains("Unsupported")),
            other => panic!("unexpected: {:?}", other.map(|r| r.kind)),
        }

        let tls = ProbeRequest::from_payload(ProbeKind::Tls, json!({ "url": "http://example.com" }))
            .unwrap();
        assert!(matches!(engine.run(tls).await, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn scan_result_is_flattened() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let request = ProbeRequest::from_payload(
            ProbeKind::Scan,
            json!({ "target": "127.0.0.1", "ports": [port] }),
        )
        .unwrap();
        let result = engine().run(request).await.unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["kind"], "scan");
        assert_eq!(value["target"], "127.0.0.1");
        assert_eq!(value["scan_type"], "tcp");
        assert_eq!(value["results"][0]["state"], "open");
        assert_eq!(value["open_ports"], json!([port]));
    }
}
