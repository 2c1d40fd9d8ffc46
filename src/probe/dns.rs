//! DNS lookup probe.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Reported for every answer; the resolver's TTLs are not surfaced.
pub const ANSWER_TTL: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DnsRecordType {
    A,
    #[serde(rename = "CNAME")]
    Cname,
    #[serde(rename = "MX")]
    Mx,
    #[serde(rename = "TXT")]
    Txt,
}

impl DnsRecordType {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "A" => Ok(DnsRecordType::A),
            "CNAME" => Ok(DnsRecordType::Cname),
            "MX" => Ok(DnsRecordType::Mx),
            "TXT" => Ok(DnsRecordType::Txt),
            other => Err(ServiceError::invalid(format!(
                "Unsupported record type: {} (supported: A, CNAME, MX, TXT)",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Mx => "MX",
            DnsRecordType::Txt => "TXT",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsProbe {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub record_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsAnswer {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    pub ttl: u32,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsReport {
    pub query: String,
    pub record_type: DnsRecordType,
    pub answers: Vec<DnsAnswer>,
}

#[derive(Debug)]
pub struct DnsPlan {
    query: String,
    record_type: DnsRecordType,
}

impl DnsProbe {
    pub fn validate(self) -> Result<DnsPlan, ServiceError> {
        let query = self.query.trim().to_string();
        if query.is_empty() {
            return Err(ServiceError::invalid("query is required"));
        }
        let record_type = DnsRecordType::parse(self.record_type.as_deref().unwrap_or("A"))?;
        Ok(DnsPlan { query, record_type })
    }
}

fn resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "system resolver config unavailable, using defaults");
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    })
}

fn lookup_failed(query: &str, err: ResolveError) -> ServiceError {
    ServiceError::probe(format!("DNS lookup for {} failed: {}", query, err))
}

fn no_records(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

impl DnsPlan {
    pub async fn execute(&self) -> Result<DnsReport, ServiceError> {
        let resolver = resolver();
        let query = self.query.as_str();

        let values: Vec<String> = match self.record_type {
            DnsRecordType::A => resolver
                .lookup_ip(query)
                .await
                .map_err(|e| lookup_failed(query, e))?
                .iter()
                .filter(|ip| ip.is_ipv4())
                .map(|ip| ip.to_string())
                .collect(),
            DnsRecordType::Cname => match resolver.lookup(query, RecordType::CNAME).await {
                Ok(lookup) => lookup
                    .iter()
                    .filter_map(|rdata| match rdata {
                        RData::CNAME(name) => Some(name.to_string()),
                        _ => None,
                    })
                    .collect(),
                // A name without an alias is its own canonical name.
                Err(e) if no_records(&e) => vec![format!("{}.", query.trim_end_matches('.'))],
                Err(e) => return Err(lookup_failed(query, e)),
            },
            DnsRecordType::Mx => resolver
                .mx_lookup(query)
                .await
                .map_err(|e| lookup_failed(query, e))?
                .iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect(),
            DnsRecordType::Txt => resolver
                .txt_lookup(query)
                .await
                .map_err(|e| lookup_failed(query, e))?
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>()
                })
                .collect(),
        };

        Ok(DnsReport {
            query: self.query.clone(),
            record_type: self.record_type,
            answers: values
                .into_iter()
                .map(|value| DnsAnswer {
                    name: self.query.clone(),
                    record_type: self.record_type,
                    ttl: ANSWER_TTL,
                    value,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_types_case_insensitive() {
        assert_eq!(DnsRecordType::parse("mx").unwrap(), DnsRecordType::Mx);
        assert_eq!(DnsRecordType::parse("").unwrap(), DnsRecordType::A);
        assert_eq!(DnsRecordType::parse("Txt").unwrap(), DnsRecordType::Txt);
    }

    #[test]
    fn other_types_are_unsupported() {
        for t in ["AAAA", "NS", "SOA", "PTR", "bogus"] {
            match DnsRecordType::parse(t) {
                Err(ServiceError::InvalidInput(msg)) => assert!(msg.starts_with("Unsupported")),
                other => panic!("{} accepted: {:?}", t, other),
            }
        }
    }

    #[test]
    fn empty_query_rejected() {
        let probe = DnsProbe {
            query: "  ".into(),
            record_type: None,
        };
        assert!(matches!(probe.validate(), Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn ip_literal_resolves_to_itself() {
        let plan = DnsProbe {
            query: "127.0.0.1".into(),
            record_type: Some("A".into()),
        }
        .validate()
        .unwrap();
        let report = plan.execute().await.unwrap();
        assert_eq!(report.answers.len(), 1);
        assert_eq!(report.answers[0].value, "127.0.0.1");
        assert_eq!(report.answers[0].ttl, ANSWER_TTL);
    }
}
