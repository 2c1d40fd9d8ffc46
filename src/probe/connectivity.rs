//! TCP reachability probe.
//!
//! Without raw sockets an ICMP ping is approximated by TCP connects to a few
//! common ports on the first resolved address.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use crate::error::ServiceError;
use crate::models::round2;

pub const PROBE_PORTS: [u16; 4] = [80, 443, 22, 3389];
const CONNECT_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Ping,
    TcpConnect,
    Traceroute,
}

impl TestType {
    fn parse(raw: Option<&str>) -> Result<Self, ServiceError> {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("ping") => Ok(TestType::Ping),
            Some("tcp_connect") => Ok(TestType::TcpConnect),
            Some("traceroute") => Ok(TestType::Traceroute),
            Some(other) => Err(ServiceError::invalid(format!(
                "unsupported test_type: {} (supported: ping, traceroute, tcp_connect)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityProbe {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub test_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTrip {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub test_type: TestType,
    pub resolved_ips: Vec<String>,
    pub probe_ports: Vec<u16>,
    pub packets_sent: usize,
    pub packets_received: usize,
    pub packet_loss_percent: f64,
    pub rtt_ms: RoundTrip,
}

#[derive(Debug)]
pub struct ConnectivityPlan {
    pub target: String,
    test_type: TestType,
}

impl ConnectivityProbe {
    pub fn validate(self) -> Result<ConnectivityPlan, ServiceError> {
        let target = self.target.trim().to_string();
        if target.is_empty() {
            return Err(ServiceError::invalid("target is required"));
        }
        if target.contains(char::is_whitespace) {
            return Err(ServiceError::invalid(format!("invalid target: {}", target)));
        }
        let test_type = TestType::parse(self.test_type.as_deref())?;
        Ok(ConnectivityPlan { target, test_type })
    }
}

async fn resolve(target: &str) -> Result<Vec<IpAddr>, ServiceError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let addrs = tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| ServiceError::probe(format!("could not resolve {}: {}", target, e)))?;
    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in addrs {
        if !ips.contains(&addr.ip()) {
            ips.push(addr.ip());
        }
    }
    if ips.is_empty() {
        return Err(ServiceError::probe(format!("no addresses found for {}", target)));
    }
    Ok(ips)
}

impl ConnectivityPlan {
    pub async fn execute(&self) -> Result<ConnectivityReport, ServiceError> {
        if self.test_type == TestType::Traceroute {
            return Err(ServiceError::probe("traceroute is not supported"));
        }

        let ips = resolve(&self.target).await?;
        let ip = ips[0];

        let started = Instant::now();
        let mut received = 0;
        for port in PROBE_PORTS {
            let attempt =
                tokio::time::timeout(
                    CONNECT_DEADLINE,
                    TcpStream::connect(SocketAddr::new(ip, port)),
                )
                    .await;
            if let Ok(Ok(_stream)) = attempt {
                received += 1;
            }
        }
        let sent = PROBE_PORTS.len();
        let rtt = round2(started.elapsed().as_secs_f64() * 1000.0 / sent as f64);

        Ok(ConnectivityReport {
            test_type: self.test_type,
            resolved_ips: ips.iter().map(IpAddr::to_string).collect(),
            probe_ports: PROBE_PORTS.to_vec(),
            packets_sent: sent,
            packets_received: received,
            packet_loss_percent: round2(100.0 * (sent - received) as f64 / sent as f64),
            rtt_ms: RoundTrip {
                min: rtt,
                avg: rtt,
                max: rtt,
            },
        })
    }
}
