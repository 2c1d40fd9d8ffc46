//! Sequential TCP connect scan.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::ServiceError;

pub const DEFAULT_PORTS: [u16; 10] = [21, 22, 23, 25, 80, 443, 3306, 5432, 8080, 8443];
pub const MAX_PORTS: usize = 1024;
const CONNECT_DEADLINE: Duration = Duration::from_secs(1);

/// Well-known service name for `port`, or `"unknown"`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        80 => "http",
        443 => "https",
        3306 => "mysql",
        5432 => "postgresql",
        8080 => "http-proxy",
        8443 => "https-alt",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanProbe {
    #[serde(default)]
    pub target: String,
    /// Signed so that out-of-range values reach validation instead of
    /// failing deserialisation.
    #[serde(default)]
    pub ports: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortResult {
    pub port: u16,
    pub protocol: &'static str,
    pub state: PortState,
    pub service: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_type: &'static str,
    pub results: Vec<PortResult>,
    pub open_ports: Vec<u16>,
}

#[derive(Debug)]
pub struct ScanPlan {
    pub target: String,
    ports: Vec<u16>,
}

impl ScanProbe {
    pub fn validate(self) -> Result<ScanPlan, ServiceError> {
        let target = self.target.trim().to_string();
        if target.is_empty() {
            return Err(ServiceError::invalid("target is required"));
        }
        if target.contains(char::is_whitespace) {
            return Err(ServiceError::invalid(format!("invalid target: {}", target)));
        }

        let ports = match self.ports {
            None => DEFAULT_PORTS.to_vec(),
            Some(ports) if ports.is_empty() => DEFAULT_PORTS.to_vec(),
            Some(ports) => {
                if ports.len() > MAX_PORTS {
                    return Err(ServiceError::invalid(format!(
                        "too many ports: {} (maximum {})",
                        ports.len(),
                        MAX_PORTS
                    )));
                }
                ports
                    .into_iter()
                    .map(|p| {
                        u16::try_from(p)
                            .ok()
                            .filter(|p| *p >= 1)
                            .ok_or_else(|| {
                                ServiceError::invalid(format!(
                                    "port out of range: {} (must be 1-65535)",
                                    p
                                ))
                            })
                    })
                    .collect::<Result<Vec<u16>, _>>()?
            }
        };
        Ok(ScanPlan { target, ports })
    }
}

/// Maps a connect failure to a port state.
fn classify(err: &std::io::Error) -> PortState {
    if err.kind() == ErrorKind::ConnectionRefused
        || err.to_string().to_ascii_lowercase().contains("refused")
    {
        PortState::Closed
    } else {
        PortState::Filtered
    }
}

impl ScanPlan {
    pub async fn execute(&self) -> Result<ScanReport, ServiceError> {
        let mut results = Vec::with_capacity(self.ports.len());
        for &port in &self.ports {
            let attempt = tokio::time::timeout(
                CONNECT_DEADLINE,
                TcpStream::connect((self.target.as_str(), port)),
            )
            .await;
            let state = match attempt {
                Ok(Ok(_stream)) => PortState::Open,
                Ok(Err(e)) => classify(&e),
                Err(_) => PortState::Filtered,
            };
            results.push(PortResult {
                port,
                protocol: "tcp",
                state,
                service: service_name(port),
            });
        }
        let open_ports = results
            .iter()
            .filter(|r| r.state == PortState::Open)
            .map(|r| r.port)
            .collect();
        Ok(ScanReport {
            scan_type: "tcp",
            results,
            open_ports,
        })
    }
}
