//! TLS handshake and certificate inspection.
//!
//! The handshake always completes so the certificate can be reported even
//! when it does not verify. A wrapping verifier runs the normal WebPKI
//! checks against the bundled Mozilla roots, remembers the outcome and then
//! accepts the chain.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
pub struct TlsProbe {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub san: Vec<String>,
    pub signature_algorithm: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub subject: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsReport {
    pub host: String,
    pub port: u16,
    pub valid: bool,
    pub expired: bool,
    pub chain_valid: bool,
    pub verification_error: Option<String>,
    pub tls_version: String,
    pub cipher_suite: String,
    pub certificate: Option<CertificateInfo>,
    pub chain: Vec<ChainEntry>,
}

#[derive(Debug)]
pub struct TlsPlan {
    host: String,
    port: u16,
}

impl TlsProbe {
    pub fn validate(self) -> Result<TlsPlan, ServiceError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ServiceError::invalid("url is required"));
        }
        let url = Url::parse(raw)
            .map_err(|e| ServiceError::invalid(format!("invalid url '{}': {}", raw, e)))?;
        if url.scheme() != "https" {
            return Err(ServiceError::invalid(format!(
                "url must use https, got '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ServiceError::invalid("url must include a host"))?;
        Ok(TlsPlan {
            host,
            port: url.port_or_known_default().unwrap_or(443),
        })
    }
}

/// Human-readable name for a TLS protocol version number.
pub fn version_name(version: u16) -> String {
    match version {
        0x0301 => "TLS 1.0".to_string(),
        0x0302 => "TLS 1.1".to_string(),
        0x0303 => "TLS 1.2".to_string(),
        0x0304 => "TLS 1.3".to_string(),
        other => format!("Unknown (0x{:04x})", other),
    }
}

fn version_number(version: ProtocolVersion) -> u16 {
    match version {
        ProtocolVersion::SSLv2 => 0x0200,
        ProtocolVersion::SSLv3 => 0x0300,
        ProtocolVersion::TLSv1_0 => 0x0301,
        ProtocolVersion::TLSv1_1 => 0x0302,
        ProtocolVersion::TLSv1_2 => 0x0303,
        ProtocolVersion::TLSv1_3 => 0x0304,
        ProtocolVersion::DTLSv1_0 => 0xfeff,
        ProtocolVersion::DTLSv1_2 => 0xfefd,
        ProtocolVersion::Unknown(v) => v,
        _ => 0,
    }
}

fn signature_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "SHA1-RSA",
        "1.2.840.113549.1.1.11" => "SHA256-RSA",
        "1.2.840.113549.1.1.12" => "SHA384-RSA",
        "1.2.840.113549.1.1.13" => "SHA512-RSA",
        "1.2.840.113549.1.1.10" => "RSA-PSS",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        other => return other.to_string(),
    }
    .to_string()
}

fn asn1_time(time: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn subject_alt_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            GeneralName::IPAddress(bytes) => match bytes.len() {
                4 => Some(
                    std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
                ),
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(bytes);
                    Some(std::net::Ipv6Addr::from(octets).to_string())
                }
                _ => None,
            },
            GeneralName::RFC822Name(email) => Some(email.to_string()),
            _ => None,
        })
        .collect()
}

fn describe(der: &CertificateDer<'_>, now: DateTime<Utc>) -> Option<CertificateInfo> {
    let (_, cert) = parse_x509_certificate(der.as_ref()).ok()?;
    let not_after = asn1_time(cert.validity().not_after);
    Some(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before: asn1_time(cert.validity().not_before),
        not_after,
        days_until_expiry: (not_after - now).num_days(),
        san: subject_alt_names(&cert),
        signature_algorithm: signature_name(&cert.signature_algorithm.algorithm.to_id_string()),
    })
}

/// Runs WebPKI verification, records the verdict, and accepts regardless.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    verdict: Mutex<Option<Result<(), String>>>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map(|_| ())
            .map_err(|e| e.to_string());
        *self.verdict.lock() = Some(verdict);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn client_config(verifier: Arc<RecordingVerifier>) -> Result<ClientConfig, ServiceError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServiceError::Internal(e.into()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth())
}

fn recording_verifier() -> Result<Arc<RecordingVerifier>, ServiceError> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let inner = WebPkiServerVerifier::builder_with_provider(
        Arc::new(roots),
        Arc::new(rustls::crypto::ring::default_provider()),
    )
    .build()
    .map_err(|e| ServiceError::Internal(e.into()))?;
    Ok(Arc::new(RecordingVerifier {
        inner,
        verdict: Mutex::new(None),
    }))
}

impl TlsPlan {
    pub async fn execute(&self) -> Result<TlsReport, ServiceError> {
        let verifier = recording_verifier()?;
        let connector = TlsConnector::from(Arc::new(client_config(verifier.clone())?));
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| ServiceError::invalid(format!("invalid host '{}': {}", self.host, e)))?;

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                ServiceError::probe(format!("connect to {}:{} failed: {}", self.host, self.port, e))
            })?;
        let stream = connector.connect(server_name, tcp).await.map_err(|e| {
            ServiceError::probe(format!("TLS handshake with {} failed: {}", self.host, e))
        })?;
        let (_, connection) = stream.get_ref();

        let now = Utc::now();
        let tls_version = connection
            .protocol_version()
            .map(|v| version_name(version_number(v)))
            .unwrap_or_else(|| version_name(0));
        let cipher_suite = connection
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite()))
            .unwrap_or_default();

        let peer = connection.peer_certificates().unwrap_or_default();
        let described: Vec<CertificateInfo> =
            peer.iter().filter_map(|c| describe(c, now)).collect();
        let certificate = described.first().cloned();
        let chain = described
            .iter()
            .map(|c| ChainEntry {
                subject: c.subject.clone(),
                issuer: c.issuer.clone(),
                not_after: c.not_after,
            })
            .collect();

        let verification_error = match verifier.verdict.lock().clone() {
            Some(Ok(())) => None,
            Some(Err(e)) => Some(e),
            None => Some("certificate was not verified".to_string()),
        };
        let chain_valid = verification_error.is_none();
        let expired = certificate.as_ref().map(|c| c.not_after < now).unwrap_or(true);
        let not_yet_valid = certificate.as_ref().map(|c| c.not_before > now).unwrap_or(true);

        Ok(TlsReport {
            host: self.host.clone(),
            port: self.port,
            valid: chain_valid && !expired && !not_yet_valid,
            expired,
            chain_valid,
            verification_error,
            tls_version,
            cipher_suite,
            certificate,
            chain,
        })
    }
}
