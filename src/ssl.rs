//! TLS certificate inspection: a direct rustls handshake for the leaf and
//! chain, plus the SSL Labs grade when the public scanner has one ready.
//!
//! A certificate that fails verification is fetched again without it, so an
//! expired or mismatched certificate is still described instead of only
//! reported as a handshake error.

use crate::{config::Config, errors::ToolkitError};
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use x509_parser::prelude::*;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TLS_TIMEOUT: Duration = Duration::from_secs(5);
const PLAIN_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Https,
    Http,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub subject: String,
    pub issuer: String,
    pub is_ca: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub san: Vec<String>,
    pub valid_from: String,
    pub valid_to: String,
    pub days_remaining: i64,
    pub is_expired: bool,
    pub hostname_matches: bool,
    /// Chain verified against the webpki roots.
    pub trusted: bool,
    pub is_valid: bool,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub chain: Vec<ChainEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslCheckResult {
    pub domain: String,
    pub port: u16,
    pub connection_status: ConnectionStatus,
    pub certificate: Option<CertificateInfo>,
    pub error: Option<String>,
}

impl SslCheckResult {
    fn failed(domain: &str, port: u16, error: String) -> Self {
        Self {
            domain: domain.to_string(),
            port,
            connection_status: ConnectionStatus::Failed,
            certificate: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabsResponse {
    status: Option<String>,
    status_message: Option<String>,
    #[serde(default)]
    endpoints: Vec<LabsEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabsEndpoint {
    ip_address: Option<String>,
    grade: Option<String>,
    status_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabsEndpointGrade {
    pub ip_address: String,
    pub grade: String,
    pub status_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabsReport {
    pub domain: String,
    pub ready: bool,
    pub status: String,
    pub message: String,
    pub endpoints: Vec<LabsEndpointGrade>,
    pub manual_checks: Vec<String>,
}

/// Links an operator can open when the automated checks are inconclusive.
pub fn manual_check_links(domain: &str) -> Vec<String> {
    vec![
        format!("https://www.ssllabs.com/ssltest/analyze.html?d={}", domain),
        format!("https://www.sslshopper.com/ssl-checker.html#{}", domain),
        "https://www.digicert.com/help/".to_string(),
    ]
}

/// Accepts any certificate while still checking handshake signatures.
/// Only used to read certificates that already failed verification.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

enum HandshakeFailure {
    /// No TCP connection; nothing to retry.
    Unreachable(String),
    TimedOut(String),
    Rejected(String),
}

pub struct SslService {
    client: reqwest::Client,
    ssllabs_url: String,
    tls_config: Arc<ClientConfig>,
    unverified_config: Arc<ClientConfig>,
}

impl SslService {
    pub fn new(config: Arc<Config>) -> Result<Self, ToolkitError> {
        // Err only means another component installed a provider first
        let _ = CryptoProvider::install_default(rustls::crypto::ring::default_provider());

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let verifier = AcceptAnyCertificate(Arc::new(rustls::crypto::ring::default_provider()));
        let unverified_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .user_agent(concat!("support-toolkit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            ssllabs_url: config.ssllabs_url.clone(),
            tls_config: Arc::new(tls_config),
            unverified_config: Arc::new(unverified_config),
        })
    }

    /// Handshake with `domain:port` and describe the certificate it presents.
    ///
    /// Connection problems are reported inside the result rather than as
    /// errors so the dashboard can show them next to the other checks.
    pub async fn inspect(&self, domain: &str, port: u16) -> SslCheckResult {
        let start_time = std::time::Instant::now();
        debug!("TLS inspection of {}:{}", domain, port);

        let handshake_error = match self.handshake(self.tls_config.clone(), domain, port).await {
            Ok(certs) => {
                let result = describe_chain(domain, port, &certs, true, Utc::now());
                debug!("TLS inspection of {} finished in {:?}", domain, start_time.elapsed());
                return result;
            }
            Err(HandshakeFailure::Unreachable(e)) => return SslCheckResult::failed(domain, port, e),
            Err(HandshakeFailure::TimedOut(e)) => e,
            Err(HandshakeFailure::Rejected(e)) => {
                debug!("Re-reading certificate of {}:{} without verification: {}", domain, port, e);
                match self.handshake(self.unverified_config.clone(), domain, port).await {
                    Ok(certs) if !certs.is_empty() => {
                        let mut result = describe_chain(domain, port, &certs, false, Utc::now());
                        result.error = Some(e);
                        return result;
                    }
                    _ => e,
                }
            }
        };

        warn!("{} for {}:{}", handshake_error, domain, port);
        if answers_plain_http(domain, port).await {
            return SslCheckResult {
                domain: domain.to_string(),
                port,
                connection_status: ConnectionStatus::Http,
                certificate: None,
                error: Some(format!("{}; port {} answers plain HTTP", handshake_error, port)),
            };
        }

        SslCheckResult::failed(domain, port, handshake_error)
    }

    async fn handshake(
        &self,
        tls_config: Arc<ClientConfig>,
        domain: &str,
        port: u16,
    ) -> Result<Vec<CertificateDer<'static>>, HandshakeFailure> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| HandshakeFailure::Unreachable("Invalid domain name".to_string()))?;

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((domain, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(HandshakeFailure::Unreachable(format!("Connection failed: {}", e))),
            Err(_) => return Err(HandshakeFailure::Unreachable("Connection timed out".to_string())),
        };

        let connector = TlsConnector::from(tls_config);
        match timeout(TLS_TIMEOUT, connector.connect(server_name, stream)).await {
            Ok(Ok(tls_stream)) => {
                let (_, connection) = tls_stream.get_ref();
                Ok(connection.peer_certificates().map(|certs| certs.to_vec()).unwrap_or_default())
            }
            Ok(Err(e)) => Err(HandshakeFailure::Rejected(format!("TLS handshake failed: {}", e))),
            Err(_) => Err(HandshakeFailure::TimedOut("TLS handshake timed out".to_string())),
        }
    }

    /// Ask SSL Labs for a grade. A scan that is still running is not an error.
    pub async fn labs_grade(&self, domain: &str) -> Result<LabsReport, ToolkitError> {
        let url = format!("{}/analyze", self.ssllabs_url);
        let response = self.client
            .get(&url)
            .query(&[("host", domain), ("publish", "off"), ("all", "done")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ToolkitError::RateLimited("SSL Labs API is busy".to_string()));
        }
        if !status.is_success() {
            return Err(ToolkitError::Upstream {
                service: "SSL Labs".to_string(),
                status: status.as_u16(),
            });
        }

        let body: LabsResponse = response.json().await?;
        Ok(labs_report(domain, body))
    }
}

fn labs_report(domain: &str, body: LabsResponse) -> LabsReport {
    let status = body.status.unwrap_or_else(|| "UNKNOWN".to_string());
    let ready = status == "READY";

    let endpoints = if ready {
        body.endpoints
            .into_iter()
            .map(|endpoint| LabsEndpointGrade {
                ip_address: endpoint.ip_address.unwrap_or_else(|| "N/A".to_string()),
                grade: endpoint.grade.unwrap_or_else(|| "N/A".to_string()),
                status_message: endpoint.status_message.unwrap_or_else(|| "N/A".to_string()),
            })
            .collect()
    } else {
        Vec::new()
    };

    let message = if ready {
        format!("SSL certificate found for {}", domain)
    } else if status == "ERROR" {
        format!(
            "SSL Labs could not scan {}: {}",
            domain,
            body.status_message.as_deref().unwrap_or("unknown error")
        )
    } else {
        format!("Scan in progress ({}); try again in a minute", status)
    };

    LabsReport {
        domain: domain.to_string(),
        ready,
        status,
        message,
        endpoints,
        manual_checks: manual_check_links(domain),
    }
}

fn describe_chain(
    domain: &str,
    port: u16,
    certs: &[CertificateDer<'_>],
    trusted: bool,
    now: DateTime<Utc>,
) -> SslCheckResult {
    let Some(leaf) = certs.first() else {
        return SslCheckResult {
            domain: domain.to_string(),
            port,
            connection_status: ConnectionStatus::Https,
            certificate: None,
            error: Some("No certificate presented".to_string()),
        };
    };

    let (_, cert) = match X509Certificate::from_der(leaf.as_ref()) {
        Ok(parsed) => parsed,
        Err(e) => {
            return SslCheckResult {
                domain: domain.to_string(),
                port,
                connection_status: ConnectionStatus::Https,
                certificate: None,
                error: Some(format!("Certificate parsing failed: {}", e)),
            };
        }
    };

    let mut info = describe_certificate(domain, &cert, trusted, now);
    info.chain = certs
        .iter()
        .filter_map(|der| X509Certificate::from_der(der.as_ref()).ok())
        .map(|(_, parsed)| ChainEntry {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            is_ca: parsed.is_ca(),
        })
        .collect();

    SslCheckResult {
        domain: domain.to_string(),
        port,
        connection_status: ConnectionStatus::Https,
        certificate: Some(info),
        error: None,
    }
}

fn describe_certificate(domain: &str, cert: &X509Certificate<'_>, trusted: bool, now: DateTime<Utc>) -> CertificateInfo {
    let not_before = asn1_to_utc(cert.validity().not_before.timestamp());
    let not_after = asn1_to_utc(cert.validity().not_after.timestamp());

    let days_remaining = not_after.map(|t| (t - now).num_days()).unwrap_or(0);
    let is_expired = not_after.map(|t| t < now).unwrap_or(true);

    let san: Vec<String> = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);

    let hostname_matches = hostname_matches(domain, common_name.as_deref(), &san);

    CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        common_name,
        san,
        valid_from: not_before.map(|t| t.to_rfc3339()).unwrap_or_default(),
        valid_to: not_after.map(|t| t.to_rfc3339()).unwrap_or_default(),
        days_remaining,
        is_expired,
        hostname_matches,
        trusted,
        is_valid: trusted && !is_expired && hostname_matches,
        serial_number: cert.raw_serial_as_string().to_uppercase(),
        signature_algorithm: cert.signature_algorithm.algorithm.to_string(),
        chain: Vec::new(),
    }
}

fn asn1_to_utc(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

/// Whether `domain` is covered by the certificate's CN or any SAN.
pub fn hostname_matches(domain: &str, common_name: Option<&str>, san: &[String]) -> bool {
    let domain = domain.to_lowercase();
    common_name
        .into_iter()
        .chain(san.iter().map(String::as_str))
        .any(|pattern| matches_pattern(&domain, &pattern.to_lowercase()))
}

fn matches_pattern(domain: &str, pattern: &str) -> bool {
    if domain == pattern {
        return true;
    }

    // *.example.com covers exactly one extra label
    match pattern.strip_prefix("*.") {
        Some(suffix) => domain
            .strip_suffix(suffix)
            .and_then(|prefix| prefix.strip_suffix('.'))
            .map(|label| !label.is_empty() && !label.contains('.'))
            .unwrap_or(false),
        None => false,
    }
}

async fn answers_plain_http(domain: &str, port: u16) -> bool {
    let exchange = async {
        let mut stream = TcpStream::connect((domain, port)).await.ok()?;
        let request = format!("HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", domain);
        stream.write_all(request.as_bytes()).await.ok()?;

        let mut head = [0u8; 16];
        let n = stream.read(&mut head).await.ok()?;
        Some(head[..n].starts_with(b"HTTP/"))
    };

    matches!(timeout(PLAIN_HTTP_TIMEOUT, exchange).await, Ok(Some(true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        let san = vec!["*.example.com".to_string(), "example.com".to_string()];
        assert!(hostname_matches("www.example.com", None, &san));
        assert!(hostname_matches("Example.com", None, &san));
        assert!(!hostname_matches("a.b.example.com", None, &san));
        assert!(!hostname_matches("badexample.com", None, &san));
        assert!(hostname_matches("mail.example.org", Some("mail.example.org"), &[]));
        assert!(!hostname_matches("example.org", Some("*.example.org"), &[]));
    }

    #[test]
    fn test_labs_report_ready() {
        let body: LabsResponse = serde_json::from_str(
            r#"{"status":"READY","endpoints":[{"ipAddress":"93.184.216.34","grade":"A+","statusMessage":"Ready"},{"ipAddress":"2606:2800::1","statusMessage":"Unable to connect"}]}"#,
        )
        .unwrap();

        let report = labs_report("example.com", body);
        assert!(report.ready);
        assert_eq!(report.endpoints.len(), 2);
        assert_eq!(report.endpoints[0].grade, "A+");
        assert_eq!(report.endpoints[1].grade, "N/A");
        assert_eq!(report.manual_checks.len(), 3);
    }

    #[test]
    fn test_labs_report_in_progress() {
        let body: LabsResponse = serde_json::from_str(r#"{"status":"IN_PROGRESS","endpoints":[]}"#).unwrap();
        let report = labs_report("example.com", body);
        assert!(!report.ready);
        assert!(report.message.contains("IN_PROGRESS"));
        assert!(report.manual_checks[0].ends_with("d=example.com"));
    }

    #[test]
    fn test_empty_chain_is_reported() {
        let result = describe_chain("example.com", 443, &[], true, Utc::now());
        assert_eq!(result.connection_status, ConnectionStatus::Https);
        assert!(result.certificate.is_none());
        assert!(result.error.is_some());
    }

    const EXPIRED_CERT: &[u8] = include_bytes!("../tests/fixtures/expired-wrong-host.der");
    const EXPIRED_KEY: &[u8] = include_bytes!("../tests/fixtures/expired-wrong-host.key.der");

    #[test]
    fn test_expired_mismatched_certificate_is_described() {
        let certs = vec![CertificateDer::from(EXPIRED_CERT.to_vec())];
        let result = describe_chain("shop.example.com", 443, &certs, true, Utc::now());

        let cert = result.certificate.unwrap();
        assert_eq!(cert.common_name.as_deref(), Some("wrong.example.net"));
        assert_eq!(cert.san, vec!["wrong.example.net"]);
        assert!(cert.is_expired);
        assert!(cert.days_remaining < 0);
        assert!(!cert.hostname_matches);
        assert!(!cert.is_valid);
        assert!(cert.valid_to.starts_with("2021-01-01"));
    }

    #[tokio::test]
    async fn test_untrusted_certificate_is_still_reported() {
        let service = SslService::new(Arc::new(Config::load().unwrap())).unwrap();

        let key = rustls_pki_types::PrivateKeyDer::try_from(EXPIRED_KEY.to_vec()).unwrap();
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![CertificateDer::from(EXPIRED_CERT.to_vec())], key)
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // First connection fails verification, the second reads the certificate
            for _ in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let _ = acceptor.accept(stream).await;
            }
        });

        let result = service.inspect("127.0.0.1", port).await;
        assert_eq!(result.connection_status, ConnectionStatus::Https);
        assert!(result.error.unwrap().contains("TLS handshake failed"));

        let cert = result.certificate.unwrap();
        assert!(!cert.trusted);
        assert!(cert.is_expired);
        assert!(!cert.hostname_matches);
        assert!(!cert.is_valid);
        assert_eq!(cert.chain.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_port_fails_without_certificate() {
        let service = SslService::new(Arc::new(Config::load().unwrap())).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = service.inspect("127.0.0.1", port).await;
        assert_eq!(result.connection_status, ConnectionStatus::Failed);
        assert!(result.certificate.is_none());
        assert!(result.error.unwrap().starts_with("Connection failed"));
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_inspect_real_certificate() {
        let service = SslService::new(Arc::new(Config::load().unwrap())).unwrap();
        let result = service.inspect("example.com", 443).await;
        assert_eq!(result.connection_status, ConnectionStatus::Https);
        let cert = result.certificate.unwrap();
        assert!(cert.hostname_matches);
        assert!(cert.trusted);
        assert!(!cert.chain.is_empty());
    }
}
