//! # Support Toolkit Library
//!
//! First-line support diagnostics behind one facade.
//!
//! ## Features
//!
//! - Domain status and record lookups over DNS-over-HTTPS
//! - Port-43 whois with IANA server discovery, referral following and parsing
//! - Public IP discovery and IP geolocation
//! - TLS certificate inspection and SSL Labs grading
//! - Domain health report bucketing DNS/WHOIS findings into issues and warnings
//! - Support-ticket classification with AI model rotation and a keyword fallback
//! - Static knowledge base search
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use support_toolkit::SupportToolkit;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let toolkit = SupportToolkit::from_env()?;
//!     let report = toolkit.health("example.com", Default::default()).await?;
//!
//!     println!("{}", report.summary.text);
//!     for issue in &report.issues {
//!         println!("issue: {}", issue.message);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod buffer_pool;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dns;
pub mod errors;
pub mod geo;
pub mod health;
pub mod input;
pub mod knowledge;
pub mod parser;
pub mod ssl;
pub mod tld_mappings;
pub mod triage;
pub mod whois;

#[cfg(feature = "server")]
pub mod metrics;
#[cfg(feature = "server")]
pub mod server;

// Re-export main types for easy access
pub use cache::CacheService;
pub use classifier::{TicketCategory, TicketClassification, TicketClassifier};
pub use config::Config;
pub use errors::ToolkitError;
pub use health::{HealthOptions, HealthReport};
pub use input::QueryKind;
pub use parser::ParsedWhoisData;
pub use triage::TriageReport;
pub use whois::WhoisResponse;

use dns::{DnsRecordsReport, DnsService, DomainStatus, RecordType};
use geo::{GeoInfo, GeoService, HostLocation};
use health::HealthChecker;
use ssl::{LabsReport, SslCheckResult, SslService};
use std::{net::IpAddr, sync::Arc};
use whois::{WhoisClient, WhoisService};

/// Every diagnostic tool wired to one configuration.
///
/// Domain arguments are normalized here, so callers may pass whatever the
/// operator typed ("https://Example.com/path").
#[derive(Clone)]
pub struct SupportToolkit {
    config: Arc<Config>,
    dns: Arc<DnsService>,
    whois: WhoisClient,
    geo: Arc<GeoService>,
    ssl: Arc<SslService>,
    health: Arc<HealthChecker>,
    classifier: Arc<TicketClassifier>,
}

impl SupportToolkit {
    /// Create a toolkit from `.env` / environment configuration
    pub fn from_env() -> Result<Self, ToolkitError> {
        let config = Arc::new(Config::load()?);
        Self::new(config)
    }

    pub fn new(config: Arc<Config>) -> Result<Self, ToolkitError> {
        let classifier = TicketClassifier::new(&config)?;
        Self::with_classifier(config, classifier)
    }

    /// Create a toolkit around a caller-supplied classifier
    pub fn with_classifier(config: Arc<Config>, classifier: TicketClassifier) -> Result<Self, ToolkitError> {
        let dns = Arc::new(DnsService::new(config.clone())?);
        let whois = WhoisClient::new(
            Arc::new(WhoisService::new(config.clone())),
            Arc::new(CacheService::new(config.clone(), "whois")),
        );
        let geo = Arc::new(GeoService::new(config.clone())?);
        let ssl = Arc::new(SslService::new(config.clone())?);
        let health = Arc::new(HealthChecker::new(config.clone(), dns.clone(), whois.clone()));

        Ok(Self {
            config,
            dns,
            whois,
            geo,
            ssl,
            health,
            classifier: Arc::new(classifier),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn domain_status(&self, domain: &str) -> Result<DomainStatus, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        self.dns.domain_status(&domain).await
    }

    pub async fn dns_records(&self, domain: &str, types: &[RecordType]) -> Result<DnsRecordsReport, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        Ok(self.dns.lookup_records(&domain, types).await)
    }

    /// Whois lookup, served from cache unless `fresh` is set
    pub async fn whois(&self, domain: &str, fresh: bool) -> Result<WhoisResponse, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        self.whois.lookup_with_options(&domain, fresh).await
    }

    pub async fn health(&self, domain: &str, options: HealthOptions) -> Result<HealthReport, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        Ok(self.health.check(&domain, options).await)
    }

    pub async fn my_ip(&self) -> Result<GeoInfo, ToolkitError> {
        self.geo.my_ip().await
    }

    pub async fn locate_ip(&self, ip: IpAddr) -> Result<GeoInfo, ToolkitError> {
        self.geo.locate(ip).await
    }

    pub async fn locate_host(&self, domain: &str) -> Result<HostLocation, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        self.geo.locate_host(&self.dns, &domain).await
    }

    pub async fn ssl(&self, domain: &str, port: u16) -> Result<SslCheckResult, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        Ok(self.ssl.inspect(&domain, port).await)
    }

    pub async fn ssl_labs(&self, domain: &str) -> Result<LabsReport, ToolkitError> {
        let domain = input::normalize_domain(domain)?;
        self.ssl.labs_grade(&domain).await
    }

    pub async fn classify_ticket(&self, ticket: &str) -> Result<TicketClassification, ToolkitError> {
        self.classifier.classify(ticket).await
    }

    pub fn search_knowledge_base(&self, query: &str) -> Vec<knowledge::ArticleMatch> {
        knowledge::search(query)
    }
}
