//! One-box triage: detect what the operator pasted and run the tools that
//! apply to it.

use crate::{
    classifier::TicketClassification,
    dns::DomainStatus,
    errors::ToolkitError,
    geo::GeoInfo,
    health::{HealthOptions, HealthReport},
    input::{self, QueryKind},
    knowledge::{self, ArticleMatch},
    ssl::SslCheckResult,
    SupportToolkit,
};
use serde::Serialize;
use tracing::info;

/// Outcome of one tool inside a triage report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section<T> {
    Ok(T),
    Error(String),
}

impl<T> Section<T> {
    pub fn ok(&self) -> Option<&T> {
        match self {
            Section::Ok(value) => Some(value),
            Section::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Section::Error(_))
    }
}

impl<T> From<Result<T, ToolkitError>> for Section<T> {
    fn from(result: Result<T, ToolkitError>) -> Self {
        match result {
            Ok(value) => Section::Ok(value),
            Err(e) => Section::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainTriage {
    pub status: Section<DomainStatus>,
    pub health: Section<HealthReport>,
    pub ssl: Section<SslCheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketTriage {
    pub classification: Section<TicketClassification>,
    pub articles: Vec<ArticleMatch>,
    /// Health of the first domain the ticket mentions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_health: Option<Section<HealthReport>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub query: QueryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainTriage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Section<GeoInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketTriage>,
}

impl SupportToolkit {
    /// Only unrecognizable (empty) input fails; tool failures are reported per section.
    pub async fn triage(&self, raw: &str) -> Result<TriageReport, ToolkitError> {
        let query = QueryKind::detect(raw)?;
        info!("Triage of {} input", kind_label(&query));

        let mut report = TriageReport {
            query: query.clone(),
            domain: None,
            ip: None,
            ticket: None,
        };

        match &query {
            QueryKind::Domain(domain) => {
                report.domain = Some(self.triage_domain(domain).await);
            }
            QueryKind::Ip(ip) => {
                report.ip = Some(self.locate_ip(*ip).await.into());
            }
            QueryKind::Ticket(ticket) => {
                report.ticket = Some(self.triage_ticket(ticket).await);
            }
        }

        Ok(report)
    }

    async fn triage_domain(&self, domain: &str) -> DomainTriage {
        let (status, health, ssl) = tokio::join!(
            self.domain_status(domain),
            self.health(domain, HealthOptions::default()),
            self.ssl(domain, self.config().tls_port),
        );

        DomainTriage {
            status: status.into(),
            health: health.into(),
            ssl: ssl.into(),
        }
    }

    async fn triage_ticket(&self, ticket: &str) -> TicketTriage {
        let classification = self.classify_ticket(ticket).await;

        let first_domain = match &classification {
            Ok(c) => c.affected_domains.first().cloned(),
            Err(_) => None,
        }
        .or_else(|| input::extract_domains(ticket).into_iter().next());

        let domain_health = match first_domain {
            Some(domain) => Some(self.health(&domain, HealthOptions::default()).await.into()),
            None => None,
        };

        TicketTriage {
            classification: classification.into(),
            articles: knowledge::search(ticket),
            domain_health,
        }
    }
}

fn kind_label(query: &QueryKind) -> &'static str {
    match query {
        QueryKind::Ip(_) => "ip",
        QueryKind::Domain(_) => "domain",
        QueryKind::Ticket(_) => "ticket",
    }
}
