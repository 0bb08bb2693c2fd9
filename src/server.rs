//! HTTP API and dashboard page.

use crate::{
    classifier::TicketClassification,
    config::Config,
    dns::{DnsRecordsReport, DomainStatus, RecordType},
    errors::ToolkitError,
    geo::GeoInfo,
    health::{HealthOptions, HealthReport},
    input,
    knowledge::{self, ArticleMatch},
    metrics,
    ssl::{LabsReport, SslCheckResult},
    triage::TriageReport,
    whois::WhoisResponse,
    SupportToolkit,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::IpAddr, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");
const DEFAULT_TLS_PORT: u16 = 443;

#[derive(Clone)]
pub struct AppState {
    toolkit: SupportToolkit,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(toolkit: SupportToolkit, config: Arc<Config>) -> Self {
        Self { toolkit, config }
    }
}

// Domain validation extractor
#[derive(Debug, Clone)]
pub struct ValidatedDomain(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedDomain
where
    S: Send + Sync,
{
    type Rejection = ToolkitError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ToolkitError::InvalidDomain(e.body_text()))?;
        Self::validate_domain(&raw)
    }
}

impl ValidatedDomain {
    pub fn validate_domain(raw: &str) -> Result<Self, ToolkitError> {
        match input::normalize_domain(raw) {
            Ok(domain) => Ok(ValidatedDomain(domain)),
            Err(e) => {
                metrics::increment_errors("invalid_domain");
                Err(e)
            }
        }
    }
}

#[derive(Deserialize)]
struct DnsQuery {
    /// Comma-separated record types, e.g. "A,MX"
    types: Option<String>,
}

#[derive(Deserialize)]
struct FreshQuery {
    #[serde(default)]
    /// Skip cache if true
    fresh: bool,
}

#[derive(Deserialize)]
struct HealthQuery {
    #[serde(default)]
    fresh: bool,
    /// Include the whois expiry/hold check (default true)
    whois: Option<bool>,
}

#[derive(Deserialize)]
struct SslQuery {
    port: Option<u16>,
}

#[derive(Deserialize)]
struct KbQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct TicketRequest {
    ticket: String,
}

#[derive(Deserialize)]
struct TriageRequest {
    input: String,
}

#[derive(Serialize)]
struct KbResponse {
    query: String,
    results: Vec<ArticleMatch>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/domain/:domain", get(domain_status))
        .route("/api/dns/:domain", get(dns_records))
        .route("/api/whois/:domain", get(whois_lookup))
        .route("/api/health/:domain", get(domain_health))
        .route("/api/ip", get(my_ip))
        .route("/api/ip/:ip", get(locate_ip))
        .route("/api/ssl/:domain", get(ssl_check))
        .route("/api/ssl/:domain/labs", get(ssl_labs))
        .route("/api/ticket", post(classify_ticket))
        .route("/api/kb", get(kb_search))
        .route("/api/triage", post(triage))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(state)
}

/// Count, time and error-track one tool invocation.
async fn instrumented<T, F>(tool: &'static str, lookup: F) -> Result<Json<T>, ToolkitError>
where
    F: Future<Output = Result<T, ToolkitError>>,
{
    let start_time = Instant::now();
    metrics::increment_requests(tool);

    let result = lookup.await;
    metrics::record_query_time(tool, start_time.elapsed().as_millis() as u64);

    match result {
        Ok(value) => Ok(Json(value)),
        Err(e) => {
            tracing::debug!("{} request failed: {}", tool, e);
            metrics::increment_errors(e.kind());
            Err(e)
        }
    }
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.config.start_time.elapsed().as_secs();
    metrics::set_uptime(uptime_seconds);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
    })
}

async fn domain_status(
    ValidatedDomain(domain): ValidatedDomain,
    State(state): State<AppState>,
) -> Result<Json<DomainStatus>, ToolkitError> {
    instrumented("domain", state.toolkit.domain_status(&domain)).await
}

async fn dns_records(
    ValidatedDomain(domain): ValidatedDomain,
    Query(params): Query<DnsQuery>,
    State(state): State<AppState>,
) -> Result<Json<DnsRecordsReport>, ToolkitError> {
    let types = match params.types.as_deref() {
        Some(list) => RecordType::parse_list(list)?,
        None => Vec::new(),
    };
    instrumented("dns", state.toolkit.dns_records(&domain, &types)).await
}

async fn whois_lookup(
    ValidatedDomain(domain): ValidatedDomain,
    Query(params): Query<FreshQuery>,
    State(state): State<AppState>,
) -> Result<Json<WhoisResponse>, ToolkitError> {
    let response = instrumented("whois", state.toolkit.whois(&domain, params.fresh)).await?;
    metrics::record_cache("whois", response.cached);
    Ok(response)
}

async fn domain_health(
    ValidatedDomain(domain): ValidatedDomain,
    Query(params): Query<HealthQuery>,
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, ToolkitError> {
    let options = HealthOptions {
        include_whois: params.whois.unwrap_or(true),
        fresh: params.fresh,
    };
    let report = instrumented("health", state.toolkit.health(&domain, options)).await?;
    metrics::record_cache("health", report.cached);
    Ok(report)
}

async fn my_ip(State(state): State<AppState>) -> Result<Json<GeoInfo>, ToolkitError> {
    instrumented("ip", state.toolkit.my_ip()).await
}

async fn locate_ip(
    Path(raw): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GeoInfo>, ToolkitError> {
    let ip: IpAddr = raw
        .trim()
        .parse()
        .map_err(|_| ToolkitError::InvalidInput(format!("Not an IP address: {}", raw)))?;
    instrumented("ip", state.toolkit.locate_ip(ip)).await
}

async fn ssl_check(
    ValidatedDomain(domain): ValidatedDomain,
    Query(params): Query<SslQuery>,
    State(state): State<AppState>,
) -> Result<Json<SslCheckResult>, ToolkitError> {
    let port = params.port.unwrap_or(DEFAULT_TLS_PORT);
    instrumented("ssl", state.toolkit.ssl(&domain, port)).await
}

async fn ssl_labs(
    ValidatedDomain(domain): ValidatedDomain,
    State(state): State<AppState>,
) -> Result<Json<LabsReport>, ToolkitError> {
    instrumented("ssl_labs", state.toolkit.ssl_labs(&domain)).await
}

async fn classify_ticket(
    State(state): State<AppState>,
    Json(payload): Json<TicketRequest>,
) -> Result<Json<TicketClassification>, ToolkitError> {
    let classification = instrumented("ticket", state.toolkit.classify_ticket(&payload.ticket)).await?;
    metrics::record_model_fallbacks(classification.model_fallbacks);
    Ok(classification)
}

async fn kb_search(Query(params): Query<KbQuery>) -> Json<KbResponse> {
    metrics::increment_requests("kb");
    let query = params.q.unwrap_or_default();

    // An empty query lists the whole knowledge base
    let results = if query.trim().is_empty() {
        knowledge::articles()
            .iter()
            .map(|article| ArticleMatch {
                article,
                matched_keywords: Vec::new(),
            })
            .collect()
    } else {
        knowledge::search(&query)
    };

    Json(KbResponse { query, results })
}

async fn triage(
    State(state): State<AppState>,
    Json(payload): Json<TriageRequest>,
) -> Result<Json<TriageReport>, ToolkitError> {
    let report = instrumented("triage", state.toolkit.triage(&payload.input)).await?;
    if let Some(ticket) = &report.ticket {
        if let Some(classification) = ticket.classification.ok() {
            metrics::record_model_fallbacks(classification.model_fallbacks);
        }
    }
    Ok(report)
}
