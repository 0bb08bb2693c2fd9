#![cfg(feature = "server")]

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query},
    http::{HeaderMap, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use support_toolkit::{
    config::Config,
    server::{router, AppState},
    SupportToolkit, TicketClassifier, ToolkitError,
};
use tokio::net::TcpListener;
use tower::ServiceExt;

const BODY_LIMIT: usize = 1024 * 1024;

async fn resolve(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let name = params.get("name").cloned().unwrap_or_default();
    let record_type = params.get("type").cloned().unwrap_or_default();

    if name == "missing.example" {
        return Json(json!({ "Status": 3, "Answer": [] }));
    }

    let answer = match record_type.as_str() {
        "A" => json!([
            { "name": "example.com.", "type": 1, "TTL": 300, "data": "93.184.216.34" },
            { "name": "example.com.", "type": 1, "TTL": 300, "data": "93.184.216.35" }
        ]),
        "NS" => json!([
            { "name": "example.com.", "type": 2, "TTL": 86400, "data": "a.iana-servers.net." },
            { "name": "example.com.", "type": 2, "TTL": 86400, "data": "b.iana-servers.net." }
        ]),
        "SOA" => json!([
            { "name": "example.com.", "type": 6, "TTL": 3600, "data": "ns.icann.org. noc.dns.icann.org. 2024081401 7200 3600 1209600 3600" }
        ]),
        "TXT" => json!([
            { "name": "example.com.", "type": 16, "TTL": 300, "data": "\"v=spf1 include:_spf.example.net -all\"" }
        ]),
        _ => json!([]),
    };

    Json(json!({ "Status": 0, "Answer": answer }))
}

async fn public_ip() -> Json<Value> {
    Json(json!({ "ip": "203.0.113.9" }))
}

async fn geolocate(Path(ip): Path<String>) -> Json<Value> {
    if ip.starts_with("10.") {
        return Json(json!({ "ip": ip, "error": true, "reason": "Reserved IP Address", "reserved": true }));
    }
    Json(json!({
        "ip": ip,
        "city": "Amsterdam",
        "region": "North Holland",
        "country_name": "Netherlands",
        "country_code": "NL",
        "org": "Example Hosting B.V.",
        "asn": "AS64500",
        "timezone": "Europe/Amsterdam",
        "latitude": 52.37,
        "longitude": 4.89
    }))
}

async fn labs_analyze() -> Json<Value> {
    Json(json!({
        "host": "example.com",
        "status": "READY",
        "endpoints": [
            { "ipAddress": "93.184.216.34", "grade": "A+", "statusMessage": "Ready" }
        ]
    }))
}

/// Models named "busy*" answer 429, "broken*" 500 and "empty*" a reply
/// without text; the rest classify.
async fn generate_content(
    Path(model_action): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if params.contains_key("key") || headers.get("x-goog-api-key").is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "code": 401 } }))).into_response();
    }
    if model_action.starts_with("busy") {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": { "code": 429 } }))).into_response();
    }
    if model_action.starts_with("broken") {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": { "code": 500 } }))).into_response();
    }
    if model_action.starts_with("empty") {
        return Json(json!({ "candidates": [ { "content": { "parts": [] } } ] })).into_response();
    }

    let classification = json!({
        "category": "email",
        "priority": "high",
        "summary": "Outgoing mail is rejected by recipients",
        "suggested_actions": ["Check the SPF record", "Request the bounce message"],
        "affected_domains": []
    });
    Json(json!({
        "candidates": [
            { "content": { "parts": [ { "text": format!("```json\n{}\n```", classification) } ] } }
        ]
    }))
    .into_response()
}

async fn spawn_upstreams() -> SocketAddr {
    let app = Router::new()
        .route("/resolve", get(resolve))
        .route("/ipify", get(public_ip))
        .route("/geo/:ip/json/", get(geolocate))
        .route("/labs/analyze", get(labs_analyze))
        .route("/ai/models/:model_action", post(generate_content));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn test_config(models: &[&str]) -> Config {
    let addr = spawn_upstreams().await;
    let base = Config::load().unwrap();
    Config {
        doh_url: format!("http://{}/resolve", addr),
        public_ip_url: format!("http://{}/ipify", addr),
        geo_url: format!("http://{}/geo", addr),
        ssllabs_url: format!("http://{}/labs", addr),
        ai_api_url: format!("http://{}/ai", addr),
        ai_api_key: Some("test-key".to_string()),
        ai_models: models.iter().map(|m| m.to_string()).collect(),
        // Keep the port-43 lookups short when there is no network
        whois_timeout_seconds: 2,
        discovery_timeout_seconds: 2,
        ..base
    }
}

fn app_for(config: Config) -> Router {
    let config = Arc::new(config);
    let toolkit = SupportToolkit::new(config.clone()).unwrap();
    router(AppState::new(toolkit, config))
}

async fn test_app(models: &[&str]) -> Router {
    app_for(test_config(models).await)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn whois_findings(report: &Value) -> usize {
    ["issues", "warnings", "passed", "info"]
        .iter()
        .flat_map(|bucket| report[*bucket].as_array().cloned().unwrap_or_default())
        .filter(|finding| finding["check"] == "WHOIS")
        .count()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_dashboard_and_health_endpoints() {
    let app = test_app(&["good-model"]).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
    assert!(String::from_utf8_lossy(&page).contains("Support Toolkit"));

    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_domain_status() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app.clone(), "/api/domain/Example.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolving"], true);
    assert_eq!(body["message"], "Domain example.com is active and resolving");
    assert_eq!(body["addresses"], json!(["93.184.216.34", "93.184.216.35"]));

    let (status, body) = get_json(app.clone(), "/api/domain/missing.example").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolving"], false);
    assert_eq!(body["message"], "Domain missing.example not found or not resolving (NXDOMAIN)");

    let (status, body) = get_json(app, "/api/domain/not_a_domain").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_dns_records() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app.clone(), "/api/dns/example.com?types=A,TXT,MX").await;
    assert_eq!(status, StatusCode::OK);
    let sets = body["record_sets"].as_array().unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0]["record_type"], "A");
    assert_eq!(sets[1]["records"], json!(["v=spf1 include:_spf.example.net -all"]));
    assert!(body["message"].is_null());

    let (status, body) = get_json(app.clone(), "/api/dns/missing.example").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No records found");

    let (status, _) = get_json(app, "/api/dns/example.com?types=A,PTR").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_report_without_whois() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app.clone(), "/api/health/example.com?whois=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["overall"], "degraded");
    assert_eq!(body["summary"]["passed"], 4);
    assert_eq!(body["warnings"][0]["message"], "AAAA records missing (no IPv6)");
    assert_eq!(body["cached"], false);

    let (_, again) = get_json(app, "/api/health/example.com?whois=false").await;
    assert_eq!(again["cached"], true);
    assert_eq!(again["checked_at"], body["checked_at"]);
}

#[tokio::test]
async fn test_health_report_cache_bypass_and_whois_variants() {
    let app = test_app(&["good-model"]).await;

    let (_, first) = get_json(app.clone(), "/api/health/example.com?whois=false").await;
    assert_eq!(first["cached"], false);
    assert_eq!(whois_findings(&first), 0);

    let (_, cached) = get_json(app.clone(), "/api/health/example.com?whois=false").await;
    assert_eq!(cached["cached"], true);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let (status, fresh) = get_json(app.clone(), "/api/health/example.com?whois=false&fresh=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fresh["cached"], false);
    assert_ne!(fresh["checked_at"], first["checked_at"]);

    // The fresh run replaced the cached DNS-only report
    let (_, after_fresh) = get_json(app.clone(), "/api/health/example.com?whois=false").await;
    assert_eq!(after_fresh["cached"], true);
    assert_eq!(after_fresh["checked_at"], fresh["checked_at"]);

    // A full report never comes from the DNS-only entry
    let (status, full) = get_json(app, "/api/health/example.com?whois=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(full["cached"], false);
    assert_eq!(whois_findings(&full), 1);
}

#[tokio::test]
async fn test_health_report_for_nxdomain() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app, "/api/health/missing.example?whois=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["overall"], "critical");
    let issues: Vec<&str> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["message"].as_str().unwrap())
        .collect();
    assert_eq!(issues, vec!["domain not resolving (NXDOMAIN)", "no nameservers found"]);
}

#[tokio::test]
async fn test_ip_lookups() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app.clone(), "/api/ip").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ip"], "203.0.113.9");
    assert_eq!(body["country"], "Netherlands");
    assert_eq!(body["ip_version"], "IPv4");

    let (status, body) = get_json(app.clone(), "/api/ip/10.0.0.1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Reserved IP Address"));

    let (status, _) = get_json(app, "/api/ip/not-an-ip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ssl_labs_grade() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app, "/api/ssl/example.com/labs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["endpoints"][0]["grade"], "A+");
    assert_eq!(body["endpoints"][0]["ip_address"], "93.184.216.34");
}

#[tokio::test]
async fn test_ticket_classification_rotates_past_rate_limited_model() {
    let app = test_app(&["busy-model", "good-model"]).await;

    let (status, body) = post_json(
        app,
        "/api/ticket",
        json!({ "ticket": "Our emails to clients bounce since this morning" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "ai");
    assert_eq!(body["model"], "good-model");
    assert_eq!(body["model_fallbacks"], 1);
    assert_eq!(body["category"], "email");
    assert_eq!(body["priority"], "high");
}

#[tokio::test]
async fn test_ticket_classification_falls_back_when_every_model_is_busy() {
    let app = test_app(&["busy-model", "busy-model-2"]).await;

    let (status, body) = post_json(
        app.clone(),
        "/api/ticket",
        json!({ "ticket": "Certificate error: browsers say the SSL certificate expired" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "heuristic");
    assert_eq!(body["category"], "ssl");
    assert!(body["ai_error"].as_str().unwrap().contains("rate limited"));

    let (status, _) = post_json(app, "/api/ticket", json!({ "ticket": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rotation_outcomes() {
    let config = test_config(&[]).await;

    let mixed = Config {
        ai_models: vec!["busy-model".to_string(), "broken-model".to_string()],
        ..config.clone()
    };
    let result = TicketClassifier::new(&mixed).unwrap().classify_with_ai("Mail bounces").await;
    match result {
        Err(ToolkitError::AiUnavailable(message)) => assert!(message.contains("broken-model")),
        other => panic!("expected AiUnavailable, got {:?}", other.map(|c| c.model)),
    }

    let none = Config { ai_models: Vec::new(), ..config.clone() };
    let result = TicketClassifier::new(&none).unwrap().classify_with_ai("Mail bounces").await;
    match result {
        Err(ToolkitError::AiUnavailable(message)) => assert_eq!(message, "no AI models configured"),
        other => panic!("expected AiUnavailable, got {:?}", other.map(|c| c.model)),
    }

    let skips_empty = Config {
        ai_models: vec!["empty-model".to_string(), "good-model".to_string()],
        ..config
    };
    let classification = TicketClassifier::new(&skips_empty)
        .unwrap()
        .classify_with_ai("Mail bounces")
        .await
        .unwrap();
    assert_eq!(classification.model.as_deref(), Some("good-model"));
    assert_eq!(classification.model_fallbacks, 1);
}

#[tokio::test]
async fn test_exhausted_rotation_reports_attempted_models() {
    let app = test_app(&["busy-model", "broken-model", "empty-model"]).await;

    let (status, body) = post_json(app, "/api/ticket", json!({ "ticket": "DNS for example.com stopped resolving" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "heuristic");
    assert_eq!(body["model_fallbacks"], 3);
    assert!(body["model"].is_null());
    assert!(!body["ai_error"].as_str().unwrap().contains("test-key"));
}

#[tokio::test]
async fn test_knowledge_base_search() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = get_json(app.clone(), "/api/kb?q=DKIM%20failing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["article"]["id"], "spf-dkim-dmarc");
    assert_eq!(body["results"][0]["matched_keywords"], json!(["dkim"]));

    let (_, all) = get_json(app, "/api/kb").await;
    assert_eq!(all["results"].as_array().unwrap().len(), 9);
}

#[tokio::test]
async fn test_triage_reports_partial_failures_per_section() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = post_json(app.clone(), "/api/triage", json!({ "input": "10.0.0.1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], json!({ "kind": "ip", "value": "10.0.0.1" }));
    assert!(body["ip"]["error"].as_str().unwrap().contains("Reserved IP Address"));

    let (status, body) = post_json(
        app.clone(),
        "/api/triage",
        json!({ "input": "Customer reports mail bounces with error 550 after switching providers" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"]["kind"], "ticket");
    assert_eq!(body["ticket"]["classification"]["ok"]["category"], "email");
    assert_eq!(body["ticket"]["articles"][0]["article"]["id"], "email-delivery");
    assert!(body["ticket"].get("domain_health").is_none());

    let (status, _) = post_json(app, "/api/triage", json!({ "input": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_triage_of_a_domain_runs_every_section() {
    let config = Config {
        tls_port: closed_port().await,
        ..test_config(&["good-model"]).await
    };
    let app = app_for(config);

    let (status, body) = post_json(app, "/api/triage", json!({ "input": "https://Example.com/shop" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], json!({ "kind": "domain", "value": "example.com" }));

    let domain = &body["domain"];
    assert_eq!(domain["status"]["ok"]["resolving"], true);
    assert_eq!(domain["health"]["ok"]["domain"], "example.com");
    assert_eq!(whois_findings(&domain["health"]["ok"]), 1);

    // An unreachable TLS port only degrades its own section
    let ssl = &domain["ssl"]["ok"];
    assert_eq!(ssl["connection_status"], "failed");
    assert!(ssl["certificate"].is_null());
    assert!(ssl["error"].is_string());
    assert!(body.get("ip").is_none());
    assert!(body.get("ticket").is_none());
}

#[tokio::test]
async fn test_triage_of_a_ticket_checks_the_mentioned_domain() {
    let app = test_app(&["good-model"]).await;

    let (status, body) = post_json(
        app,
        "/api/triage",
        json!({ "input": "Since yesterday mail sent from example.com bounces with error 550" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"]["kind"], "ticket");
    assert_eq!(body["ticket"]["classification"]["ok"]["affected_domains"], json!(["example.com"]));

    let health = &body["ticket"]["domain_health"]["ok"];
    assert_eq!(health["domain"], "example.com");
    assert_eq!(whois_findings(health), 1);
}
