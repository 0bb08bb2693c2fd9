//! Support-ticket classification through a generative-AI endpoint, rotating
//! across model identifiers when one is rate limited, with a keyword
//! heuristic when no model answers.

use crate::{config::Config, errors::ToolkitError, input, knowledge};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

const MAX_TICKET_CHARS: usize = 12_000;
const MAX_SUMMARY_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    Dns,
    Email,
    Ssl,
    Connectivity,
    DomainRegistration,
    Website,
    Account,
    Other,
}

impl TicketCategory {
    pub fn parse_loose(value: &str) -> Self {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "dns" => TicketCategory::Dns,
            "email" | "mail" => TicketCategory::Email,
            "ssl" | "tls" | "certificate" | "ssl_tls" => TicketCategory::Ssl,
            "connectivity" | "network" => TicketCategory::Connectivity,
            "domain_registration" | "domain" | "registration" | "whois" => TicketCategory::DomainRegistration,
            "website" | "web" | "hosting" => TicketCategory::Website,
            "account" | "billing" | "login" => TicketCategory::Account,
            _ => TicketCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse_loose(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" | "p4" => Priority::Low,
            "high" | "p2" => Priority::High,
            "critical" | "urgent" | "p1" => Priority::Critical,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Ai,
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketClassification {
    pub category: TicketCategory,
    pub priority: Priority,
    pub summary: String,
    pub suggested_actions: Vec<String>,
    pub affected_domains: Vec<String>,
    pub mentioned_ips: Vec<IpAddr>,
    pub source: ClassificationSource,
    pub model: Option<String>,
    /// Models that failed before this result: skipped models for an AI
    /// answer, every attempted model for a heuristic one.
    pub model_fallbacks: usize,
    /// Why the AI result is missing when `source` is heuristic.
    pub ai_error: Option<String>,
}

/// Text produced by one of the configured models.
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub model: String,
    pub fallbacks: usize,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generated, ToolkitError>;

    /// How many models one `generate` call may try.
    fn model_count(&self) -> usize {
        1
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Gemini `generateContent` client that walks the model list in order.
pub struct GeminiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    models: Vec<String>,
}

impl GeminiClient {
    pub fn new(config: &Config, api_key: String) -> Result<Self, ToolkitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds.max(30)))
            .build()?;

        Ok(Self {
            client,
            api_url: config.ai_api_url.clone(),
            api_key,
            models: config.ai_models.clone(),
        })
    }

    async fn try_model(&self, model: &str, prompt: &str) -> Result<String, ToolkitError> {
        let url = format!("{}/models/{}:generateContent", self.api_url, model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json"
            }
        });

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolkitError::HttpError(e.without_url()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ToolkitError::RateLimited(format!("model {} is rate limited", model)));
        }
        if !status.is_success() {
            return Err(ToolkitError::Upstream {
                service: format!("AI model {}", model),
                status: status.as_u16(),
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ToolkitError::HttpError(e.without_url()))?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ToolkitError::AiUnavailable(format!("model {} returned no text", model)));
        }

        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Generated, ToolkitError> {
        let mut last_error: Option<ToolkitError> = None;
        let mut all_rate_limited = true;

        for (index, model) in self.models.iter().enumerate() {
            match self.try_model(model, prompt).await {
                Ok(text) => {
                    debug!("Model {} answered after {} fallbacks", model, index);
                    return Ok(Generated {
                        text,
                        model: model.clone(),
                        fallbacks: index,
                    });
                }
                Err(e) => {
                    if !matches!(e, ToolkitError::RateLimited(_)) {
                        all_rate_limited = false;
                    }
                    warn!("Model {} failed, trying next: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            None => Err(ToolkitError::AiUnavailable("no AI models configured".to_string())),
            Some(_) if all_rate_limited => Err(ToolkitError::RateLimited(format!(
                "all {} AI models are rate limited",
                self.models.len()
            ))),
            Some(e) => Err(ToolkitError::AiUnavailable(e.to_string())),
        }
    }

    fn model_count(&self) -> usize {
        self.models.len()
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: Option<String>,
    priority: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    suggested_actions: Vec<String>,
    #[serde(default)]
    affected_domains: Vec<String>,
}

pub struct TicketClassifier {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl TicketClassifier {
    pub fn new(config: &Config) -> Result<Self, ToolkitError> {
        let generator: Option<Arc<dyn TextGenerator>> = match &config.ai_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(config, key.clone())?)),
            None => {
                info!("No AI API key configured; tickets will be classified by keywords");
                None
            }
        };
        Ok(Self { generator })
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator: Some(generator) }
    }

    pub fn without_ai() -> Self {
        Self { generator: None }
    }

    /// Classify with the AI when possible, falling back to keywords.
    pub async fn classify(&self, ticket: &str) -> Result<TicketClassification, ToolkitError> {
        let ticket = ticket.trim();
        if ticket.is_empty() {
            return Err(ToolkitError::InvalidInput("Empty ticket".to_string()));
        }

        match self.classify_with_ai(ticket).await {
            Ok(classification) => Ok(classification),
            Err(e) => {
                debug!("Falling back to keyword classification: {}", e);
                let mut classification = classify_by_keywords(ticket);
                classification.model_fallbacks = self.generator.as_ref().map_or(0, |g| g.model_count());
                classification.ai_error = Some(e.to_string());
                Ok(classification)
            }
        }
    }

    /// AI classification only; errors when no model produced a usable answer.
    pub async fn classify_with_ai(&self, ticket: &str) -> Result<TicketClassification, ToolkitError> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| ToolkitError::AiUnavailable("no AI API key configured".to_string()))?;

        let generated = generator.generate(&build_prompt(ticket)).await?;
        let raw = parse_model_output(&generated.text)?;

        let mut affected_domains: Vec<String> = raw
            .affected_domains
            .iter()
            .filter_map(|d| input::normalize_domain(d).ok())
            .collect();
        for domain in input::extract_domains(ticket) {
            if !affected_domains.contains(&domain) {
                affected_domains.push(domain);
            }
        }

        let category = raw.category.as_deref().map(TicketCategory::parse_loose).unwrap_or(TicketCategory::Other);
        let mut suggested_actions = raw.suggested_actions;
        if suggested_actions.is_empty() {
            suggested_actions = default_steps(category);
        }

        Ok(TicketClassification {
            category,
            priority: raw.priority.as_deref().map(Priority::parse_loose).unwrap_or(Priority::Medium),
            summary: raw.summary.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| summarize(ticket)),
            suggested_actions,
            affected_domains,
            mentioned_ips: input::extract_ips(ticket),
            source: ClassificationSource::Ai,
            model: Some(generated.model),
            model_fallbacks: generated.fallbacks,
            ai_error: None,
        })
    }
}

fn build_prompt(ticket: &str) -> String {
    let ticket: String = ticket.chars().take(MAX_TICKET_CHARS).collect();
    format!(
        "You are a level 1 technical support triage assistant.\n\
         Classify the support ticket below and answer with a single JSON object with keys:\n\
         \"category\": one of dns, email, ssl, connectivity, domain_registration, website, account, other;\n\
         \"priority\": one of low, medium, high, critical;\n\
         \"summary\": one sentence describing the customer's problem;\n\
         \"suggested_actions\": up to five short troubleshooting steps for the support agent;\n\
         \"affected_domains\": domain names the ticket is about.\n\n\
         Ticket:\n\"\"\"\n{}\n\"\"\"",
        ticket
    )
}

/// Pull the JSON object out of a model reply that may wrap it in prose or fences.
fn parse_model_output(text: &str) -> Result<RawClassification, ToolkitError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json_text = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => return Err(ToolkitError::AiUnavailable("model reply contained no JSON object".to_string())),
    };

    serde_json::from_str(json_text)
        .map_err(|e| ToolkitError::AiUnavailable(format!("model reply was not valid classification JSON: {}", e)))
}

const CRITICAL_TERMS: &[&str] = &["outage", "hacked", "breach", "phishing", "all users", "everyone", "production down"];
const HIGH_TERMS: &[&str] = &["urgent", "asap", "down", "not working", "cannot", "can't", "expired", "immediately"];
const LOW_TERMS: &[&str] = &["question", "how do i", "how to", "wondering", "when convenient", "no rush"];

pub fn classify_by_keywords(ticket: &str) -> TicketClassification {
    let lowered = ticket.to_lowercase();
    let matches = knowledge::search(ticket);

    let category = matches.first().map(|m| m.article.category).unwrap_or(TicketCategory::Other);

    let priority = if CRITICAL_TERMS.iter().any(|t| lowered.contains(t)) {
        Priority::Critical
    } else if HIGH_TERMS.iter().any(|t| lowered.contains(t)) {
        Priority::High
    } else if LOW_TERMS.iter().any(|t| lowered.contains(t)) {
        Priority::Low
    } else {
        Priority::Medium
    };

    let suggested_actions = match matches.first() {
        Some(m) => m.article.steps.iter().map(|s| s.to_string()).collect(),
        None => default_steps(category),
    };

    TicketClassification {
        category,
        priority,
        summary: summarize(ticket),
        suggested_actions,
        affected_domains: input::extract_domains(ticket),
        mentioned_ips: input::extract_ips(ticket),
        source: ClassificationSource::Heuristic,
        model: None,
        model_fallbacks: 0,
        ai_error: None,
    }
}

fn default_steps(category: TicketCategory) -> Vec<String> {
    match knowledge::for_category(category).first() {
        Some(article) => article.steps.iter().map(|s| s.to_string()).collect(),
        None => vec![
            "Ask the customer for the affected domain, exact error message and time it started".to_string(),
            "Reproduce the problem with the diagnostic tools before escalating".to_string(),
        ],
    }
}

/// First sentence (or line) of the ticket, clipped for display.
fn summarize(ticket: &str) -> String {
    let first = ticket
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    // Sentence ends at punctuation followed by whitespace, so "example.com" stays whole
    let end = first.char_indices().find(|&(idx, c)| {
        matches!(c, '.' | '!' | '?')
            && first[idx + c.len_utf8()..].starts_with(char::is_whitespace)
    });
    let sentence = match end {
        Some((idx, _)) => &first[..=idx],
        None => first,
    };

    if sentence.chars().count() > MAX_SUMMARY_CHARS {
        let clipped: String = sentence.chars().take(MAX_SUMMARY_CHARS - 3).collect();
        format!("{}...", clipped.trim_end())
    } else {
        sentence.to_string()
    }
}
