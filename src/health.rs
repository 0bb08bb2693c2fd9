//! Domain health report: a handful of independent DNS and WHOIS checks whose
//! one-line findings are bucketed by keyword into issues, warnings, passes
//! and informational notes.

use crate::{
    cache::{CacheService, Cacheable},
    config::Config,
    dns::{DnsAnswer, DnsService, RecordType},
    errors::ToolkitError,
    whois::{WhoisClient, WhoisResponse},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// Checked in order; the first list with a matching keyword wins
const ISSUE_KEYWORDS: &[&str] = &[
    "not resolving",
    "nxdomain",
    "servfail",
    "expired",
    "hold",
    "no nameservers",
    "multiple spf",
    "permits all",
];
const WARNING_KEYWORDS: &[&str] = &["missing", "expires in", "unavailable", "only one", "neutral"];
const PASS_KEYWORDS: &[&str] = &["resolving", "present", "delegated", "valid"];

const RCODE_SERVFAIL: u32 = 2;
const RCODE_NXDOMAIN: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Issue,
    Warning,
    Passed,
    Info,
}

impl Bucket {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| message.contains(k));

        if has_any(ISSUE_KEYWORDS) {
            Bucket::Issue
        } else if has_any(WARNING_KEYWORDS) {
            Bucket::Warning
        } else if has_any(PASS_KEYWORDS) {
            Bucket::Passed
        } else {
            Bucket::Info
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub check: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Finding {
    fn new(check: &str, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            check: check.to_string(),
            message: message.into(),
            detail,
        }
    }

    fn unavailable(check: &str, error: &ToolkitError) -> Self {
        Self::new(check, format!("{} lookup unavailable", check), Some(error.to_string()))
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::classify(&self.message)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Critical,
    Degraded,
    Healthy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSummary {
    pub issues: usize,
    pub warnings: usize,
    pub passed: usize,
    pub info: usize,
    pub overall: Overall,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub domain: String,
    pub issues: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub passed: Vec<Finding>,
    pub info: Vec<Finding>,
    pub summary: HealthSummary,
    pub checked_at: String,
    pub cached: bool,
}

impl Cacheable for HealthReport {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

impl HealthReport {
    pub fn from_findings(domain: &str, findings: Vec<Finding>, checked_at: String) -> Self {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut passed = Vec::new();
        let mut info = Vec::new();

        for finding in findings {
            match finding.bucket() {
                Bucket::Issue => issues.push(finding),
                Bucket::Warning => warnings.push(finding),
                Bucket::Passed => passed.push(finding),
                Bucket::Info => info.push(finding),
            }
        }

        let overall = if !issues.is_empty() {
            Overall::Critical
        } else if !warnings.is_empty() {
            Overall::Degraded
        } else {
            Overall::Healthy
        };

        let text = match overall {
            Overall::Critical => format!(
                "{} has {} issue(s) needing attention and {} warning(s)",
                domain,
                issues.len(),
                warnings.len()
            ),
            Overall::Degraded => format!("{} works but has {} warning(s)", domain, warnings.len()),
            Overall::Healthy => format!("{} passed all {} checks", domain, passed.len()),
        };

        let summary = HealthSummary {
            issues: issues.len(),
            warnings: warnings.len(),
            passed: passed.len(),
            info: info.len(),
            overall,
            text,
        };

        Self {
            domain: domain.to_string(),
            issues,
            warnings,
            passed,
            info,
            summary,
            checked_at,
            cached: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthOptions {
    #[serde(default = "default_true")]
    pub include_whois: bool,
    #[serde(default)]
    pub fresh: bool,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            include_whois: true,
            fresh: false,
        }
    }
}

fn default_true() -> bool {
    true
}

pub struct HealthChecker {
    dns: Arc<DnsService>,
    whois: WhoisClient,
    reports: CacheService<HealthReport>,
    expiry_warning_days: i64,
}

impl HealthChecker {
    pub fn new(config: Arc<Config>, dns: Arc<DnsService>, whois: WhoisClient) -> Self {
        Self {
            dns,
            whois,
            expiry_warning_days: config.expiry_warning_days,
            reports: CacheService::new(config, "health"),
        }
    }

    /// Run every check for an already normalized domain. Lookup failures
    /// become findings, so this never fails as a whole.
    pub async fn check(&self, domain: &str, options: HealthOptions) -> HealthReport {
        let key = cache_key(domain, options.include_whois);
        if !options.fresh {
            if let Some(report) = self.reports.get(&key).await {
                return report;
            }
        }

        debug!("Running health checks for {}", domain);
        let whois_lookup = async {
            if options.include_whois {
                Some(self.whois.lookup_with_options(domain, options.fresh).await)
            } else {
                None
            }
        };

        let (a, aaaa, ns, soa, txt, whois) = tokio::join!(
            self.dns.resolve(domain, RecordType::A),
            self.dns.resolve(domain, RecordType::AAAA),
            self.dns.resolve(domain, RecordType::NS),
            self.dns.resolve(domain, RecordType::SOA),
            self.dns.resolve(domain, RecordType::TXT),
            whois_lookup,
        );

        let mut findings = vec![
            a_finding(&a),
            aaaa_finding(&aaaa),
            ns_finding(&ns),
            soa_finding(&soa),
            spf_finding(&txt),
        ];
        if let Some(whois) = whois {
            findings.push(whois_finding(&whois, self.expiry_warning_days));
        }

        let report = HealthReport::from_findings(domain, findings, chrono::Utc::now().to_rfc3339());
        info!("Health check for {}: {}", domain, report.summary.text);

        self.reports.set(&key, &report).await;
        report
    }
}

fn cache_key(domain: &str, include_whois: bool) -> String {
    if include_whois {
        domain.to_string()
    } else {
        format!("{}#dns-only", domain)
    }
}

pub fn a_finding(result: &Result<DnsAnswer, ToolkitError>) -> Finding {
    let answer = match result {
        Ok(answer) => answer,
        Err(e) => return Finding::unavailable("A", e),
    };

    match answer.status {
        RCODE_NXDOMAIN => Finding::new("A", "domain not resolving (NXDOMAIN)", None),
        RCODE_SERVFAIL => Finding::new("A", "domain not resolving (SERVFAIL)", None),
        _ if answer.records.is_empty() => Finding::new("A", "A records missing", None),
        _ => Finding::new(
            "A",
            format!("A records resolving ({})", answer.records.len()),
            Some(answer.values().join(", ")),
        ),
    }
}

pub fn aaaa_finding(result: &Result<DnsAnswer, ToolkitError>) -> Finding {
    match result {
        Err(e) => Finding::unavailable("AAAA", e),
        Ok(answer) if answer.records.is_empty() => Finding::new("AAAA", "AAAA records missing (no IPv6)", None),
        Ok(answer) => Finding::new(
            "AAAA",
            format!("AAAA records present ({})", answer.records.len()),
            Some(answer.values().join(", ")),
        ),
    }
}

pub fn ns_finding(result: &Result<DnsAnswer, ToolkitError>) -> Finding {
    let answer = match result {
        Ok(answer) => answer,
        Err(e) => return Finding::unavailable("NS", e),
    };

    let nameservers = answer.values();
    match nameservers.len() {
        0 => Finding::new("NS", "no nameservers found", None),
        1 => Finding::new("NS", "only one nameserver delegated", Some(nameservers.join(", "))),
        n => Finding::new("NS", format!("nameservers delegated ({})", n), Some(nameservers.join(", "))),
    }
}

pub fn soa_finding(result: &Result<DnsAnswer, ToolkitError>) -> Finding {
    match result {
        Err(e) => Finding::unavailable("SOA", e),
        Ok(answer) if answer.records.is_empty() => Finding::new("SOA", "SOA record missing", None),
        Ok(answer) => Finding::new("SOA", "SOA record present", answer.values().into_iter().next()),
    }
}

/// SPF verdict from the domain's TXT answer.
pub fn spf_finding(result: &Result<DnsAnswer, ToolkitError>) -> Finding {
    let answer = match result {
        Ok(answer) => answer,
        Err(e) => return Finding::unavailable("SPF", e),
    };

    let spf: Vec<String> = answer
        .values()
        .into_iter()
        .filter(|txt| txt.trim().to_lowercase().starts_with("v=spf1"))
        .collect();

    match spf.as_slice() {
        [] => Finding::new("SPF", "SPF record missing", None),
        [record] => {
            let record_lower = record.to_lowercase();
            let mechanisms: Vec<&str> = record_lower.split_whitespace().collect();
            let message = if mechanisms.iter().any(|m| *m == "+all" || *m == "all") {
                "SPF permits all senders"
            } else if mechanisms.contains(&"?all") {
                "SPF policy neutral"
            } else {
                "SPF record present"
            };
            Finding::new("SPF", message, Some(record.clone()))
        }
        records => Finding::new(
            "SPF",
            format!("multiple SPF records ({})", records.len()),
            Some(records.join(" | ")),
        ),
    }
}

pub fn whois_finding(result: &Result<WhoisResponse, ToolkitError>, expiry_warning_days: i64) -> Finding {
    let response = match result {
        Ok(response) => response,
        Err(e) => return Finding::new("WHOIS", "whois unavailable", Some(e.to_string())),
    };

    let parsed = &response.parsed_data;
    let holds = parsed.hold_statuses();
    if !holds.is_empty() {
        return Finding::new("WHOIS", format!("registry hold status ({})", holds.join(", ")), None);
    }

    let expiration = parsed.expiration_date.clone();
    match parsed.expires_in {
        Some(days) if days < 0 => Finding::new("WHOIS", format!("registration expired {} days ago", -days), expiration),
        Some(days) if days <= expiry_warning_days => {
            Finding::new("WHOIS", format!("registration expires in {} days", days), expiration)
        }
        Some(days) => Finding::new("WHOIS", format!("registration valid ({} days remaining)", days), expiration),
        None => Finding::new("WHOIS", "registration expiry not published", parsed.registrar.clone()),
    }
}
