use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fields pulled out of a raw whois reply, plus day counts relative to now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedWhoisData {
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub updated_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub registrant_name: Option<String>,
    pub registrant_email: Option<String>,
    pub admin_email: Option<String>,
    pub tech_email: Option<String>,
    pub created_ago: Option<i64>,  // Days since creation
    pub updated_ago: Option<i64>,  // Days since last update
    pub expires_in: Option<i64>,   // Days until expiration (negative if expired)
}

impl ParsedWhoisData {
    /// Status codes that take a domain out of the DNS.
    pub fn hold_statuses(&self) -> Vec<&str> {
        self.status
            .iter()
            .map(|s| s.as_str())
            .filter(|s| s.to_lowercase().contains("hold"))
            .collect()
    }
}

pub struct WhoisParser;

impl Default for WhoisParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoisParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, data: &str) -> ParsedWhoisData {
        self.parse_at(data, Utc::now())
    }

    pub fn parse_at(&self, data: &str, now: DateTime<Utc>) -> ParsedWhoisData {
        let mut parsed = ParsedWhoisData::default();

        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if value.is_empty() {
                continue;
            }

            // Order matters: "Registrar Registration Expiration Date" must land on expiry
            match key.as_str() {
                k if k.contains("expir") || k.contains("paid-till") => {
                    set_once(&mut parsed.expiration_date, value);
                }
                k if k.contains("creation") || k.contains("created") || k == "registered" => {
                    set_once(&mut parsed.creation_date, value);
                }
                k if k.contains("updated") || k.contains("modified") || k.contains("changed") => {
                    set_once(&mut parsed.updated_date, value);
                }
                k if k.contains("registrar") && !k.contains("whois") && !k.contains("url") && !k.contains("abuse") && !k.contains("registration") && !k.contains("iana") => {
                    set_once(&mut parsed.registrar, value);
                }
                k if k.contains("name server") || k == "nserver" || k == "ns" => {
                    // "ns1.example.com 192.0.2.1" -> hostname only
                    let server = value.split_whitespace().next().unwrap_or(value).trim_end_matches('.').to_lowercase();
                    push_unique(&mut parsed.name_servers, server);
                }
                k if k.contains("status") || k == "state" => {
                    // "clientTransferProhibited https://icann.org/epp#clientTransferProhibited"
                    let status = value.split_whitespace().next().unwrap_or(value).to_string();
                    push_unique(&mut parsed.status, status);
                }
                k if k.starts_with("registrant") && k.contains("email") => {
                    set_unredacted(&mut parsed.registrant_email, value);
                }
                k if k.starts_with("registrant") && (k.contains("name") || k.contains("organization") || k == "registrant") => {
                    set_unredacted(&mut parsed.registrant_name, value);
                }
                k if k.contains("admin") && k.contains("email") => {
                    set_unredacted(&mut parsed.admin_email, value);
                }
                k if k.contains("tech") && k.contains("email") => {
                    set_unredacted(&mut parsed.tech_email, value);
                }
                _ => {}
            }
        }

        parsed.created_ago = parsed.creation_date.as_deref().and_then(parse_date).map(|dt| (now - dt).num_days());
        parsed.updated_ago = parsed.updated_date.as_deref().and_then(parse_date).map(|dt| (now - dt).num_days());
        parsed.expires_in = parsed.expiration_date.as_deref().and_then(parse_date).map(|dt| (dt - now).num_days());

        parsed
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn set_unredacted(slot: &mut Option<String>, value: &str) {
    let lowered = value.to_lowercase();
    if lowered.contains("redacted") || lowered.contains("select request") {
        return;
    }
    set_once(slot, value);
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Parse the date formats registries actually use.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let zoned_formats = [
        "%Y-%m-%dT%H:%M:%S%z",             // 2025-05-18T13:36:06+0000
        "%Y-%m-%d %H:%M:%S%z",             // 2025-05-18 13:36:06+0000
    ];
    for format in &zoned_formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive_formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ",           // 2025-05-18T13:36:06.0Z
        "%Y-%m-%dT%H:%M:%SZ",              // 2025-05-18T13:36:06Z
        "%Y-%m-%d %H:%M:%S",               // 2025-05-18 13:36:06
        "%Y-%m-%dT%H:%M:%S",               // 2025-05-18T13:36:06
    ];
    for format in &naive_formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
        }
    }

    let date_only_formats = [
        "%Y-%m-%d",
        "%d-%b-%Y",
        "%d %b %Y",
        "%Y/%m/%d",
        "%Y.%m.%d",
        "%d.%m.%Y",
    ];
    // Some registries append a time or zone after the date ("2025-05-18 (UTC)")
    let first_token = date_str.split_whitespace().next().unwrap_or(date_str);
    for candidate in [date_str, first_token] {
        for format in &date_only_formats {
            if let Ok(naive_date) = chrono::NaiveDate::parse_from_str(candidate, format) {
                if let Some(naive_dt) = naive_date.and_hms_opt(0, 0, 0) {
                    return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
                }
            }
        }
    }

    debug!("Failed to parse date: {}", date_str);
    None
}
