//! DNS-over-HTTPS lookups against a JSON resolver API (dns.google style).

use crate::{config::Config, errors::ToolkitError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Record types offered by the DNS Records tool when none are requested.
pub const DEFAULT_RECORD_TYPES: [RecordType; 5] = [
    RecordType::A,
    RecordType::MX,
    RecordType::TXT,
    RecordType::NS,
    RecordType::CNAME,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    MX,
    TXT,
    NS,
    CNAME,
    SOA,
}

impl RecordType {
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::SOA => "SOA",
        }
    }

    /// Parse a comma separated list such as "a, mx,TXT".
    pub fn parse_list(list: &str) -> Result<Vec<RecordType>, ToolkitError> {
        let mut types = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let record_type = item.parse::<RecordType>()?;
            if !types.contains(&record_type) {
                types.push(record_type);
            }
        }
        Ok(types)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "MX" => Ok(RecordType::MX),
            "TXT" => Ok(RecordType::TXT),
            "NS" => Ok(RecordType::NS),
            "CNAME" => Ok(RecordType::CNAME),
            "SOA" => Ok(RecordType::SOA),
            other => Err(ToolkitError::InvalidInput(format!("Unsupported record type: {}", other))),
        }
    }
}

/// DNS response code name for the numeric `Status` field.
pub fn rcode_name(status: u32) -> &'static str {
    match status {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    #[serde(rename = "TTL", default)]
    ttl: u32,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    pub data: String,
    pub ttl: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub domain: String,
    pub record_type: RecordType,
    pub status: u32,
    pub status_name: String,
    pub records: Vec<DnsRecord>,
}

impl DnsAnswer {
    pub fn is_noerror(&self) -> bool {
        self.status == 0
    }

    pub fn values(&self) -> Vec<String> {
        self.records.iter().map(|r| r.data.clone()).collect()
    }
}

/// Result of the "Domain Check" tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: String,
    pub resolving: bool,
    pub status: String,
    pub addresses: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    pub record_type: RecordType,
    pub records: Vec<String>,
}

/// Result of the "DNS Records" tool. Only types with answers are listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecordsReport {
    pub domain: String,
    pub record_sets: Vec<RecordSet>,
    pub message: Option<String>,
}

pub struct DnsService {
    client: reqwest::Client,
    doh_url: String,
}

impl DnsService {
    pub fn new(config: Arc<Config>) -> Result<Self, ToolkitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .user_agent(concat!("support-toolkit/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            doh_url: config.doh_url.clone(),
        })
    }

    pub async fn resolve(&self, domain: &str, record_type: RecordType) -> Result<DnsAnswer, ToolkitError> {
        debug!("DoH {} lookup for {}", record_type, domain);

        let response = self.client
            .get(&self.doh_url)
            .query(&[("name", domain), ("type", record_type.as_str())])
            .header("Accept", "application/dns-json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolkitError::Upstream {
                service: "DNS-over-HTTPS resolver".to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: DohResponse = response.json().await?;
        let records = body.answer
            .into_iter()
            .filter(|answer| answer.record_type == record_type.code())
            .map(|answer| DnsRecord {
                data: clean_record_data(record_type, &answer.data),
                ttl: answer.ttl,
            })
            .collect::<Vec<_>>();

        debug!("DoH found {} {} records for {} (status {})", records.len(), record_type, domain, body.status);

        Ok(DnsAnswer {
            domain: domain.to_string(),
            record_type,
            status: body.status,
            status_name: rcode_name(body.status).to_string(),
            records,
        })
    }

    pub async fn domain_status(&self, domain: &str) -> Result<DomainStatus, ToolkitError> {
        let answer = self.resolve(domain, RecordType::A).await?;

        let status = if answer.is_noerror() {
            DomainStatus {
                domain: domain.to_string(),
                resolving: true,
                status: answer.status_name.clone(),
                addresses: answer.values(),
                message: format!("Domain {} is active and resolving", domain),
            }
        } else {
            DomainStatus {
                domain: domain.to_string(),
                resolving: false,
                status: answer.status_name.clone(),
                addresses: Vec::new(),
                message: format!("Domain {} not found or not resolving ({})", domain, answer.status_name),
            }
        };

        Ok(status)
    }

    pub async fn lookup_records(&self, domain: &str, types: &[RecordType]) -> DnsRecordsReport {
        let types: &[RecordType] = if types.is_empty() { &DEFAULT_RECORD_TYPES } else { types };
        let mut record_sets = Vec::new();

        for record_type in types {
            match self.resolve(domain, *record_type).await {
                Ok(answer) if !answer.records.is_empty() => {
                    record_sets.push(RecordSet {
                        record_type: *record_type,
                        records: answer.values(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{} lookup for {} failed: {}", record_type, domain, e);
                    continue;
                }
            }
        }

        let message = if record_sets.is_empty() {
            Some("No records found".to_string())
        } else {
            None
        };

        DnsRecordsReport {
            domain: domain.to_string(),
            record_sets,
            message,
        }
    }
}

fn clean_record_data(record_type: RecordType, data: &str) -> String {
    let data = data.trim();
    match record_type {
        RecordType::TXT => unquote_txt(data),
        RecordType::NS | RecordType::CNAME => data.trim_end_matches('.').to_string(),
        RecordType::MX => {
            // "10 mx.example.com."
            match data.split_once(' ') {
                Some((preference, host)) => format!("{} {}", preference, host.trim().trim_end_matches('.')),
                None => data.trim_end_matches('.').to_string(),
            }
        }
        _ => data.to_string(),
    }
}

/// TXT data arrives as one or more quoted character strings: "\"v=spf1 \" \"-all\"".
fn unquote_txt(data: &str) -> String {
    if !data.starts_with('"') {
        return data.to_string();
    }

    let mut out = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in data.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert_eq!(
            RecordType::parse_list("a, mx,A ,txt").unwrap(),
            vec![RecordType::A, RecordType::MX, RecordType::TXT]
        );
        assert!(matches!(
            RecordType::parse_list("A,PTR"),
            Err(ToolkitError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_txt_unquoting() {
        assert_eq!(unquote_txt("\"v=spf1 include:_spf.example.com ~all\""), "v=spf1 include:_spf.example.com ~all");
        assert_eq!(unquote_txt("\"v=spf1 ip4:192.0.2.1 \" \"-all\""), "v=spf1 ip4:192.0.2.1 -all");
        assert_eq!(unquote_txt("\"say \\\"hi\\\"\""), "say \"hi\"");
        assert_eq!(unquote_txt("google-site-verification=abc"), "google-site-verification=abc");
    }

    #[test]
    fn test_record_data_cleanup() {
        assert_eq!(clean_record_data(RecordType::NS, "ns1.example.com."), "ns1.example.com");
        assert_eq!(clean_record_data(RecordType::MX, "10 mx.example.com."), "10 mx.example.com");
        assert_eq!(clean_record_data(RecordType::A, "93.184.216.34"), "93.184.216.34");
    }

    #[test]
    fn test_rcode_names() {
        assert_eq!(rcode_name(0), "NOERROR");
        assert_eq!(rcode_name(3), "NXDOMAIN");
        assert_eq!(rcode_name(42), "UNKNOWN");
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_resolve_real_domain() {
        let service = DnsService::new(Arc::new(Config::load().unwrap())).unwrap();
        let answer = service.resolve("example.com", RecordType::A).await.unwrap();
        assert!(answer.is_noerror());
        assert!(!answer.records.is_empty());
    }
}
