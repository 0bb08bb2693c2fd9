//! Operator input handling: domain normalization, query detection and
//! extraction of hostnames and addresses from pasted ticket text.

use crate::errors::ToolkitError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use url::Url;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]\b")
        .expect("hostname regex is valid")
});

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 regex is valid")
});

// Suffixes that look like TLDs in ticket text but are almost always file names
const FILE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "txt", "log", "pdf", "doc", "docx", "xls", "xlsx",
    "csv", "zip", "exe", "html", "htm", "php", "js", "css", "json", "xml",
];

/// What the operator typed into the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryKind {
    Ip(IpAddr),
    Domain(String),
    Ticket(String),
}

impl QueryKind {
    pub fn detect(raw: &str) -> Result<Self, ToolkitError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ToolkitError::InvalidInput("Empty input".to_string()));
        }

        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(QueryKind::Ip(ip));
        }

        if !trimmed.contains(char::is_whitespace) {
            if let Ok(domain) = normalize_domain(trimmed) {
                return Ok(QueryKind::Domain(domain));
            }
        }

        Ok(QueryKind::Ticket(trimmed.to_string()))
    }
}

/// Turn whatever the operator pasted ("https://Example.com/login", "example.com.")
/// into a bare lowercase hostname, rejecting anything that is not one.
pub fn normalize_domain(raw: &str) -> Result<String, ToolkitError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ToolkitError::InvalidDomain("Empty domain".to_string()));
    }

    let host = if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|e| ToolkitError::InvalidDomain(format!("Unparseable URL: {}", e)))?;
        url.host_str()
            .ok_or_else(|| ToolkitError::InvalidDomain("URL has no host".to_string()))?
            .to_string()
    } else {
        // Drop any path, query or port the operator copied along
        let host = trimmed.split(['/', '?', '#']).next().unwrap_or("");
        host.split(':').next().unwrap_or("").to_string()
    };

    let lowered = host.to_lowercase();
    // Only one root dot is allowed; "example.com.." keeps an empty label
    let domain = lowered.strip_suffix('.').unwrap_or(&lowered).to_string();

    validate_domain(&domain)?;
    Ok(domain)
}

fn validate_domain(domain: &str) -> Result<(), ToolkitError> {
    if domain.is_empty() {
        return Err(ToolkitError::InvalidDomain("Empty domain".to_string()));
    }

    if domain.len() > MAX_DOMAIN_LEN {
        return Err(ToolkitError::InvalidDomain("Domain name too long".to_string()));
    }

    if !domain.contains('.') || domain.contains("..") || domain.starts_with('.') {
        return Err(ToolkitError::InvalidDomain(format!("Invalid domain format: {}", domain)));
    }

    if domain.parse::<Ipv4Addr>().is_ok() {
        return Err(ToolkitError::InvalidDomain(format!("{} is an IP address", domain)));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(ToolkitError::InvalidDomain(format!("Empty label in {}", domain)));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(ToolkitError::InvalidDomain(format!("Label too long: {}", label)));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ToolkitError::InvalidDomain(format!("Label may not start or end with '-': {}", label)));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ToolkitError::InvalidDomain(format!("Invalid characters in label: {}", label)));
        }
    }

    Ok(())
}

/// Hostnames mentioned in free text, in order of first appearance.
pub fn extract_domains(text: &str) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();

    for found in HOSTNAME_RE.find_iter(text) {
        let candidate = found.as_str().to_lowercase();

        let tld = candidate.rsplit('.').next().unwrap_or("");
        if FILE_EXTENSIONS.contains(&tld) {
            continue;
        }
        // Dotted quads also match the hostname pattern's shape
        if candidate.parse::<Ipv4Addr>().is_ok() {
            continue;
        }

        if let Ok(domain) = normalize_domain(&candidate) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    domains
}

/// IPv4 literals mentioned in free text, in order of first appearance.
pub fn extract_ips(text: &str) -> Vec<IpAddr> {
    let mut ips: Vec<IpAddr> = Vec::new();

    for found in IPV4_RE.find_iter(text) {
        if let Ok(ip) = found.as_str().parse::<Ipv4Addr>() {
            let ip = IpAddr::V4(ip);
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_scheme_path_and_port() {
        assert_eq!(normalize_domain("https://Example.COM/login?x=1").unwrap(), "example.com");
        assert_eq!(normalize_domain("http://shop.example.org:8080/").unwrap(), "shop.example.org");
        assert_eq!(normalize_domain("example.net/path").unwrap(), "example.net");
        assert_eq!(normalize_domain("  mail.example.io.  ").unwrap(), "mail.example.io");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        for bad in [
            "",
            "   ",
            "localhost",
            "a..b",
            ".example.com",
            "-bad.com",
            "exa_mple.com",
            "10.0.0.1",
            "example.com..",
            "https://example.com../login",
            ".",
        ] {
            assert!(
                matches!(normalize_domain(bad), Err(ToolkitError::InvalidDomain(_))),
                "expected {:?} to be rejected",
                bad
            );
        }

        let long_label = format!("{}.com", "a".repeat(64));
        assert!(normalize_domain(&long_label).is_err());
    }

    #[test]
    fn test_detect_query_kind() {
        assert_eq!(
            QueryKind::detect("8.8.8.8").unwrap(),
            QueryKind::Ip("8.8.8.8".parse().unwrap())
        );
        assert_eq!(
            QueryKind::detect("2606:4700:4700::1111").unwrap(),
            QueryKind::Ip("2606:4700:4700::1111".parse().unwrap())
        );
        assert_eq!(
            QueryKind::detect("https://example.com/").unwrap(),
            QueryKind::Domain("example.com".to_string())
        );
        assert!(matches!(
            QueryKind::detect("Customer says email to example.com bounces").unwrap(),
            QueryKind::Ticket(_)
        ));
        assert!(matches!(
            QueryKind::detect("hello").unwrap(),
            QueryKind::Ticket(_)
        ));
        assert!(matches!(QueryKind::detect("  "), Err(ToolkitError::InvalidInput(_))));
    }

    #[test]
    fn test_extract_domains_from_ticket() {
        let ticket = "Hi, mail from bob@Example.com to shop.example.org fails. \
                      Screenshot attached as error.png, server 192.168.1.10. Also example.com again.";
        assert_eq!(extract_domains(ticket), vec!["example.com", "shop.example.org"]);
    }

    #[test]
    fn test_extract_ips_from_ticket() {
        let ticket = "Pings to 203.0.113.7 time out, 203.0.113.7 again and 999.1.1.1 is junk, 10.0.0.2 ok";
        let ips = extract_ips(ticket);
        assert_eq!(ips, vec![
            "203.0.113.7".parse::<IpAddr>().unwrap(),
            "10.0.0.2".parse::<IpAddr>().unwrap(),
        ]);
    }
}
