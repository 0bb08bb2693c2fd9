//! Static troubleshooting articles matched against ticket text by keyword.

use crate::classifier::TicketCategory;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: &'static str,
    pub title: &'static str,
    pub category: TicketCategory,
    pub keywords: &'static [&'static str],
    pub steps: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleMatch {
    pub article: &'static Article,
    pub matched_keywords: Vec<&'static str>,
}

static ARTICLES: &[Article] = &[
    Article {
        id: "dns-not-resolving",
        title: "Domain does not resolve",
        category: TicketCategory::Dns,
        keywords: &["not resolving", "nxdomain", "dns", "can't find server", "server not found", "dns_probe"],
        steps: &[
            "Run the Domain Check and confirm whether A records are returned",
            "Compare the delegated nameservers with the ones the customer expects",
            "Check WHOIS for an expired registration or a hold status",
            "If records were changed recently, allow for the previous TTL to expire",
        ],
    },
    Article {
        id: "propagation",
        title: "Recent DNS change not visible yet",
        category: TicketCategory::Dns,
        keywords: &["propagat", "changed nameservers", "updated dns", "ttl", "old server", "still pointing"],
        steps: &[
            "Look up the record through DNS-over-HTTPS to see what public resolvers return",
            "Note the TTL on the old record; resolvers may cache it that long",
            "Ask the customer to flush their local DNS cache",
        ],
    },
    Article {
        id: "email-delivery",
        title: "Email bounces or lands in spam",
        category: TicketCategory::Email,
        keywords: &["email", "mail", "bounce", "spam", "smtp", "mx", "undeliver", "550"],
        steps: &[
            "Confirm MX records exist and point at the intended mail provider",
            "Check there is exactly one SPF record and that it includes the sending service",
            "Ask for the full bounce message including the remote server's reply code",
        ],
    },
    Article {
        id: "spf-dkim-dmarc",
        title: "SPF, DKIM or DMARC failures",
        category: TicketCategory::Email,
        keywords: &["spf", "dkim", "dmarc", "spoof", "authentication failed", "softfail"],
        steps: &[
            "Run the domain health check and review the SPF finding",
            "Merge multiple SPF records into one; more than one is a permanent error",
            "Verify the DKIM selector TXT record published by the mail provider",
        ],
    },
    Article {
        id: "ssl-expired",
        title: "Certificate expired or not trusted",
        category: TicketCategory::Ssl,
        keywords: &["ssl", "tls", "certificate", "https", "not secure", "expired cert", "err_cert", "privacy error"],
        steps: &[
            "Run the SSL check and note days remaining and issuer",
            "If the hostname does not match, check which names the certificate covers",
            "Confirm the full chain is served, not only the leaf certificate",
        ],
    },
    Article {
        id: "connectivity",
        title: "Site unreachable or timing out",
        category: TicketCategory::Connectivity,
        keywords: &["timeout", "timed out", "unreachable", "connection refused", "can't connect", "cannot connect", "slow", "down"],
        steps: &[
            "Check whether the domain resolves and to which addresses",
            "Geolocate the addresses to confirm they belong to the expected host",
            "Ask for the customer's public IP and location to rule out regional blocks",
        ],
    },
    Article {
        id: "domain-expired",
        title: "Domain registration expired or suspended",
        category: TicketCategory::DomainRegistration,
        keywords: &["expired domain", "renew", "registrar", "suspended", "parked", "whois", "transfer"],
        steps: &[
            "Look up WHOIS and check the expiry date and status codes",
            "A clientHold or serverHold status removes the domain from DNS",
            "Direct the customer to their registrar to renew or lift the hold",
        ],
    },
    Article {
        id: "website-errors",
        title: "Website shows errors",
        category: TicketCategory::Website,
        keywords: &["500", "502", "503", "404", "website", "page", "wordpress", "blank page"],
        steps: &[
            "Confirm the domain resolves to the hosting provider's addresses",
            "Check the certificate if the browser shows a security warning first",
            "Collect the exact URL and time of the error for escalation",
        ],
    },
    Article {
        id: "account-access",
        title: "Login or account access problems",
        category: TicketCategory::Account,
        keywords: &["password", "login", "log in", "locked out", "2fa", "account", "reset"],
        steps: &[
            "Verify the customer's identity before discussing account details",
            "Trigger a password reset from the admin console",
            "Escalate if two-factor recovery codes are lost",
        ],
    },
];

pub fn articles() -> &'static [Article] {
    ARTICLES
}

/// Articles with at least one keyword occurring in `query`, most keywords first.
pub fn search(query: &str) -> Vec<ArticleMatch> {
    let query = query.to_lowercase();

    let mut matches: Vec<ArticleMatch> = ARTICLES
        .iter()
        .filter_map(|article| {
            let matched_keywords: Vec<&'static str> = article
                .keywords
                .iter()
                .copied()
                .filter(|keyword| query.contains(keyword))
                .collect();
            if matched_keywords.is_empty() {
                None
            } else {
                Some(ArticleMatch { article, matched_keywords })
            }
        })
        .collect();

    // Stable sort keeps table order for ties
    matches.sort_by(|a, b| b.matched_keywords.len().cmp(&a.matched_keywords.len()));
    matches
}

pub fn for_category(category: TicketCategory) -> Vec<&'static Article> {
    ARTICLES.iter().filter(|article| article.category == category).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_ranks_by_keyword_hits() {
        let results = search("Our SPF and DKIM checks fail and mail bounces");
        let ids: Vec<&str> = results.iter().map(|m| m.article.id).collect();
        // spf-dkim-dmarc matches "spf" + "dkim"; email-delivery matches "mail" + "bounce"
        assert_eq!(ids[..2], ["email-delivery", "spf-dkim-dmarc"]);
        assert_eq!(results[1].matched_keywords, vec!["spf", "dkim"]);
    }

    #[test]
    fn test_search_is_case_insensitive_and_empty_for_noise() {
        assert_eq!(search("CERTIFICATE warning")[0].article.id, "ssl-expired");
        assert!(search("hello there").is_empty());
    }

    #[test]
    fn test_every_category_with_articles() {
        assert_eq!(for_category(TicketCategory::Dns).len(), 2);
        assert!(for_category(TicketCategory::Other).is_empty());
        assert!(articles().iter().all(|a| !a.keywords.is_empty() && !a.steps.is_empty()));
    }
}
