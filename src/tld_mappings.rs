use once_cell::sync::Lazy;
use std::collections::HashMap;

// Whois servers for the TLDs support tickets mention most often; anything
// else goes through IANA discovery
static KNOWN_WHOIS_SERVERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Generic TLDs
        ("com", "whois.verisign-grs.com"),
        ("net", "whois.verisign-grs.com"),
        ("org", "whois.pir.org"),
        ("info", "whois.nic.info"),
        ("biz", "whois.nic.biz"),
        ("io", "whois.nic.io"),
        ("co", "whois.nic.co"),
        ("me", "whois.nic.me"),
        ("xyz", "whois.nic.xyz"),
        ("online", "whois.nic.online"),
        ("shop", "whois.nic.shop"),
        ("store", "whois.nic.store"),
        ("site", "whois.nic.site"),
        ("app", "whois.nic.google"),
        ("dev", "whois.nic.google"),
        ("tech", "whois.nic.tech"),
        // Country code TLDs
        ("uk", "whois.nic.uk"),
        ("co.uk", "whois.nic.uk"),
        ("org.uk", "whois.nic.uk"),
        ("de", "whois.denic.de"),
        ("fr", "whois.nic.fr"),
        ("nl", "whois.domain-registry.nl"),
        ("be", "whois.dns.be"),
        ("ch", "whois.nic.ch"),
        ("at", "whois.nic.at"),
        ("se", "whois.iis.se"),
        ("no", "whois.norid.no"),
        ("dk", "whois.punktum.dk"),
        ("fi", "whois.fi"),
        ("pl", "whois.dns.pl"),
        ("it", "whois.nic.it"),
        ("es", "whois.nic.es"),
        ("ca", "whois.cira.ca"),
        ("us", "whois.nic.us"),
        ("au", "whois.auda.org.au"),
        ("com.au", "whois.auda.org.au"),
        ("nz", "whois.irs.net.nz"),
        ("co.nz", "whois.irs.net.nz"),
        ("jp", "whois.jprs.jp"),
        ("in", "whois.registry.in"),
        ("br", "whois.registro.br"),
        ("com.br", "whois.registro.br"),
    ])
});

pub fn known_whois_server(tld: &str) -> Option<&'static str> {
    KNOWN_WHOIS_SERVERS.get(tld).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_servers() {
        assert_eq!(known_whois_server("com"), Some("whois.verisign-grs.com"));
        assert_eq!(known_whois_server("co.uk"), Some("whois.nic.uk"));
        assert_eq!(known_whois_server("example"), None);
    }
}
