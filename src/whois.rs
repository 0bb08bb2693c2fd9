//! Port-43 whois lookups with IANA server discovery and referral following.

use crate::{
    buffer_pool::BufferPool,
    cache::{CacheService, Cacheable},
    config::Config,
    errors::ToolkitError,
    parser::{ParsedWhoisData, WhoisParser},
    tld_mappings::known_whois_server,
};
use once_cell::sync::Lazy;
use publicsuffix::{List, Psl};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{RwLock, Semaphore},
    time::timeout,
};
use tracing::{debug, info, warn};

const WHOIS_PORT: u16 = 43;
const IANA_WHOIS: &str = "whois.iana.org";

static PSL: Lazy<List> = Lazy::new(List::new);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisResponse {
    pub domain: String,
    pub whois_server: String,
    pub raw_data: String,
    pub parsed_data: ParsedWhoisData,
    pub cached: bool,
    pub query_time_ms: u64,
}

impl Cacheable for WhoisResponse {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

pub struct WhoisService {
    config: Arc<Config>,
    tld_servers: RwLock<HashMap<String, String>>,
    domain_query_semaphore: Semaphore,  // For actual domain lookups
    discovery_semaphore: Semaphore,     // For TLD discovery (higher limit)
    buffer_pool: BufferPool,
    parser: WhoisParser,
}

impl WhoisService {
    pub fn new(config: Arc<Config>) -> Self {
        info!(
            "WhoisService initialized ({} concurrent queries, {} pooled buffers of {} bytes)",
            config.concurrent_whois_queries, config.buffer_pool_size, config.buffer_size
        );

        Self {
            tld_servers: RwLock::new(HashMap::new()),
            domain_query_semaphore: Semaphore::new(config.concurrent_whois_queries.max(1)),
            discovery_semaphore: Semaphore::new(config.concurrent_whois_queries.max(1) * 2),
            buffer_pool: BufferPool::new(config.buffer_size, config.buffer_pool_size),
            parser: WhoisParser::new(),
            config,
        }
    }

    /// Look up an already normalized domain such as "example.com".
    pub async fn lookup(&self, domain: &str) -> Result<WhoisResponse, ToolkitError> {
        let start_time = std::time::Instant::now();

        let tld = extract_tld(domain)?;
        let whois_server = self.find_whois_server(&tld).await?;

        let raw_data = self.raw_whois_query(&whois_server, domain).await?;
        let (final_server, final_data) = self.follow_referrals(&whois_server, raw_data, domain).await;

        let parsed_data = self.parser.parse(&final_data);

        Ok(WhoisResponse {
            domain: domain.to_string(),
            whois_server: final_server,
            raw_data: final_data,
            parsed_data,
            cached: false,
            query_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    async fn find_whois_server(&self, tld: &str) -> Result<String, ToolkitError> {
        if let Some(server) = known_whois_server(tld) {
            return Ok(server.to_string());
        }

        {
            let servers = self.tld_servers.read().await;
            if let Some(server) = servers.get(tld) {
                return Ok(server.clone());
            }
        }

        if let Some(server) = self.discover_whois_server(tld).await {
            self.tld_servers.write().await.insert(tld.to_string(), server.clone());
            return Ok(server);
        }

        Err(ToolkitError::UnsupportedTld(tld.to_string()))
    }

    async fn discover_whois_server(&self, tld: &str) -> Option<String> {
        debug!("Discovering whois server for TLD: {}", tld);

        // The root zone entry names the registry's server
        let root_tld = tld.rsplit('.').next().unwrap_or(tld);
        match self.discovery_whois_query(IANA_WHOIS, root_tld).await {
            Ok(response) => {
                if let Some(server) = extract_referral(&response) {
                    info!("Discovered whois server via IANA for {}: {}", tld, server);
                    return Some(server);
                }
                debug!("IANA has no whois server listed for {}", tld);
            }
            Err(e) => debug!("IANA query for {} failed: {}", tld, e),
        }

        for candidate in [format!("whois.nic.{}", root_tld), format!("whois.{}", root_tld)] {
            if self.test_whois_server(&candidate).await {
                info!("Discovered whois server via pattern for {}: {}", tld, candidate);
                return Some(candidate);
            }
        }

        warn!("Could not discover whois server for TLD: {}", tld);
        None
    }

    async fn test_whois_server(&self, server: &str) -> bool {
        let connect_timeout = Duration::from_secs(self.config.discovery_timeout_seconds.min(10));
        matches!(
            timeout(connect_timeout, TcpStream::connect((server, WHOIS_PORT))).await,
            Ok(Ok(_))
        )
    }

    async fn raw_whois_query(&self, server: &str, query: &str) -> Result<String, ToolkitError> {
        let _permit = self.domain_query_semaphore.acquire().await
            .map_err(|_| ToolkitError::Internal("Whois semaphore closed".to_string()))?;

        self.execute_whois_query(server, query).await
    }

    async fn discovery_whois_query(&self, server: &str, query: &str) -> Result<String, ToolkitError> {
        let _permit = self.discovery_semaphore.acquire().await
            .map_err(|_| ToolkitError::Internal("Discovery semaphore closed".to_string()))?;

        self.execute_whois_query(server, query).await
    }

    async fn execute_whois_query(&self, server: &str, query: &str) -> Result<String, ToolkitError> {
        let io_timeout = Duration::from_secs(self.config.whois_timeout_seconds);

        let mut stream = timeout(io_timeout, TcpStream::connect((server, WHOIS_PORT))).await??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        stream.write_all(format!("{}\r\n", query).as_bytes()).await?;

        let mut pooled_buffer = self.buffer_pool.checkout();
        let buffer = pooled_buffer.as_mut();
        let mut response = Vec::new();

        loop {
            let n = timeout(io_timeout, stream.read(buffer)).await??;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buffer[..n]);
            if response.len() > self.config.max_response_size {
                return Err(ToolkitError::ResponseTooLarge);
            }
        }

        // Latin-1 replies from older ccTLD registries are decoded lossily
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    async fn follow_referrals(&self, initial_server: &str, initial_data: String, domain: &str) -> (String, String) {
        let mut current_server = initial_server.to_string();
        let mut current_data = initial_data;

        for _ in 0..self.config.max_referrals {
            let Some(referral) = extract_referral(&current_data) else {
                break;
            };
            if referral.eq_ignore_ascii_case(&current_server) {
                break;
            }

            debug!("Following referral from {} to {}", current_server, referral);
            match self.raw_whois_query(&referral, domain).await {
                // Registrar servers sometimes answer with nothing useful; keep the registry data then
                Ok(data) if data.trim().is_empty() => break,
                Ok(data) => {
                    current_server = referral;
                    current_data = data;
                }
                Err(e) => {
                    warn!("Failed to query referral server {}: {}", referral, e);
                    break;
                }
            }
        }

        (current_server, current_data)
    }
}

/// Effective TLD ("co.uk" for "shop.example.co.uk") via the public suffix list.
pub fn extract_tld(domain: &str) -> Result<String, ToolkitError> {
    if let Some(suffix) = PSL.suffix(domain.as_bytes()) {
        if let Ok(tld) = std::str::from_utf8(suffix.as_bytes()) {
            return Ok(tld.to_string());
        }
    }

    warn!("Public suffix parsing failed for {}, using last label", domain);
    domain
        .rsplit('.')
        .next()
        .filter(|label| !label.is_empty())
        .map(|label| label.to_string())
        .ok_or_else(|| ToolkitError::InvalidDomain(format!("No TLD found in domain: {}", domain)))
}

/// Next whois server named in a reply ("whois:", "refer:" or "Registrar WHOIS Server:").
fn extract_referral(data: &str) -> Option<String> {
    for line in data.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if value.is_empty() {
            continue;
        }

        if key == "whois" || key == "refer" || (key.contains("whois") && key.contains("server")) {
            // Some registrars publish "whois://whois.example.net" or a URL
            let server = value
                .trim_start_matches("whois://")
                .trim_start_matches("http://")
                .trim_start_matches("https://")
                .trim_end_matches('/');
            if !server.is_empty() {
                return Some(server.to_lowercase());
            }
        }
    }
    None
}

/// Whois lookups through the shared per-domain cache.
#[derive(Clone)]
pub struct WhoisClient {
    service: Arc<WhoisService>,
    cache: Arc<CacheService<WhoisResponse>>,
}

impl WhoisClient {
    pub fn new(service: Arc<WhoisService>, cache: Arc<CacheService<WhoisResponse>>) -> Self {
        Self { service, cache }
    }

    /// Served from cache unless `fresh` is set; fresh results refill the cache.
    pub async fn lookup_with_options(&self, domain: &str, fresh: bool) -> Result<WhoisResponse, ToolkitError> {
        if !fresh {
            if let Some(cached) = self.cache.get(domain).await {
                return Ok(cached);
            }
        }

        let response = self.service.lookup(domain).await?;
        self.cache.set(domain, &response).await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tld() {
        assert_eq!(extract_tld("example.com").unwrap(), "com");
        assert_eq!(extract_tld("www.example.org").unwrap(), "org");
    }

    #[test]
    fn test_extract_referral_formats() {
        let iana = "% IANA WHOIS server\n\nrefer:        whois.nic.io\n\ndomain:       IO\n";
        assert_eq!(extract_referral(iana).as_deref(), Some("whois.nic.io"));

        let registry = "Domain Name: EXAMPLE.COM\nRegistrar WHOIS Server: whois://Whois.Registrar.Example\n";
        assert_eq!(extract_referral(registry).as_deref(), Some("whois.registrar.example"));

        let empty = "Registrar WHOIS Server:\nDomain Name: EXAMPLE.COM\n";
        assert_eq!(extract_referral(empty), None);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_real_whois_lookup() {
        let service = WhoisService::new(Arc::new(Config::load().unwrap()));
        let response = service.lookup("example.com").await.unwrap();
        assert!(response.raw_data.to_lowercase().contains("example.com"));
        assert!(!response.parsed_data.name_servers.is_empty());
    }
}
