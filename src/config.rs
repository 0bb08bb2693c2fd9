use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_DOH_URL: &str = "https://dns.google/resolve";
const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org";
const DEFAULT_GEO_URL: &str = "https://ipapi.co";
const DEFAULT_SSLLABS_URL: &str = "https://api.ssllabs.com/api/v3";
const DEFAULT_AI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_AI_MODELS: &str = "gemini-2.0-flash,gemini-1.5-flash,gemini-1.5-flash-8b";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub http_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub start_time: Instant,
    pub max_referrals: usize,
    pub discovery_timeout_seconds: u64,
    pub concurrent_whois_queries: usize,
    pub buffer_pool_size: usize,    // Max buffers in pool
    pub buffer_size: usize,         // Size of each buffer
    pub doh_url: String,
    pub public_ip_url: String,
    pub geo_url: String,
    pub ssllabs_url: String,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_models: Vec<String>,     // Tried in order; a failing model hands over to the next
    pub expiry_warning_days: i64,
    pub tls_port: u16,              // Port triage inspects certificates on
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigData {
    pub port: u16,
    pub http_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub max_referrals: usize,
    pub discovery_timeout_seconds: u64,
    pub concurrent_whois_queries: usize,
    pub buffer_pool_size: usize,
    pub buffer_size: usize,
    pub doh_url: String,
    pub public_ip_url: String,
    pub geo_url: String,
    pub ssllabs_url: String,
    pub ai_api_url: String,
    #[serde(default)]
    pub ai_api_key: Option<String>,
    pub ai_models: String,
    pub expiry_warning_days: i64,
    pub tls_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is the normal case outside development
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        // Get system information for intelligent defaults
        let system_info = Self::detect_system_capabilities();

        let mut settings = config::Config::builder()
            .set_default("port", Self::get_default_port())?
            .set_default("http_timeout_seconds", system_info.http_timeout)?
            .set_default("whois_timeout_seconds", system_info.default_timeout)?
            .set_default("max_response_size", system_info.max_response_size as i64)?
            .set_default("cache_ttl_seconds", system_info.cache_ttl)?
            .set_default("cache_max_entries", system_info.cache_max_entries)?
            .set_default("max_referrals", system_info.max_referrals as i64)?
            .set_default("discovery_timeout_seconds", system_info.discovery_timeout)?
            .set_default("concurrent_whois_queries", system_info.concurrent_whois_queries as i64)?
            .set_default("buffer_pool_size", system_info.buffer_pool_size as i64)?
            .set_default("buffer_size", system_info.buffer_size as i64)?
            .set_default("doh_url", DEFAULT_DOH_URL)?
            .set_default("public_ip_url", DEFAULT_PUBLIC_IP_URL)?
            .set_default("geo_url", DEFAULT_GEO_URL)?
            .set_default("ssllabs_url", DEFAULT_SSLLABS_URL)?
            .set_default("ai_api_url", DEFAULT_AI_API_URL)?
            .set_default("ai_models", DEFAULT_AI_MODELS)?
            .set_default("expiry_warning_days", 30)?
            .set_default("tls_port", 443)?;

        // Override with environment variables if present
        settings = Self::apply_env_overrides(settings)?;

        let config_data: ConfigData = settings.build()?.try_deserialize()?;

        Ok(Config {
            port: config_data.port,
            http_timeout_seconds: config_data.http_timeout_seconds,
            whois_timeout_seconds: config_data.whois_timeout_seconds,
            max_response_size: config_data.max_response_size,
            cache_ttl_seconds: config_data.cache_ttl_seconds,
            cache_max_entries: config_data.cache_max_entries,
            max_referrals: config_data.max_referrals,
            discovery_timeout_seconds: config_data.discovery_timeout_seconds,
            concurrent_whois_queries: config_data.concurrent_whois_queries,
            buffer_pool_size: config_data.buffer_pool_size,
            buffer_size: config_data.buffer_size,
            doh_url: trim_base_url(&config_data.doh_url),
            public_ip_url: trim_base_url(&config_data.public_ip_url),
            geo_url: trim_base_url(&config_data.geo_url),
            ssllabs_url: trim_base_url(&config_data.ssllabs_url),
            ai_api_url: trim_base_url(&config_data.ai_api_url),
            ai_api_key: config_data.ai_api_key.filter(|key| !key.trim().is_empty()),
            ai_models: parse_model_list(&config_data.ai_models),
            expiry_warning_days: config_data.expiry_warning_days,
            tls_port: config_data.tls_port,
            start_time: Instant::now(),
        })
    }

    fn detect_system_capabilities() -> SystemCapabilities {
        let available_memory = Self::get_available_memory();
        let cpu_cores = Self::get_cpu_cores();
        let is_production = Self::is_production_environment();
        let tier = Self::memory_tier(available_memory);

        SystemCapabilities {
            http_timeout: if is_production { 20 } else { 10 },
            default_timeout: if is_production { 30 } else { 15 },
            max_response_size: Self::calculate_max_response_size(available_memory),
            cache_ttl: if is_production { 900 } else { 300 }, // diagnostics go stale quickly
            cache_max_entries: [500, 2000, 5000][tier],
            max_referrals: if is_production { 10 } else { 5 },
            discovery_timeout: if is_production { 20 } else { 10 },
            concurrent_whois_queries: cpu_cores.min(8), // Cap at 8 for network sanity
            buffer_pool_size: [10, 25, 50][tier],
            buffer_size: [4096, 8192, 16384][tier],
        }
    }

    fn get_available_memory() -> u64 {
        #[cfg(target_os = "linux")]
        {
            if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
                for line in meminfo.lines() {
                    if line.starts_with("MemAvailable:") {
                        if let Some(kb) = line.split_whitespace().nth(1) {
                            if let Ok(kb_val) = kb.parse::<u64>() {
                                return kb_val * 1024; // Convert to bytes
                            }
                        }
                    }
                }
            }
        }

        // Default fallback: assume 4GB
        4 * 1024 * 1024 * 1024
    }

    fn get_cpu_cores() -> usize {
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
    }

    fn is_production_environment() -> bool {
        std::env::var("ENVIRONMENT")
            .or_else(|_| std::env::var("ENV"))
            .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
            .unwrap_or(false)
    }

    fn calculate_max_response_size(available_memory: u64) -> usize {
        // 0.1% of available memory, capped between 1MB and 10MB
        let calculated = (available_memory as f64 * 0.001) as usize;
        calculated.clamp(1024 * 1024, 10 * 1024 * 1024)
    }

    /// Sizing tier: up to 2 GB, up to 8 GB, or more.
    fn memory_tier(available_memory: u64) -> usize {
        match available_memory / (1024 * 1024 * 1024) {
            0..=2 => 0,
            3..=8 => 1,
            _ => 2,
        }
    }

    fn get_default_port() -> u16 {
        std::env::var("PORT")
            .or_else(|_| std::env::var("HTTP_PORT"))
            .or_else(|_| std::env::var("SERVER_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8501)
    }

    fn apply_env_overrides(mut settings: config::ConfigBuilder<config::builder::DefaultState>) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        // Later entries win when several aliases are set
        let env_mappings = [
            ("PORT", "port"),
            ("HTTP_TIMEOUT_SECONDS", "http_timeout_seconds"),
            ("HTTP_TIMEOUT", "http_timeout_seconds"),
            ("WHOIS_TIMEOUT_SECONDS", "whois_timeout_seconds"),
            ("WHOIS_TIMEOUT", "whois_timeout_seconds"),
            ("MAX_RESPONSE_SIZE", "max_response_size"),
            ("CACHE_TTL_SECONDS", "cache_ttl_seconds"),
            ("CACHE_TTL", "cache_ttl_seconds"),
            ("CACHE_MAX_ENTRIES", "cache_max_entries"),
            ("CACHE_SIZE", "cache_max_entries"),
            ("MAX_REFERRALS", "max_referrals"),
            ("DISCOVERY_TIMEOUT_SECONDS", "discovery_timeout_seconds"),
            ("CONCURRENT_WHOIS_QUERIES", "concurrent_whois_queries"),
            ("BUFFER_POOL_SIZE", "buffer_pool_size"),
            ("BUFFER_SIZE", "buffer_size"),
            ("DOH_URL", "doh_url"),
            ("PUBLIC_IP_URL", "public_ip_url"),
            ("GEO_URL", "geo_url"),
            ("SSLLABS_URL", "ssllabs_url"),
            ("AI_API_URL", "ai_api_url"),
            ("AI_API_KEY", "ai_api_key"),
            ("GOOGLE_API_KEY", "ai_api_key"),
            ("GEMINI_API_KEY", "ai_api_key"),
            ("AI_MODELS", "ai_models"),
            ("EXPIRY_WARNING_DAYS", "expiry_warning_days"),
            ("TLS_PORT", "tls_port"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_model_list(models: &str) -> Vec<String> {
    models
        .split(',')
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(|m| m.to_string())
        .collect()
}

struct SystemCapabilities {
    http_timeout: u64,
    default_timeout: u64,
    max_response_size: usize,
    cache_ttl: u64,
    cache_max_entries: u64,
    max_referrals: usize,
    discovery_timeout: u64,
    concurrent_whois_queries: usize,
    buffer_pool_size: usize,
    buffer_size: usize,
}
