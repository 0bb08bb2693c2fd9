//! Public IP discovery and IP geolocation ("My IP" / IP lookup).

use crate::{
    config::Config,
    dns::{DnsService, RecordType},
    errors::ToolkitError,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct PublicIpResponse {
    ip: String,
}

/// ipapi.co reply; every field is optional because reserved ranges and
/// quota errors come back with most of them missing.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    ip: Option<String>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    org: Option<String>,
    asn: Option<String>,
    timezone: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoInfo {
    pub ip: String,
    pub ip_version: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoInfo {
    /// (label, value) pairs for display, with "N/A" for unknown fields.
    pub fn display_fields(&self) -> Vec<(&'static str, String)> {
        let or_na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());
        vec![
            ("IP Address", self.ip.clone()),
            ("City", or_na(&self.city)),
            ("Country", or_na(&self.country)),
            ("ISP", or_na(&self.org)),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostLocation {
    pub domain: String,
    pub locations: Vec<GeoInfo>,
}

pub struct GeoService {
    client: reqwest::Client,
    public_ip_url: String,
    geo_url: String,
}

impl GeoService {
    pub fn new(config: Arc<Config>) -> Result<Self, ToolkitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .user_agent(concat!("support-toolkit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            public_ip_url: config.public_ip_url.clone(),
            geo_url: config.geo_url.clone(),
        })
    }

    /// The address this service reaches the internet from.
    pub async fn public_ip(&self) -> Result<IpAddr, ToolkitError> {
        let response = self.client
            .get(&self.public_ip_url)
            .query(&[("format", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolkitError::Upstream {
                service: "public IP service".to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: PublicIpResponse = response.json().await?;
        body.ip
            .trim()
            .parse()
            .map_err(|_| ToolkitError::Internal(format!("Public IP service returned {:?}", body.ip)))
    }

    pub async fn locate(&self, ip: IpAddr) -> Result<GeoInfo, ToolkitError> {
        let url = format!("{}/{}/json/", self.geo_url, ip);
        debug!("Geolocating {}", ip);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ToolkitError::RateLimited("geolocation service quota exceeded".to_string()));
        }
        if !status.is_success() {
            return Err(ToolkitError::Upstream {
                service: "geolocation service".to_string(),
                status: status.as_u16(),
            });
        }

        let body: IpApiResponse = response.json().await?;
        if body.error {
            let reason = body.reason.unwrap_or_else(|| "lookup failed".to_string());
            return Err(ToolkitError::InvalidInput(format!("Geolocation of {} failed: {}", ip, reason)));
        }

        Ok(GeoInfo {
            ip: body.ip.unwrap_or_else(|| ip.to_string()),
            ip_version: if ip.is_ipv4() { "IPv4" } else { "IPv6" }.to_string(),
            city: body.city,
            region: body.region,
            country: body.country_name,
            country_code: body.country_code,
            org: body.org,
            asn: body.asn,
            timezone: body.timezone,
            latitude: body.latitude,
            longitude: body.longitude,
        })
    }

    /// "My IP": public address plus where it appears to be.
    pub async fn my_ip(&self) -> Result<GeoInfo, ToolkitError> {
        let ip = self.public_ip().await?;
        self.locate(ip).await
    }

    /// Geolocate every A record of a domain.
    pub async fn locate_host(&self, dns: &DnsService, domain: &str) -> Result<HostLocation, ToolkitError> {
        let answer = dns.resolve(domain, RecordType::A).await?;

        let ips: Vec<IpAddr> = answer.values().iter().filter_map(|v| v.parse().ok()).collect();
        let lookups = join_all(ips.iter().map(|ip| self.locate(*ip))).await;

        let mut locations = Vec::new();
        for (ip, lookup) in ips.iter().zip(lookups) {
            match lookup {
                Ok(info) => locations.push(info),
                Err(e) => warn!("Failed to geolocate {} for {}: {}", ip, domain, e),
            }
        }

        if locations.is_empty() {
            return Err(ToolkitError::InvalidInput(format!("No geolocatable addresses for {}", domain)));
        }

        Ok(HostLocation {
            domain: domain.to_string(),
            locations,
        })
    }
}
