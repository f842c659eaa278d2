//! Hostname and GeoIP lookups with per-run caching
//!
//! Both caches live for one run and never evict: each unique host or IP is
//! effectively looked up at most once. Concurrent workers racing on the
//! same missing key may both compute it; last write wins.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Timeout for the small lookup HTTP services
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Public-IP echo services, tried in order until one answers
const PUBLIC_IP_SERVICES: [&str; 4] = [
    "https://api64.ipify.org?format=json",
    "https://ipinfo.io/json",
    "https://api.my-ip.io/ip.json",
    "https://api.ipify.org?format=json",
];

/// JSON keys under which echo services report the address
const PUBLIC_IP_KEYS: [&str; 3] = ["ip", "ip_addr", "origin"];

/// Country and city for an IP, "Unknown" when undetermined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: String,
    pub city: String,
}

impl GeoInfo {
    pub fn new(country: String, city: String) -> Self {
        Self { country, city }
    }

    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
        }
    }
}

/// Source of IP→location data
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;
}

/// GeoIP lookup over public HTTP services with ordered fallback
pub struct HttpGeoProvider;

/// (URL template, country key, city key) per service
const GEO_SERVICES: [(&str, &str, &str); 3] = [
    ("https://ipinfo.io/{ip}/json", "country", "city"),
    ("https://freegeoip.app/json/{ip}", "country_name", "city"),
    ("https://ipapi.co/{ip}/json/", "country_name", "city"),
];

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let client = Client::builder().timeout(LOOKUP_TIMEOUT).build().ok()?;

        for (template, country_key, city_key) in GEO_SERVICES {
            let url = template.replace("{ip}", ip);
            let response = match client.get(&url).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(_) | Err(_) => {
                    debug!("Geo lookup via {} failed for {}", url, ip);
                    continue;
                }
            };
            let Ok(data) = response.json::<Value>().await else {
                continue;
            };

            let country = data
                .get(country_key)
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let city = data
                .get(city_key)
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            debug!("Got geo info for {}: {}, {}", ip, country, city);
            return Some(GeoInfo::new(country, city));
        }
        None
    }
}

/// Memoized IP→(country, city) lookups
pub struct GeoCache {
    entries: Mutex<HashMap<String, GeoInfo>>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up an IP, consulting the provider only on a cache miss.
    /// Provider failure caches as Unknown so the same IP is not retried.
    pub async fn lookup(&self, ip: &str, provider: &dyn GeoProvider) -> GeoInfo {
        if let Some(info) = self
            .entries
            .lock()
            .expect("geo cache lock poisoned")
            .get(ip)
            .cloned()
        {
            debug!("GeoIP cache hit for {}", ip);
            return info;
        }

        let info = provider.lookup(ip).await.unwrap_or_else(GeoInfo::unknown);
        self.entries
            .lock()
            .expect("geo cache lock poisoned")
            .insert(ip.to_string(), info.clone());
        info
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.entries
            .lock()
            .expect("geo cache lock poisoned")
            .contains_key(ip)
    }
}

impl Default for GeoCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Memoized hostname→IP resolution; literal IPs bypass the cache
pub struct DnsCache {
    entries: Mutex<HashMap<String, Option<IpAddr>>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a hostname to its first address. `None` means resolution
    /// failed; the caller degrades rather than aborting the probe.
    pub async fn resolve(&self, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }

        if let Some(cached) = self
            .entries
            .lock()
            .expect("dns cache lock poisoned")
            .get(host)
            .copied()
        {
            debug!("DNS cache hit for {}", host);
            return cached;
        }

        let resolved = tokio::net::lookup_host((host, 0u16))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| addr.ip());
        if resolved.is_none() {
            debug!("DNS resolution failed for {}", host);
        }

        self.entries
            .lock()
            .expect("dns cache lock poisoned")
            .insert(host.to_string(), resolved);
        resolved
    }

    pub fn contains(&self, host: &str) -> bool {
        self.entries
            .lock()
            .expect("dns cache lock poisoned")
            .contains_key(host)
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Determine the caller's own public IP via the echo services, in order.
/// Returns "Unknown" when every service fails.
pub async fn discover_public_ip() -> String {
    let Ok(client) = Client::builder().timeout(LOOKUP_TIMEOUT).build() else {
        return "Unknown".to_string();
    };

    for service in PUBLIC_IP_SERVICES {
        debug!("Trying to get public IP from {}", service);
        let response = match client.get(service).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(_) | Err(_) => continue,
        };
        let Ok(data) = response.json::<Value>().await else {
            continue;
        };

        for key in PUBLIC_IP_KEYS {
            if let Some(ip) = data.get(key).and_then(Value::as_str) {
                debug!("Got public IP {} from {}", ip, service);
                return ip.to_string();
            }
        }
    }

    debug!("Could not determine public IP from any service");
    "Unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        answer: Option<GeoInfo>,
    }

    impl CountingProvider {
        fn new(answer: Option<GeoInfo>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
            }
        }
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test]
    async fn test_geo_cache_hit_skips_provider() {
        let cache = GeoCache::new();
        let provider = CountingProvider::new(Some(GeoInfo::new(
            "Germany".to_string(),
            "Berlin".to_string(),
        )));

        let first = cache.lookup("1.2.3.4", &provider).await;
        let second = cache.lookup("1.2.3.4", &provider).await;

        assert_eq!(first, second);
        assert_eq!(first.country, "Germany");
        // The second lookup never reached the provider
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_geo_cache_failure_cached_as_unknown() {
        let cache = GeoCache::new();
        let provider = CountingProvider::new(None);

        let first = cache.lookup("5.6.7.8", &provider).await;
        let second = cache.lookup("5.6.7.8", &provider).await;

        assert_eq!(first, GeoInfo::unknown());
        assert_eq!(second, GeoInfo::unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_geo_cache_distinct_keys() {
        let cache = GeoCache::new();
        let provider = CountingProvider::new(Some(GeoInfo::new(
            "US".to_string(),
            "Dallas".to_string(),
        )));

        cache.lookup("1.1.1.1", &provider).await;
        cache.lookup("2.2.2.2", &provider).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dns_literal_bypasses_cache() {
        let cache = DnsCache::new();
        let ip = cache.resolve("192.0.2.7").await;
        assert_eq!(ip, Some("192.0.2.7".parse().unwrap()));
        assert!(!cache.contains("192.0.2.7"));
    }

    #[tokio::test]
    async fn test_dns_ipv6_literal() {
        let cache = DnsCache::new();
        let ip = cache.resolve("::1").await;
        assert_eq!(ip, Some("::1".parse().unwrap()));
    }

    #[test]
    fn test_geo_info_unknown() {
        let info = GeoInfo::unknown();
        assert_eq!(info.country, "Unknown");
        assert_eq!(info.city, "Unknown");
    }
}
