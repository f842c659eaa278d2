//! Per-proxy probing: reachability, timing and anonymity
//!
//! One `ProbeWorker` is built per run and shared by the scheduler's
//! execution contexts. Its contract is the `ProxyProbe` trait: every
//! invocation returns exactly one `CheckResult` and never an error, so a
//! single bad proxy can never abort the batch.

use crate::proxy::anonymity::check_anonymity;
use crate::proxy::lookup::{DnsCache, GeoCache, GeoInfo, GeoProvider};
use crate::proxy::models::{CheckResult, CheckStatus, ProxyRecord, ProxyScheme};
use crate::proxy::results::ProgressCounter;
use async_trait::async_trait;
use colored::Colorize;
use reqwest::{Client, Proxy, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::debug;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "https://www.google.com";

/// Default response-time threshold in milliseconds for the FAST status
const DEFAULT_RESPONSE_TIME_MS: f64 = 1000.0;

/// Default endpoint that echoes the request's source IP and headers
const DEFAULT_ANONYMITY_CHECK_URL: &str = "https://httpbin.org/get";

/// Configuration for one checking run
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// URL to test proxies against
    pub test_url: String,
    /// Timeout for each transport attempt
    pub timeout: Duration,
    /// Threshold separating FAST from SLOW; `None` marks everything SLOW
    pub response_time_filter: Option<f64>,
    /// Endpoint for the anonymity probe
    pub anonymity_check_url: String,
    /// Show failure details on progress lines
    pub debug: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            test_url: DEFAULT_TEST_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            response_time_filter: Some(DEFAULT_RESPONSE_TIME_MS),
            anonymity_check_url: DEFAULT_ANONYMITY_CHECK_URL.to_string(),
            debug: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_response_time_filter(mut self, threshold_ms: Option<f64>) -> Self {
        self.response_time_filter = threshold_ms;
        self
    }

    pub fn with_anonymity_check_url(mut self, url: String) -> Self {
        self.anonymity_check_url = url;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// One full check for one proxy
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, record: &ProxyRecord) -> CheckResult;
}

/// Executes the full check pipeline for single proxies
pub struct ProbeWorker {
    config: CheckerConfig,
    /// The caller's own public IP, for anonymity comparison
    public_ip: String,
    dns: Arc<DnsCache>,
    geo: Arc<GeoCache>,
    geo_provider: Arc<dyn GeoProvider>,
    progress: Arc<ProgressCounter>,
}

impl ProbeWorker {
    pub fn new(
        config: CheckerConfig,
        public_ip: String,
        dns: Arc<DnsCache>,
        geo: Arc<GeoCache>,
        geo_provider: Arc<dyn GeoProvider>,
        progress: Arc<ProgressCounter>,
    ) -> Self {
        Self {
            config,
            public_ip,
            dns,
            geo,
            geo_provider,
            progress,
        }
    }

    /// GET the test URL through the proxy; success is exactly HTTP 200
    async fn http_probe(&self, record: &ProxyRecord) -> Result<(), String> {
        let proxy = Proxy::all(record.url()).map_err(|e| e.to_string())?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| e.to_string())?;

        match tokio::time::timeout(self.config.timeout, client.get(&self.config.test_url).send())
            .await
        {
            Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
            Ok(Ok(response)) => Err(format!("HTTP status: {}", response.status())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("Connection timed out".to_string()),
        }
    }

    /// Raw SOCKS connect to the test URL's host:port, no payload exchanged
    async fn socks_probe(&self, record: &ProxyRecord) -> Result<(), String> {
        let url = Url::parse(&self.config.test_url).map_err(|e| e.to_string())?;
        let target_host = url
            .host_str()
            .ok_or_else(|| "Test URL has no host".to_string())?
            .to_string();
        let target_port = url.port_or_known_default().unwrap_or(80);
        let target = (target_host.as_str(), target_port);
        // The transport gets the record's hostname as-is; its own resolution
        // applies when the DNS cache could not
        let proxy = (record.host.as_str(), record.port);

        let connect = async {
            match record.scheme {
                ProxyScheme::Socks4 => match &record.auth {
                    Some(auth) => Socks4Stream::connect_with_userid(proxy, target, &auth.username)
                        .await
                        .map(drop),
                    None => Socks4Stream::connect(proxy, target).await.map(drop),
                },
                ProxyScheme::Socks5 => match &record.auth {
                    Some(auth) => Socks5Stream::connect_with_password(
                        proxy,
                        target,
                        &auth.username,
                        &auth.password,
                    )
                    .await
                    .map(drop),
                    None => Socks5Stream::connect(proxy, target).await.map(drop),
                },
                ProxyScheme::Http | ProxyScheme::Https => {
                    return Err("Unsupported protocol".to_string())
                }
            }
            .map_err(|e| e.to_string())
        };

        match tokio::time::timeout(self.config.timeout, connect).await {
            Ok(outcome) => outcome,
            Err(_) => Err("Connection timed out".to_string()),
        }
    }

    /// One colored console line per finished probe
    fn report(&self, result: &CheckResult, index: usize, total: usize, detail: Option<&str>) {
        let tag = format!("[{}/{}]", index, total);
        match result.status {
            CheckStatus::Fast | CheckStatus::Slow => {
                let elapsed = result.response_time_ms.unwrap_or_default();
                let line = format!(
                    "{} {} - {} ({}, {}, {}) - {:.0} ms",
                    tag, result.status, result.proxy, result.country, result.city,
                    result.anonymity, elapsed
                );
                if result.status == CheckStatus::Fast {
                    println!("{}", line.green());
                } else {
                    println!("{}", line.yellow());
                }
            }
            CheckStatus::Failed => {
                // Failure details only at debug verbosity
                if self.config.debug {
                    println!(
                        "{}",
                        format!(
                            "{} FAILED - {} ({}, {}, {}) - {}",
                            tag,
                            result.proxy,
                            result.country,
                            result.city,
                            result.anonymity,
                            detail.unwrap_or("Connection failed")
                        )
                        .red()
                    );
                } else {
                    println!("{}", format!("{} FAILED - {}", tag, result.proxy).red());
                }
            }
        }
    }
}

#[async_trait]
impl ProxyProbe for ProbeWorker {
    async fn probe(&self, record: &ProxyRecord) -> CheckResult {
        let (index, total) = self.progress.advance();

        // Resolution failure is non-fatal; geo degrades to Unknown and the
        // transport attempt still gets the original hostname
        let resolved = self.dns.resolve(&record.host).await;
        let geo = match resolved {
            Some(ip) => {
                self.geo
                    .lookup(&ip.to_string(), self.geo_provider.as_ref())
                    .await
            }
            None => GeoInfo::unknown(),
        };

        let (detected_ip, anonymity) = check_anonymity(
            record,
            &self.config.anonymity_check_url,
            &self.public_ip,
            self.config.timeout,
        )
        .await;
        debug!("{} reports source IP {} ({})", record, detected_ip, anonymity);

        let started = Instant::now();
        let outcome = match record.scheme {
            ProxyScheme::Http | ProxyScheme::Https => self.http_probe(record).await,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => self.socks_probe(record).await,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (result, detail) = match outcome {
            Ok(()) => (
                CheckResult::working(
                    record,
                    elapsed_ms,
                    self.config.response_time_filter,
                    geo.country,
                    geo.city,
                    anonymity,
                ),
                None,
            ),
            Err(reason) => (
                CheckResult::failed(record, geo.country, geo.city, anonymity),
                Some(reason),
            ),
        };

        self.report(&result, index, total, detail.as_deref());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Anonymity;

    struct NoGeo;

    #[async_trait]
    impl GeoProvider for NoGeo {
        async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
            None
        }
    }

    fn worker(config: CheckerConfig) -> ProbeWorker {
        ProbeWorker::new(
            config,
            "203.0.113.9".to_string(),
            Arc::new(DnsCache::new()),
            Arc::new(GeoCache::new()),
            Arc::new(NoGeo),
            Arc::new(ProgressCounter::new(1)),
        )
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert_eq!(config.response_time_filter, Some(DEFAULT_RESPONSE_TIME_MS));
        assert_eq!(config.anonymity_check_url, DEFAULT_ANONYMITY_CHECK_URL);
        assert!(!config.debug);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_test_url("http://example.com".to_string())
            .with_timeout(Duration::from_secs(30))
            .with_response_time_filter(None)
            .with_anonymity_check_url("http://echo.example.com/get".to_string())
            .with_debug(true);

        assert_eq!(config.test_url, "http://example.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.response_time_filter, None);
        assert!(config.debug);
    }

    #[tokio::test]
    async fn test_unreachable_http_proxy_yields_failed_result() {
        // Nothing listens on port 9 of the loopback interface
        let config = CheckerConfig::new()
            .with_test_url("http://192.0.2.1/".to_string())
            .with_timeout(Duration::from_secs(2));
        let worker = worker(config);
        let record = ProxyRecord::new(ProxyScheme::Http, "127.0.0.1".to_string(), 9);

        let result = worker.probe(&record).await;
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(result.response_time_ms, None);
        assert_eq!(result.anonymity, Anonymity::Failed);
        assert_eq!(result.proxy, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_unreachable_socks_proxy_yields_failed_result() {
        let config = CheckerConfig::new()
            .with_test_url("http://192.0.2.1/".to_string())
            .with_timeout(Duration::from_secs(2));
        let worker = worker(config);
        let record = ProxyRecord::new(ProxyScheme::Socks5, "127.0.0.1".to_string(), 9);

        let result = worker.probe(&record).await;
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(result.protocol, ProxyScheme::Socks5);
    }
}
