//! Anonymity classification
//!
//! One proxied request to an echo endpoint (httpbin-style: reports the
//! request's source IP and received headers) is compared against the
//! caller's own public IP to decide how much the proxy leaks.

use crate::proxy::models::{Anonymity, ProxyRecord};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Browser-like identity for the probe request
const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const PROBE_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const PROBE_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Header names by which a proxy identifies itself
const PROXY_MARKERS: [&str; 4] = ["via", "proxy-connection", "forwarded", "x-forwarded"];

/// What the echo endpoint reported back through the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEcho {
    /// Source IP the endpoint saw
    pub source_ip: String,
    /// Headers the endpoint received
    pub headers: HashMap<String, String>,
}

/// Echo endpoint body; httpbin reports `origin`, ipify-style services `ip`
#[derive(Debug, Deserialize)]
struct EchoBody {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// Decide the anonymity category from the caller's own IP and the echo.
///
/// Pure and deterministic; the checks are ordered. The own-IP scan is a
/// substring match over every header value, so a coincidental numeric
/// substring counts as a leak.
pub fn classify(own_ip: &str, echo: &ProbeEcho) -> Anonymity {
    // Header names are matched case-insensitively
    let headers: HashMap<String, &String> = echo
        .headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect();

    for (name, value) in &headers {
        if value.contains(own_ip) {
            debug!("Original IP leaked in {} header", name);
            return Anonymity::Transparent;
        }
    }

    if echo.source_ip == own_ip {
        return Anonymity::Transparent;
    }

    let reveals_proxy = headers
        .keys()
        .any(|name| PROXY_MARKERS.iter().any(|marker| name.contains(marker)));
    if reveals_proxy {
        Anonymity::AnonymousHeaderLeak
    } else {
        Anonymity::HighAnonymous
    }
}

/// Probe the anonymity endpoint through the proxy and classify the echo.
/// Returns the detected source IP and the category; any failure along the
/// way is `("Unknown", Failed)`, never an error.
pub async fn check_anonymity(
    record: &ProxyRecord,
    probe_url: &str,
    own_ip: &str,
    timeout: Duration,
) -> (String, Anonymity) {
    debug!("Checking anonymity for {}", record);

    let Some(echo) = fetch_echo(record, probe_url, timeout).await else {
        return ("Unknown".to_string(), Anonymity::Failed);
    };

    let category = classify(own_ip, &echo);
    (echo.source_ip, category)
}

async fn fetch_echo(record: &ProxyRecord, probe_url: &str, timeout: Duration) -> Option<ProbeEcho> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(PROBE_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(PROBE_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(PROBE_ACCEPT_LANGUAGE),
    );

    let client = Client::builder()
        .proxy(Proxy::all(record.url()).ok()?)
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .ok()?;

    let response = match client.get(probe_url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("Anonymity probe failed for {}: {}", record, e);
            return None;
        }
    };
    if !response.status().is_success() {
        debug!(
            "Anonymity probe for {} returned HTTP {}",
            record,
            response.status()
        );
        return None;
    }

    let body: EchoBody = match response.json().await {
        Ok(b) => b,
        Err(e) => {
            debug!("Anonymity probe body not parseable for {}: {}", record, e);
            return None;
        }
    };

    let source_ip = body
        .ip
        .or(body.origin)
        .unwrap_or_else(|| "Unknown".to_string());
    Some(ProbeEcho {
        source_ip,
        headers: body.headers,
    })
}
