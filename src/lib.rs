//! Proxy Sift - concurrent proxy checker
//!
//! Checks lists of HTTP, HTTPS, SOCKS4 and SOCKS5 proxies for
//! availability, speed and anonymity. Proxy lists come from strings, files
//! or downloaded sources; results are checkpointed while the run is in
//! flight and reported as JSON, CSV, SQLite or plain text.

pub mod config;
pub mod output;
pub mod proxy;

pub use config::Config;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
