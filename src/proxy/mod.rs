//! Proxy checking core
//!
//! This module provides functionality for:
//! - Parsing and validating proxy lists into canonical records
//! - Probing each proxy for reachability, latency and anonymity
//! - Scheduling probes under a concurrency cap (task or thread model)
//! - Aggregating and checkpointing results as probes complete

pub mod anonymity;
pub mod checker;
pub mod lookup;
pub mod models;
pub mod parser;
pub mod results;
pub mod scheduler;

pub use anonymity::{check_anonymity, classify, ProbeEcho};
pub use checker::{CheckerConfig, ProbeWorker, ProxyProbe};
pub use lookup::{discover_public_ip, DnsCache, GeoCache, GeoInfo, GeoProvider, HttpGeoProvider};
pub use models::{
    classify_status, Anonymity, CheckResult, CheckStatus, ProxyAuth, ProxyRecord, ProxyScheme,
};
pub use parser::{ParsedProxies, ProxySpecParser, Rejection};
pub use results::{CheckpointStage, ProgressCounter, ResultAggregator, ResultSink};
pub use scheduler::{Scheduler, SchedulerKind, ShutdownFlag, TaskScheduler, ThreadScheduler};
