use anyhow::bail;
use clap::{CommandFactory, Parser};
use colored::Colorize;
use proxy_sift::output::{save_results, CheckpointWriter, OutputFormat};
use proxy_sift::proxy::{
    discover_public_ip, Anonymity, CheckResult, CheckStatus, CheckerConfig, DnsCache, GeoCache,
    GeoProvider, HttpGeoProvider, ProbeWorker, ProgressCounter, ProxyProbe, ProxySpecParser,
    ResultAggregator, ResultSink, SchedulerKind, ShutdownFlag,
};
use proxy_sift::{config, Config, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Timeout for downloading proxy-source lists in automatic mode
const SOURCE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Check proxies for availability, speed, and anonymity
#[derive(Parser, Debug)]
#[command(name = "proxy-sift", version)]
#[command(about = "Check proxies for availability, speed, and anonymity")]
struct Cli {
    /// URL to test proxies against
    url: Option<String>,

    /// Proxy, comma-separated proxy list, or .txt file with proxies
    #[arg(short, long)]
    proxy: Option<String>,

    /// Timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Save results format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Maximum response time in ms for a proxy to count as fast
    #[arg(short = 'R', long)]
    response_time: Option<f64>,

    /// Save only fast proxies to the output file
    #[arg(short, long)]
    fast_only: bool,

    /// Number of concurrent checks
    #[arg(short, long)]
    concurrent: Option<usize>,

    /// Enable detailed debug output
    #[arg(short, long)]
    debug: bool,

    /// Download proxy lists from the given or configured URLs
    #[arg(short = 'A', long)]
    automatic_mode: bool,

    /// Create a default config file in the home directory and exit
    #[arg(long)]
    config: bool,

    /// Scheduling model for the checks
    #[arg(short = 's', long, value_enum)]
    scheduler: Option<SchedulerKind>,

    /// Number of proxies per scheduling batch
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,
}

fn display_banner() {
    println!("{}", "═".repeat(60).cyan());
    println!(
        "{}",
        format!("  proxy-sift v{}", env!("CARGO_PKG_VERSION"))
            .cyan()
            .bold()
    );
    println!(
        "{}",
        "  check proxies for availability, speed and anonymity".cyan()
    );
    println!("{}", "═".repeat(60).cyan());
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "proxy_sift=debug"
    } else {
        "proxy_sift=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.url {
        config.general.test_url = url.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.general.timeout_secs = timeout;
    }
    if let Some(concurrent) = cli.concurrent {
        config.general.concurrent = concurrent;
    }
    if let Some(threshold) = cli.response_time {
        config.general.response_time_filter = Some(threshold);
    }
    if let Some(format) = cli.output {
        config.output.format = format;
    }
    if cli.fast_only {
        config.output.fast_only = true;
    }
    if cli.debug {
        config.advanced.debug = true;
    }
    if let Some(kind) = cli.scheduler {
        config.advanced.scheduler = kind;
    }
    if let Some(batch) = cli.batch_size {
        config.advanced.chunk_size = batch;
    }
}

// Cooperative checks multiplex on this single-threaded loop; the thread
// scheduler moves its pool onto blocking threads
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    display_banner();
    println!();

    // Bare invocation prints help and exits cleanly
    if std::env::args().len() == 1 {
        Cli::command().print_help()?;
        return Ok(());
    }

    let cli = Cli::parse();

    if cli.config {
        let Some(path) = config::user_config_path() else {
            bail!("Could not determine home directory for the config file");
        };
        Config::write_default(&path)?;
        println!(
            "{}",
            format!("Created default configuration file at {}", path.display()).green()
        );
        return Ok(());
    }

    let mut config = Config::load();
    apply_cli_overrides(&mut config, &cli);
    init_tracing(config.advanced.debug);

    run(config, cli.proxy, cli.automatic_mode).await
}

async fn run(config: Config, proxy_source: Option<String>, automatic_mode: bool) -> Result<()> {
    info!("Determining your public IP address...");
    let public_ip = discover_public_ip().await;
    info!("Your public IP: {}", public_ip);

    let candidates = gather_candidates(&config, proxy_source.as_deref(), automatic_mode).await;

    let parsed = ProxySpecParser::validate(&candidates);
    if !parsed.rejected.is_empty() {
        warn!("Skipping {} invalid proxies", parsed.rejected.len());
        for rejection in &parsed.rejected {
            debug!("  - {}: {}", rejection.input, rejection.reason);
        }
    }

    let records = parsed.records;
    let total = records.len();
    if total == 0 {
        eprintln!("{}", "No valid proxies found. Exiting.".red());
        std::process::exit(1);
    }

    info!(
        "Testing {} proxies with a timeout of {} seconds",
        total, config.general.timeout_secs
    );

    // Per-run shared state, passed into the scheduler and workers
    let progress = Arc::new(ProgressCounter::new(total));
    let save_dir = PathBuf::from(&config.output.save_directory);
    let sink: Arc<dyn ResultSink> = Arc::new(CheckpointWriter::new(save_dir.clone()));
    let aggregator = Arc::new(ResultAggregator::new(
        config.advanced.autosave_interval,
        Some(sink),
    ));

    let checker_config = CheckerConfig::new()
        .with_test_url(config.general.test_url.clone())
        .with_timeout(Duration::from_secs(config.general.timeout_secs))
        .with_response_time_filter(config.general.response_time_filter)
        .with_anonymity_check_url(config.advanced.anonymity_check_url.clone())
        .with_debug(config.advanced.debug);
    let geo_provider: Arc<dyn GeoProvider> = Arc::new(HttpGeoProvider);
    let probe: Arc<dyn ProxyProbe> = Arc::new(ProbeWorker::new(
        checker_config,
        public_ip,
        Arc::new(DnsCache::new()),
        Arc::new(GeoCache::new()),
        geo_provider,
        Arc::clone(&progress),
    ));

    // SIGINT stops admitting probes; in-flight checks finish and the final
    // checkpoint below still runs
    let shutdown = ShutdownFlag::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!(
                    "{}",
                    "\nInterrupted by user. Finishing in-flight checks and saving results..."
                        .yellow()
                );
                shutdown.trigger();
            }
        });
    }

    info!(
        "Starting proxy checks with {} concurrent workers ({} scheduler)",
        config.general.concurrent, config.advanced.scheduler
    );
    let scheduler = config
        .advanced
        .scheduler
        .build(config.general.concurrent, config.advanced.chunk_size);
    scheduler
        .run(records, probe, Arc::clone(&aggregator), shutdown.clone())
        .await;

    if shutdown.is_triggered() {
        warn!("Run interrupted; saving the results collected so far");
    } else {
        println!("{}", "\nAll proxy checks completed!".green());
    }

    let results = aggregator.snapshot();
    if let Err(e) = save_results(
        &results,
        config.output.format,
        config.output.fast_only,
        &save_dir,
    ) {
        error!("Failed to save results: {}", e);
    }
    if let Err(e) = aggregator.final_checkpoint() {
        error!("Failed to write final checkpoint: {}", e);
    }

    print_summary(&results, total);
    Ok(())
}

/// Collect raw candidates from the configured source; any fatal source
/// problem reports and exits with status 1
async fn gather_candidates(
    config: &Config,
    proxy_source: Option<&str>,
    automatic_mode: bool,
) -> Vec<String> {
    if automatic_mode {
        let urls: Vec<String> = match proxy_source {
            Some(input) => input
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect(),
            None => config.proxy_sources.urls.clone(),
        };
        if urls.is_empty() {
            eprintln!(
                "{}",
                "No proxy source URLs given or configured for automatic mode.".red()
            );
            std::process::exit(1);
        }

        info!("Automatic mode enabled, downloading proxy lists...");
        match ProxySpecParser::fetch_sources(&urls, SOURCE_DOWNLOAD_TIMEOUT).await {
            Ok(candidates) => candidates,
            Err(e) => {
                eprintln!("{}", format!("Failed to download proxy lists: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        let Some(input) = proxy_source else {
            eprintln!(
                "{}",
                "No proxy source specified. Use -p/--proxy or -A/--automatic-mode.".red()
            );
            std::process::exit(1);
        };
        match ProxySpecParser::gather(input) {
            Ok(candidates) => candidates,
            Err(e) => {
                eprintln!("{}", format!("{}", e).red());
                std::process::exit(1);
            }
        }
    }
}

fn print_summary(results: &[CheckResult], total: usize) {
    let working = results.iter().filter(|r| r.is_working()).count();
    let fast = results
        .iter()
        .filter(|r| r.status == CheckStatus::Fast)
        .count();
    let high_anon = results
        .iter()
        .filter(|r| r.is_working() && r.anonymity == Anonymity::HighAnonymous)
        .count();
    let pct = |n: usize| n as f64 / total as f64 * 100.0;

    println!();
    println!("{}", "─".repeat(29).cyan());
    println!("{}", " PROXY SIFT SUMMARY".green().bold());
    println!("{}", "─".repeat(29).cyan());
    println!("{}", format!("Total proxies tested: {}", total).cyan());
    println!(
        "{}",
        format!("Working proxies: {} ({:.1}%)", working, pct(working)).green()
    );
    println!(
        "{}",
        format!("Fast proxies: {} ({:.1}%)", fast, pct(fast)).green()
    );
    println!(
        "{}",
        format!(
            "High anonymous proxies: {} ({:.1}%)",
            high_anon,
            pct(high_anon)
        )
        .bright_green()
    );
    println!("{}", "─".repeat(29).cyan());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let cli = Cli::parse_from([
            "proxy-sift",
            "http://example.com",
            "-p",
            "10.0.0.1:8080",
            "-t",
            "30",
            "-c",
            "50",
            "-R",
            "500",
            "-o",
            "csv",
            "-f",
            "-d",
            "-s",
            "thread",
            "-b",
            "250",
        ]);

        let mut config = Config::default();
        apply_cli_overrides(&mut config, &cli);

        assert_eq!(config.general.test_url, "http://example.com");
        assert_eq!(config.general.timeout_secs, 30);
        assert_eq!(config.general.concurrent, 50);
        assert_eq!(config.general.response_time_filter, Some(500.0));
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert!(config.output.fast_only);
        assert!(config.advanced.debug);
        assert_eq!(config.advanced.scheduler, SchedulerKind::Thread);
        assert_eq!(config.advanced.chunk_size, 250);
    }

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["proxy-sift", "-p", "10.0.0.1:8080"]);
        let mut config = Config::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config, Config::default());
    }
}
