use anyhow::anyhow;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use voter_crawl::core::config::load_config;
use voter_crawl::core::error::CrawlError;
use voter_crawl::core::settle::SettleMode;
use voter_crawl::features::paths::summary_path;
use voter_crawl::features::sink::CsvSink;
use voter_crawl::scraping::browser_manager::{self, LaunchOptions};
use voter_crawl::scraping::session::ChromeSession;
use voter_crawl::tools::crawl::{CrawlOptions, Crawler, StopSignal};
use voter_crawl::tools::extractor::Extractor;
use voter_crawl::tools::navigator::Navigator;
use voter_crawl::tools::partition::run_partitioned;

/// Crawl the voter registry portal into per-polling-centre CSV files.
///
/// Re-running with the same output directory resumes: leaves whose CSV
/// already exists are skipped.
#[derive(Parser, Debug)]
#[command(name = "voter-crawl", version, about)]
struct Cli {
    /// Output root directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only crawl this state (value or label). Repeatable.
    #[arg(long = "state", value_name = "STATE")]
    states: Vec<String>,

    /// Stop after this many leaves were processed (per session).
    #[arg(long)]
    max_leaves: Option<usize>,

    /// Independent browser sessions, each owning a disjoint set of states.
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// Config file (default search: $VOTER_CRAWL_CONFIG, ./voter-crawl.json,
    /// ~/.voter-crawl/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long)]
    headful: bool,

    /// Portal URL override.
    #[arg(long)]
    url: Option<String>,

    /// Save a screenshot here whenever a leaf faults.
    #[arg(long)]
    screenshots: Option<PathBuf>,

    /// How to wait for the result table after forcing all rows.
    #[arg(long, value_parser = parse_settle_mode)]
    settle_mode: Option<SettleMode>,
}

fn parse_settle_mode(s: &str) -> Result<SettleMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.url.clone() {
        config.portal_url = Some(url);
    }
    if let Some(out) = cli.output.clone() {
        config.output_dir = Some(out);
    }
    if let Some(dir) = cli.screenshots.clone() {
        config.screenshots_dir = Some(dir);
    }
    if cli.headful {
        config.headless = Some(false);
    }
    if let Some(mode) = cli.settle_mode {
        config.settle.mode = Some(
            match mode {
                SettleMode::Fixed => "fixed",
                SettleMode::Poll => "poll",
            }
            .to_string(),
        );
    }

    let portal_url = config.resolve_portal_url()?;
    let settle = config.resolve_settle_policy()?;
    let selectors = config.resolve_selectors();
    let output_root = config.resolve_output_dir();
    let navigation_timeout = config.resolve_navigation_timeout();
    let table_timeout = config.resolve_table_timeout();
    let control_timeout = config.resolve_control_timeout();

    let mut options = CrawlOptions::new(&output_root);
    options.max_leaves = cli.max_leaves.or(config.max_leaves);
    options.screenshots_dir = config.resolve_screenshots_dir();

    let executable = browser_manager::find_chrome_executable(
        config.resolve_chrome_executable().as_deref(),
    )
    .ok_or_else(|| {
        anyhow!(
            "no Chromium-based browser found; install Chrome/Chromium or set CHROME_EXECUTABLE"
        )
    })?;
    let mut launch = LaunchOptions::new(executable);
    launch.headless = config.resolve_headless();
    launch.user_agent = config.resolve_user_agent();

    info!(
        "voter-crawl: {} → {} (sessions: {}, cap: {:?})",
        portal_url,
        output_root.display(),
        cli.sessions.max(1),
        options.max_leaves
    );

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; finishing the current leaf");
                stop.stop();
            }
        });
    }

    let make = |i: usize| {
        let launch = launch.clone();
        let portal_url = portal_url.clone();
        let selectors = selectors.clone();
        let settle = settle.clone();
        let options = options.clone();
        let stop = stop.clone();
        async move {
            let session = ChromeSession::launch(&launch)
                .await
                .map_err(|e| CrawlError::Startup(format!("session {}: {}", i, e)))?;
            let navigator = Navigator::new(
                session,
                portal_url,
                selectors.clone(),
                settle.clone(),
                navigation_timeout,
            )
            .with_control_timeout(control_timeout);
            let extractor = Extractor::new(selectors, settle, table_timeout);
            Ok::<_, CrawlError>(
                Crawler::new(navigator, extractor, CsvSink::new(), options).with_stop_signal(stop),
            )
        }
    };

    let states = (!cli.states.is_empty()).then(|| cli.states.clone());
    let summary = match run_partitioned(states, cli.sessions, make).await {
        Ok(s) => s,
        Err(e) => {
            error!("startup failed: {}", e);
            return Err(e.into());
        }
    };

    if cli.sessions > 1 {
        info!("merged totals across sessions:");
        summary.log();
    }

    let path = summary_path(&output_root);
    match summary.write_json(&path) {
        Ok(()) => info!("run summary written to {}", path.display()),
        Err(e) => warn!("could not write run summary to {}: {}", path.display(), e),
    }

    Ok(())
}
