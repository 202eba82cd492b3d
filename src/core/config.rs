use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::settle::{SettleMode, SettlePolicy};
use super::types::Level;

// ---------------------------------------------------------------------------
// VoterCrawlConfig: file-based config loader (voter-crawl.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const DEFAULT_PORTAL_URL: &str = "https://voterlist.election.gov.np/";
pub const DEFAULT_OUTPUT_DIR: &str = "data";

pub const ENV_CONFIG_PATH: &str = "VOTER_CRAWL_CONFIG";
pub const ENV_PORTAL_URL: &str = "VOTER_CRAWL_URL";
pub const ENV_OUTPUT_DIR: &str = "VOTER_CRAWL_OUTPUT";
pub const ENV_HEADLESS: &str = "VOTER_CRAWL_HEADLESS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_USER_AGENT: &str = "VOTER_CRAWL_USER_AGENT";
pub const ENV_NAV_TIMEOUT_SECS: &str = "VOTER_CRAWL_NAV_TIMEOUT_SECS";
pub const ENV_TABLE_TIMEOUT_SECS: &str = "VOTER_CRAWL_TABLE_TIMEOUT_SECS";
pub const ENV_CONTROL_TIMEOUT_SECS: &str = "VOTER_CRAWL_CONTROL_TIMEOUT_SECS";
pub const ENV_SCREENSHOTS_DIR: &str = "VOTER_CRAWL_SCREENSHOTS";
pub const ENV_SETTLE_MODE: &str = "VOTER_CRAWL_SETTLE_MODE";

/// CSS selectors for the registry form (mirrors the `selectors` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SelectorsConfig {
    pub state: Option<String>,
    pub district: Option<String>,
    pub municipality: Option<String>,
    pub ward: Option<String>,
    pub centre: Option<String>,
    /// Tried in order, first present wins.
    pub submit: Option<Vec<String>>,
    pub result_table: Option<String>,
    /// `name` of the page-size `<select>` rendered next to the result table.
    pub page_size: Option<String>,
}

/// Delay tuning (mirrors the `settle` key). All values in milliseconds.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SettleConfig {
    pub after_select_ms: Option<u64>,
    pub page_size_ms: Option<u64>,
    /// `fixed` (default) or `poll`.
    pub mode: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub poll_quiet_ms: Option<u64>,
    pub poll_max_ms: Option<u64>,
    pub between_leaves_ms: Option<u64>,
    pub between_leaves_jitter_ms: Option<u64>,
}

/// Top-level config loaded from `voter-crawl.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct VoterCrawlConfig {
    pub portal_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub headless: Option<bool>,
    pub chrome_executable: Option<String>,
    pub user_agent: Option<String>,
    pub navigation_timeout_secs: Option<u64>,
    pub table_timeout_secs: Option<u64>,
    /// Wait for the root form control after each page load.
    pub control_timeout_secs: Option<u64>,
    pub screenshots_dir: Option<PathBuf>,
    pub max_leaves: Option<usize>,
    #[serde(default)]
    pub settle: SettleConfig,
    #[serde(default)]
    pub selectors: SelectorsConfig,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let v = env_string(key)?.to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl VoterCrawlConfig {
    /// Portal URL: JSON field → `VOTER_CRAWL_URL` → the public registry.
    ///
    /// Rejects anything that is not an absolute http(s) URL.
    pub fn resolve_portal_url(&self) -> Result<String> {
        let raw = self
            .portal_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| env_string(ENV_PORTAL_URL))
            .unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string());
        let parsed = url::Url::parse(raw.trim())
            .with_context(|| format!("portal url '{}' is not a valid URL", raw))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("portal url must be http(s), got '{}'", raw));
        }
        Ok(parsed.to_string())
    }

    /// Output root: JSON field → `VOTER_CRAWL_OUTPUT` → `./data`.
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| env_string(ENV_OUTPUT_DIR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// JSON field → `VOTER_CRAWL_HEADLESS` → `true`.
    pub fn resolve_headless(&self) -> bool {
        self.headless
            .or_else(|| env_flag(ENV_HEADLESS))
            .unwrap_or(true)
    }

    /// Explicit browser binary, only when it exists on disk.
    pub fn resolve_chrome_executable(&self) -> Option<String> {
        self.chrome_executable
            .clone()
            .or_else(|| env_string(ENV_CHROME_EXECUTABLE))
            .filter(|p| Path::new(p).exists())
    }

    pub fn resolve_user_agent(&self) -> Option<String> {
        self.user_agent
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string(ENV_USER_AGENT))
    }

    /// Page navigation timeout: JSON → `VOTER_CRAWL_NAV_TIMEOUT_SECS` → 60 s.
    pub fn resolve_navigation_timeout(&self) -> Duration {
        let secs = self
            .navigation_timeout_secs
            .or_else(|| env_parse(ENV_NAV_TIMEOUT_SECS))
            .unwrap_or(60);
        Duration::from_secs(secs.max(1))
    }

    /// Result-table attach timeout: JSON → `VOTER_CRAWL_TABLE_TIMEOUT_SECS` → 10 s.
    pub fn resolve_table_timeout(&self) -> Duration {
        let secs = self
            .table_timeout_secs
            .or_else(|| env_parse(ENV_TABLE_TIMEOUT_SECS))
            .unwrap_or(10);
        Duration::from_secs(secs.max(1))
    }

    /// Root-control wait after a page load: JSON → `VOTER_CRAWL_CONTROL_TIMEOUT_SECS` → 10 s.
    pub fn resolve_control_timeout(&self) -> Duration {
        let secs = self
            .control_timeout_secs
            .or_else(|| env_parse(ENV_CONTROL_TIMEOUT_SECS))
            .unwrap_or(10);
        Duration::from_secs(secs.max(1))
    }

    pub fn resolve_screenshots_dir(&self) -> Option<PathBuf> {
        self.screenshots_dir
            .clone()
            .or_else(|| env_string(ENV_SCREENSHOTS_DIR).map(PathBuf::from))
    }

    pub fn resolve_settle_policy(&self) -> Result<SettlePolicy> {
        let s = &self.settle;
        let defaults = SettlePolicy::default();
        let mode = match s.mode.clone().or_else(|| env_string(ENV_SETTLE_MODE)) {
            Some(m) => m.parse::<SettleMode>().map_err(|e| anyhow!(e))?,
            None => defaults.mode,
        };
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        Ok(SettlePolicy {
            after_select: ms(s.after_select_ms, defaults.after_select),
            page_size: ms(s.page_size_ms, defaults.page_size),
            mode,
            poll_interval: ms(s.poll_interval_ms, defaults.poll_interval),
            poll_quiet: ms(s.poll_quiet_ms, defaults.poll_quiet),
            poll_max: ms(s.poll_max_ms, defaults.poll_max),
            between_leaves: ms(s.between_leaves_ms, defaults.between_leaves),
            between_leaves_jitter: ms(s.between_leaves_jitter_ms, defaults.between_leaves_jitter),
        })
    }

    pub fn resolve_selectors(&self) -> FormSelectors {
        let s = &self.selectors;
        let d = FormSelectors::default();
        let pick = |v: &Option<String>, fallback: String| {
            v.clone().filter(|x| !x.trim().is_empty()).unwrap_or(fallback)
        };
        FormSelectors {
            state: pick(&s.state, d.state),
            district: pick(&s.district, d.district),
            municipality: pick(&s.municipality, d.municipality),
            ward: pick(&s.ward, d.ward),
            centre: pick(&s.centre, d.centre),
            submit: s
                .submit
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or(d.submit),
            result_table: pick(&s.result_table, d.result_table),
            page_size: pick(&s.page_size, d.page_size),
        }
    }
}

/// Resolved selectors for every control the engine touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormSelectors {
    pub state: String,
    pub district: String,
    pub municipality: String,
    pub ward: String,
    pub centre: String,
    pub submit: Vec<String>,
    pub result_table: String,
    pub page_size: String,
}

impl Default for FormSelectors {
    fn default() -> Self {
        Self {
            state: "select#state".to_string(),
            district: "select#district".to_string(),
            municipality: "select#vdc_mun".to_string(),
            ward: "select#ward".to_string(),
            centre: "select#reg_centre".to_string(),
            submit: vec![
                "button.btn-success".to_string(),
                "input[type='submit']".to_string(),
            ],
            result_table: "table#tbl_data".to_string(),
            page_size: "tbl_data_length".to_string(),
        }
    }
}

impl FormSelectors {
    pub fn control(&self, level: Level) -> &str {
        match level {
            Level::State => &self.state,
            Level::District => &self.district,
            Level::Municipality => &self.municipality,
            Level::Ward => &self.ward,
            Level::Centre => &self.centre,
        }
    }
}

/// Load `voter-crawl.json`.
///
/// An explicit path must exist and parse. Otherwise the search order is
/// (first found wins):
/// 1. `VOTER_CRAWL_CONFIG` env var path
/// 2. `./voter-crawl.json`
/// 3. `~/.voter-crawl/config.json`
///
/// Missing file → defaults. Parse error in a searched file → warning, defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<VoterCrawlConfig> {
    if let Some(path) = explicit {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str::<VoterCrawlConfig>(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!("config loaded from {}", path.display());
        return Ok(cfg);
    }

    let mut candidates = vec![PathBuf::from("voter-crawl.json")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".voter-crawl").join("config.json"));
    }
    if let Some(env_path) = env_string(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match serde_json::from_str::<VoterCrawlConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("config loaded from {}", path.display());
                Ok(cfg)
            }
            Err(e) => {
                tracing::warn!(
                    "config parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                Ok(VoterCrawlConfig::default())
            }
        };
    }

    Ok(VoterCrawlConfig::default())
}
