//! Native browser management using `chromiumoxide`.
//!
//! This module is the **single source of truth** for:
//! * Finding a usable browser executable (env override → PATH → well-known paths).
//! * Building the launch config (headless or headed, UA rotation, CI-safe flags).
//! * `wait_until_ready`: document-ready + network-quiet heuristic after navigation.
//!
//! The crawl engine never touches these directly; it talks to
//! [`super::session::ChromeSession`] through the `SessionDriver` trait.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use rand::seq::IndexedRandom;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ── User-Agent pool ──────────────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen Chromium desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `explicit` (config file / `CHROME_EXECUTABLE`), when it exists
/// 2. PATH lookup via `which`
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable(explicit: Option<&str>) -> Option<String> {
    if let Some(p) = explicit {
        if Path::new(p).exists() {
            return Some(p.to_string());
        }
    }

    for exe in [
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
        "brave-browser",
        "brave",
    ] {
        if let Ok(found) = which::which(exe) {
            return Some(found.to_string_lossy().to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
            "/snap/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Launch config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl LaunchOptions {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            headless: true,
            user_agent: None,
            width: 1366,
            height: 900,
        }
    }
}

/// Build a `BrowserConfig` for the registry session.
///
/// `--no-sandbox` / `--disable-dev-shm-usage` keep it working in containers.
pub fn build_launch_config(opts: &LaunchOptions) -> Result<BrowserConfig> {
    let ua = opts
        .user_agent
        .clone()
        .unwrap_or_else(|| random_user_agent().to_string());

    let mut builder = BrowserConfig::builder()
        .chrome_executable(&opts.executable)
        .viewport(Viewport {
            width: opts.width,
            height: opts.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(opts.width, opts.height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if !opts.headless {
        builder = builder.with_head();
    }

    info!(
        "browser config: {} ({}, {}x{})",
        opts.executable,
        if opts.headless { "headless" } else { "headed" },
        opts.width,
        opts.height
    );

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Ready wait ───────────────────────────────────────────────────────────────

/// Wait until `document.readyState == "complete"` and no new resource entries
/// appear for `quiet_ms`, or until `timeout_ms` elapses.
///
/// Polls `performance.getEntriesByType("resource").length` every 200 ms.
pub async fn wait_until_ready(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let poll = Duration::from_millis(200);
    let start = Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            debug!("wait_until_ready: timeout after {}ms", timeout_ms);
            return;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let complete = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .map(|s| s == "complete")
            .unwrap_or(false);

        if !complete {
            stable_since = Instant::now();
            last_count = count;
        } else if count != last_count {
            last_count = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            debug!(
                "wait_until_ready: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            return;
        }

        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_is_from_pool() {
        let ua = random_user_agent();
        assert!(DESKTOP_USER_AGENTS.contains(&ua));
    }

    #[test]
    fn test_explicit_executable_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, b"").unwrap();
        let fake = fake.to_string_lossy().to_string();
        assert_eq!(find_chrome_executable(Some(&fake)), Some(fake.clone()));

        let missing = dir.path().join("missing-chrome");
        let found = find_chrome_executable(Some(&missing.to_string_lossy()));
        assert_ne!(found.as_deref(), Some(missing.to_string_lossy().as_ref()));
    }

    #[test]
    fn test_launch_options_default_headless() {
        let opts = LaunchOptions::new("/usr/bin/chromium");
        assert!(opts.headless);
        assert!(opts.user_agent.is_none());
    }
}
