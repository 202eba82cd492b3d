//! Settle policy: every fixed delay the engine relies on lives here.
//!
//! The registry form repopulates its dependent selects asynchronously and the
//! result widget re-renders without a completion signal, so the engine waits.
//! Call sites only name *what* they are waiting for; the policy decides how long.

use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// How the page-size expansion of the result widget is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Sleep `page_size` unconditionally.
    Fixed,
    /// Poll the body row count until it is unchanged for `poll_quiet`.
    Poll,
}

impl FromStr for SettleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(SettleMode::Fixed),
            "poll" | "polling" => Ok(SettleMode::Poll),
            other => Err(format!("unknown settle mode '{}' (expected fixed|poll)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlePolicy {
    /// After selecting a value, before reading the child control.
    pub after_select: Duration,
    /// After forcing the "all rows" page size (fixed mode).
    pub page_size: Duration,
    pub mode: SettleMode,
    pub poll_interval: Duration,
    pub poll_quiet: Duration,
    pub poll_max: Duration,
    /// Politeness pause between leaf extractions.
    pub between_leaves: Duration,
    pub between_leaves_jitter: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            after_select: Duration::from_millis(1000),
            page_size: Duration::from_millis(3000),
            mode: SettleMode::Fixed,
            poll_interval: Duration::from_millis(250),
            poll_quiet: Duration::from_millis(750),
            poll_max: Duration::from_millis(8000),
            between_leaves: Duration::from_millis(1000),
            between_leaves_jitter: Duration::from_millis(250),
        }
    }
}

impl SettlePolicy {
    /// Zero delays everywhere. Used against simulated sessions.
    pub fn immediate() -> Self {
        Self {
            after_select: Duration::ZERO,
            page_size: Duration::ZERO,
            mode: SettleMode::Fixed,
            poll_interval: Duration::ZERO,
            poll_quiet: Duration::ZERO,
            poll_max: Duration::ZERO,
            between_leaves: Duration::ZERO,
            between_leaves_jitter: Duration::ZERO,
        }
    }

    pub async fn after_select(&self) {
        sleep_nonzero(self.after_select).await;
    }

    pub async fn between_leaves(&self) {
        let jitter_ms = self.between_leaves_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            use rand::distr::{Distribution, Uniform};
            let mut rng = rand::rng();
            Uniform::new_inclusive(0u64, jitter_ms)
                .map(|d| d.sample(&mut rng))
                .unwrap_or(0)
        };
        sleep_nonzero(self.between_leaves + Duration::from_millis(extra)).await;
    }

    /// Fixed-mode wait after a page-size change.
    pub async fn after_page_size(&self) {
        sleep_nonzero(self.page_size).await;
    }

    /// Start watching the body row count after a page-size change (poll mode).
    pub fn row_watch(&self) -> RowWatch {
        RowWatch {
            interval: self.poll_interval,
            quiet: self.poll_quiet,
            max: self.poll_max,
            started: Instant::now(),
            stable_since: Instant::now(),
            last: None,
            observed: false,
        }
    }
}

/// Row-count stability tracker for [`SettleMode::Poll`].
///
/// The caller owns the probing: feed each observed count to [`RowWatch::observe`]
/// and [`RowWatch::pause`] between probes until it reports the widget settled.
#[derive(Debug)]
pub struct RowWatch {
    interval: Duration,
    quiet: Duration,
    max: Duration,
    started: Instant,
    stable_since: Instant,
    last: Option<usize>,
    observed: bool,
}

impl RowWatch {
    /// Record a count. Returns `true` once the count has been readable and
    /// unchanged for the quiet window, or the overall bound has elapsed.
    pub fn observe(&mut self, count: Option<usize>) -> bool {
        if !self.observed || count != self.last {
            self.observed = true;
            self.last = count;
            self.stable_since = Instant::now();
        }
        if self.started.elapsed() >= self.max {
            debug!("settle: row count not stable after {:?}", self.max);
            return true;
        }
        if self.last.is_some() && self.stable_since.elapsed() >= self.quiet {
            debug!(
                "settle: row count stable at {:?} after {}ms",
                self.last,
                self.started.elapsed().as_millis()
            );
            return true;
        }
        false
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }

    pub async fn pause(&self) {
        sleep_nonzero(self.interval).await;
    }
}

async fn sleep_nonzero(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
