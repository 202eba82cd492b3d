use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::core::error::CrawlError;

/// Counters for one crawl run (or the merge of several partitioned runs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Leaves where extraction was attempted.
    pub leaves_visited: usize,
    pub leaves_with_data: usize,
    pub leaves_empty: usize,
    pub leaves_skipped_existing: usize,
    pub navigation_faults: usize,
    pub extraction_timeouts: usize,
    pub no_submit_control: usize,
    pub persistence_faults: usize,
    pub collisions: usize,
    pub records_written: usize,
    pub cap_reached: bool,
    pub stopped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::start()
    }
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            leaves_visited: 0,
            leaves_with_data: 0,
            leaves_empty: 0,
            leaves_skipped_existing: 0,
            navigation_faults: 0,
            extraction_timeouts: 0,
            no_submit_control: 0,
            persistence_faults: 0,
            collisions: 0,
            records_written: 0,
            cap_reached: false,
            stopped: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Count a leaf fault under its category.
    pub fn record_fault(&mut self, err: &CrawlError) {
        match err {
            CrawlError::Navigation { .. } => self.navigation_faults += 1,
            CrawlError::NoSubmitControl => self.no_submit_control += 1,
            CrawlError::Persistence { .. } => self.persistence_faults += 1,
            // Driver failure mid-extraction.
            CrawlError::Extraction(_) => self.navigation_faults += 1,
            CrawlError::Startup(_) | CrawlError::Config(_) => {}
        }
    }

    pub fn faults(&self) -> usize {
        self.navigation_faults + self.no_submit_control + self.persistence_faults
    }

    /// Fold a partition's counters into this one.
    pub fn merge(&mut self, other: &RunSummary) {
        self.leaves_visited += other.leaves_visited;
        self.leaves_with_data += other.leaves_with_data;
        self.leaves_empty += other.leaves_empty;
        self.leaves_skipped_existing += other.leaves_skipped_existing;
        self.navigation_faults += other.navigation_faults;
        self.extraction_timeouts += other.extraction_timeouts;
        self.no_submit_control += other.no_submit_control;
        self.persistence_faults += other.persistence_faults;
        self.collisions += other.collisions;
        self.records_written += other.records_written;
        self.cap_reached |= other.cap_reached;
        self.stopped |= other.stopped;
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = match (self.finished_at, other.finished_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn log(&self) {
        let elapsed = self
            .finished_at
            .map(|f| (f - self.started_at).num_seconds())
            .unwrap_or_default();
        info!(
            "crawl finished in {}s: {} leaves visited ({} with data, {} empty), {} skipped as existing, {} records written",
            elapsed,
            self.leaves_visited,
            self.leaves_with_data,
            self.leaves_empty,
            self.leaves_skipped_existing,
            self.records_written
        );
        info!(
            "faults: navigation={} timeouts={} no_submit={} persistence={} collisions={} cap_reached={} stopped={}",
            self.navigation_faults,
            self.extraction_timeouts,
            self.no_submit_control,
            self.persistence_faults,
            self.collisions,
            self.cap_reached,
            self.stopped
        );
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}
