//! Failure snapshots: a PNG of the tab at the moment a leaf faulted.
//!
//! A capture that fails is logged and otherwise ignored.
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::types::Leaf;
use crate::features::paths::sanitize;
use crate::scraping::session::SessionDriver;

/// `<dir>/<district>_<municipality>_ward<ward>_<centre>_<millis>.png`
pub fn snapshot_path(dir: &Path, leaf: &Leaf) -> PathBuf {
    let ts = chrono::Utc::now().timestamp_millis();
    let stem = format!(
        "{}_{}_ward{}_{}_{}",
        sanitize(leaf.district()),
        sanitize(leaf.municipality()),
        sanitize(leaf.ward()),
        sanitize(leaf.centre()),
        ts
    )
    .replace(' ', "_");
    dir.join(format!("{}.png", stem))
}

/// Capture the current tab for `leaf` into `dir`. Returns the file written.
pub async fn capture_failure<S: SessionDriver + ?Sized>(
    session: &mut S,
    dir: &Path,
    leaf: &Leaf,
) -> Option<PathBuf> {
    let path = snapshot_path(dir, leaf);
    match session.screenshot(&path).await {
        Ok(()) => {
            info!("diagnostic screenshot → {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("diagnostic screenshot failed (non-fatal): {}", e);
            None
        }
    }
}
