//! Result persistence. A leaf's output file existing is the only checkpoint,
//! so a file must never be visible half-written.

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::error::CrawlError;
use crate::core::types::VoterRecord;

pub const CSV_HEADER: [&str; 11] = [
    "District",
    "Municipality",
    "Ward No",
    "Polling Centre",
    "Voter ID",
    "Name",
    "Age",
    "Gender",
    "Spouse Name",
    "Parent Name",
    "Mother Name",
];

pub trait ResultSink: Send + Sync {
    /// Whether output for this leaf already exists (the leaf is done).
    fn exists(&self, path: &Path) -> bool;

    /// Write `records` to `path`, creating missing directories. Returns the
    /// number of records written.
    fn persist(&self, records: &[VoterRecord], path: &Path) -> Result<usize, CrawlError>;
}

/// UTF-8 CSV files with a fixed header, written via temp file and rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSink;

impl CsvSink {
    pub fn new() -> Self {
        Self
    }
}

fn persistence(path: &Path, reason: impl ToString) -> CrawlError {
    CrawlError::Persistence {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl ResultSink for CsvSink {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn persist(&self, records: &[VoterRecord], path: &Path) -> Result<usize, CrawlError> {
        let dir = path
            .parent()
            .ok_or_else(|| persistence(path, "output path has no parent directory"))?;
        fs::create_dir_all(dir).map_err(|e| persistence(path, e))?;

        // Same directory as the target so the final rename stays on one filesystem.
        let tmp = NamedTempFile::new_in(dir).map_err(|e| persistence(path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp);
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| persistence(path, e))?;
        for record in records {
            writer.serialize(record).map_err(|e| persistence(path, e))?;
        }
        let mut tmp = writer
            .into_inner()
            .map_err(|e| persistence(path, e.error()))?;
        tmp.flush().map_err(|e| persistence(path, e))?;

        tmp.persist(path).map_err(|e| persistence(path, e.error))?;
        debug!("wrote {} record(s) to {}", records.len(), path.display());
        Ok(records.len())
    }
}
