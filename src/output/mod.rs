//! Append-only persistence of resolution records.

use async_trait::async_trait;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ResolverError, ResolverResult};
use crate::resolver::ResolutionRecord;

pub const HEADER: [&str; 5] = ["Original", "ResolvedURL", "FullName", "Location", "IPChange"];

/// Receives each record as soon as it is final
#[async_trait]
pub trait RecordSink: Send {
    async fn append(&mut self, record: &ResolutionRecord) -> ResolverResult<()>;
}

/// Appends rows to a CSV file, writing the header only into a new or empty file
pub struct CsvRecordSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    written: usize,
}

impl CsvRecordSink {
    pub fn open(path: impl AsRef<Path>) -> ResolverResult<Self> {
        let path = path.as_ref().to_path_buf();
        let output_error = |e: &dyn std::fmt::Display| ResolverError::Output {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| output_error(&e))?;
        }

        let needs_header = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| output_error(&e))?;

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(HEADER)?;
            writer.flush()?;
            debug!("Wrote header to new output file {}", path.display());
        } else {
            info!("Appending to existing output file {}", path.display());
        }

        Ok(Self { path, writer, written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

#[async_trait]
impl RecordSink for CsvRecordSink {
    async fn append(&mut self, record: &ResolutionRecord) -> ResolverResult<()> {
        self.writer.write_record([
            record.original.as_str(),
            record.resolved_url.as_str(),
            record.full_name.as_str(),
            record.location.as_str(),
            record.status.as_str(),
        ])?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("profile_results.csv"),
        }
    }
}
