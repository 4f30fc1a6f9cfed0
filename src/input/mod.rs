//! Query sources: a local CSV file or a published spreadsheet export.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ResolverError, ResolverResult};

pub const DEFAULT_COLUMN: &str = "prooflink";

/// Produces the ordered query list for a batch
#[async_trait]
pub trait QuerySource: Send + Sync {
    fn describe(&self) -> String;

    async fn load(&self) -> ResolverResult<Vec<String>>;
}

/// Read one named column from CSV text; values are trimmed and blanks dropped
pub fn read_column<R: std::io::Read>(reader: R, column: &str) -> ResolverResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let index = reader.headers()?
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| ResolverError::InputColumnMissing { column: column.to_string() })?;

    let mut queries = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(value) = row.get(index).map(str::trim).filter(|v| !v.is_empty()) {
            queries.push(value.to_string());
        }
    }

    debug!("Read {} queries from column '{}'", queries.len(), column);
    Ok(queries)
}

pub struct CsvFileSource {
    path: PathBuf,
    column: String,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, column: &str) -> Self {
        Self {
            path: path.into(),
            column: column.to_string(),
        }
    }
}

#[async_trait]
impl QuerySource for CsvFileSource {
    fn describe(&self) -> String {
        format!("CSV file {}", self.path.display())
    }

    async fn load(&self) -> ResolverResult<Vec<String>> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| ResolverError::input(format!("cannot read {}: {}", self.path.display(), e)))?;
        read_column(content.as_slice(), &self.column)
    }
}

/// Spreadsheet shared through its CSV export link
pub struct SpreadsheetSource {
    client: reqwest::Client,
    url: String,
    column: String,
}

impl SpreadsheetSource {
    pub fn new(client: reqwest::Client, url: &str, column: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            column: column.to_string(),
        }
    }
}

#[async_trait]
impl QuerySource for SpreadsheetSource {
    fn describe(&self) -> String {
        format!("spreadsheet {}", self.url)
    }

    async fn load(&self) -> ResolverResult<Vec<String>> {
        info!("Downloading spreadsheet export from {}", self.url);
        let response = self.client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ResolverError::input(format!("spreadsheet download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::input(format!("spreadsheet download failed: HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolverError::input(format!("spreadsheet download failed: {}", e)))?;
        read_column(body.as_ref(), &self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    File,
    Spreadsheet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub kind: InputKind,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub column: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            kind: InputKind::File,
            path: Some(PathBuf::from("profiles.csv")),
            url: None,
            column: DEFAULT_COLUMN.to_string(),
        }
    }
}

/// Build the configured source
pub fn build_source(config: &InputConfig) -> ResolverResult<Box<dyn QuerySource>> {
    match config.kind {
        InputKind::File => {
            let path = config.path.clone()
                .ok_or_else(|| ResolverError::config("input.path is required for file input"))?;
            Ok(Box::new(CsvFileSource::new(path, &config.column)))
        }
        InputKind::Spreadsheet => {
            let url = config.url.as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| ResolverError::config("input.url is required for spreadsheet input"))?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?;
            Ok(Box::new(SpreadsheetSource::new(client, url, &config.column)))
        }
    }
}
