//! Batch driver: search, extract, record, and rotate the egress identity
//! after repeated access walls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ResolverError, ResolverResult};
use crate::extract::{ExtractionResult, Extractor};
use crate::logging::{LogContext, PerformanceLogger};
use crate::output::RecordSink;
use crate::pacing::{DelayBounds, Pacer, PauseKind};
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::search::SearchDriver;
use crate::session::{RenderingSession, SessionProvider};
use crate::{log_error, log_info, log_warn};

/// Outcome class of one query, written to the `IPChange` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStatus {
    Ok,
    NotFoundOrChallenge,
    AccessWall,
    Rotated,
}

impl ResolutionStatus {
    /// Output column value; empty for a clean result
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Ok => "",
            ResolutionStatus::NotFoundOrChallenge => "not_found_or_challenge",
            ResolutionStatus::AccessWall => "access_wall",
            ResolutionStatus::Rotated => "rotated",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResolutionStatus::Ok => "ok",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for ResolutionStatus {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "ok" => Ok(ResolutionStatus::Ok),
            "not_found_or_challenge" => Ok(ResolutionStatus::NotFoundOrChallenge),
            "access_wall" => Ok(ResolutionStatus::AccessWall),
            "rotated" => Ok(ResolutionStatus::Rotated),
            other => Err(ResolverError::internal(format!("unknown status '{}'", other))),
        }
    }
}

impl Serialize for ResolutionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResolutionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    #[serde(rename = "Original")]
    pub original: String,
    #[serde(rename = "ResolvedURL")]
    pub resolved_url: String,
    #[serde(rename = "FullName")]
    pub full_name: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "IPChange")]
    pub status: ResolutionStatus,
}

impl ResolutionRecord {
    pub fn not_found(query: &str) -> Self {
        Self::bare(query, "", ResolutionStatus::NotFoundOrChallenge)
    }

    pub fn access_wall(query: &str, url: &str) -> Self {
        Self::bare(query, url, ResolutionStatus::AccessWall)
    }

    pub fn resolved(query: &str, url: &str, extraction: &ExtractionResult) -> Self {
        Self {
            original: query.to_string(),
            resolved_url: url.to_string(),
            full_name: extraction.name.clone().unwrap_or_default(),
            location: extraction.location.clone().unwrap_or_default(),
            status: ResolutionStatus::Ok,
        }
    }

    fn bare(query: &str, url: &str, status: ResolutionStatus) -> Self {
        Self {
            original: query.to_string(),
            resolved_url: url.to_string(),
            full_name: String::new(),
            location: String::new(),
            status,
        }
    }
}

/// What the access-wall counter decided for one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallDecision {
    Reset,
    Counted(u32),
    Rotate,
}

/// Consecutive access walls; resets on any other outcome and on reaching the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWallCounter {
    threshold: u32,
    consecutive: u32,
}

impl AccessWallCounter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, consecutive: 0 }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn observe(&mut self, access_walled: bool) -> WallDecision {
        if !access_walled {
            self.consecutive = 0;
            return WallDecision::Reset;
        }

        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            return WallDecision::Rotate;
        }
        WallDecision::Counted(self.consecutive)
    }
}

/// Session and endpoint of the current epoch, plus the wall counter
pub struct SessionState {
    session: Option<Box<dyn RenderingSession>>,
    endpoint: Option<ProxyEndpoint>,
    walls: AccessWallCounter,
}

impl SessionState {
    pub fn new(session: Box<dyn RenderingSession>, endpoint: Option<ProxyEndpoint>, threshold: u32) -> Self {
        Self {
            session: Some(session),
            endpoint,
            walls: AccessWallCounter::new(threshold),
        }
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn walls(&self) -> &AccessWallCounter {
        &self.walls
    }

    fn session_mut(&mut self) -> ResolverResult<&mut (dyn RenderingSession + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| ResolverError::internal("no active rendering session"))
    }

    /// Install the next epoch; the previous session must already be released
    fn replace(&mut self, session: Box<dyn RenderingSession>, endpoint: Option<ProxyEndpoint>) {
        self.session = Some(session);
        self.endpoint = endpoint;
    }

    /// Close the session once; later calls do nothing and close failures are only logged
    pub async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close rendering session: {}", e);
            }
        }
    }
}

/// Counters for one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub processed: usize,
    pub by_status: HashMap<String, usize>,
    pub rotations: usize,
    pub last_endpoint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    fn new(batch_id: String) -> Self {
        Self {
            batch_id,
            processed: 0,
            by_status: HashMap::new(),
            rotations: 0,
            last_endpoint: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn record(&mut self, status: ResolutionStatus) {
        self.processed += 1;
        *self.by_status.entry(status.label().to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, status: ResolutionStatus) -> usize {
        self.by_status.get(status.label()).copied().unwrap_or(0)
    }
}

/// Drives a batch of queries through one session at a time
pub struct Resolver {
    search: SearchDriver,
    extractor: Extractor,
    sessions: Box<dyn SessionProvider>,
    proxies: Option<ProxyPool>,
    pacer: Arc<dyn Pacer>,
    inter_query: DelayBounds,
    access_wall_threshold: u32,
}

impl Resolver {
    pub fn new(
        search: SearchDriver,
        extractor: Extractor,
        sessions: Box<dyn SessionProvider>,
        proxies: Option<ProxyPool>,
        pacer: Arc<dyn Pacer>,
        inter_query: DelayBounds,
        access_wall_threshold: u32,
    ) -> Self {
        Self {
            search,
            extractor,
            sessions,
            proxies,
            pacer,
            inter_query,
            access_wall_threshold,
        }
    }

    /// Resolve every query in order, appending one record per query to `sink`.
    ///
    /// Failing to acquire the first session or to rotate halts the batch; the
    /// records already appended stay in the sink. The session is released on
    /// every exit path.
    pub async fn run(&mut self, queries: &[String], sink: &mut dyn RecordSink) -> ResolverResult<BatchSummary> {
        let batch_id = Uuid::new_v4().to_string();
        let mut summary = BatchSummary::new(batch_id.clone());
        let context = LogContext::new("resolver", "run")
            .with_batch_id(&batch_id)
            .with_number_field("queries", queries.len() as i64)
            .with_string_field("engine", self.search.engine_name());
        let perf_logger = PerformanceLogger::new(context.clone());

        let (session, endpoint) = match self.acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                log_error!(context.clone().with_error_category(e.category()), e, "Could not start batch");
                return Err(e);
            }
        };
        summary.last_endpoint = endpoint.as_ref().map(ToString::to_string);
        let mut state = SessionState::new(session, endpoint, self.access_wall_threshold);

        log_info!(context, "Starting batch");
        let outcome = self.process_all(&mut state, queries, sink, &mut summary).await;
        state.release().await;
        summary.finished_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                perf_logger.finish_with_status("Batch completed", "completed");
                Ok(summary)
            }
            Err(e) => {
                log_error!(
                    context.with_error_category(e.category()),
                    e,
                    format!("Batch halted after {} of {} queries", summary.processed, queries.len())
                );
                Err(e)
            }
        }
    }

    /// First endpoint (if proxied) and a session on it
    async fn acquire(&mut self) -> ResolverResult<(Box<dyn RenderingSession>, Option<ProxyEndpoint>)> {
        let endpoint = match self.proxies.as_mut() {
            Some(pool) => Some(pool.select_endpoint().await?),
            None => None,
        };
        let session = self.sessions.open(endpoint.as_ref()).await?;
        Ok((session, endpoint))
    }

    async fn process_all(
        &mut self,
        state: &mut SessionState,
        queries: &[String],
        sink: &mut dyn RecordSink,
        summary: &mut BatchSummary,
    ) -> ResolverResult<()> {
        for (index, query) in queries.iter().enumerate() {
            let context = LogContext::new("resolver", "query")
                .with_batch_id(&summary.batch_id)
                .with_query(query)
                .with_number_field("index", index as i64);

            let mut record = self.process_query(state, query).await?;
            let walled = record.status == ResolutionStatus::AccessWall;

            match state.walls.observe(walled) {
                WallDecision::Rotate => {
                    record.status = ResolutionStatus::Rotated;
                    sink.append(&record).await?;
                    summary.record(record.status);
                    log_warn!(
                        context.clone().with_url(&record.resolved_url).with_status(record.status.label()),
                        "Access wall threshold reached, rotating egress"
                    );
                    self.rotate(state).await?;
                    summary.rotations += 1;
                    summary.last_endpoint = state.endpoint().map(ToString::to_string);
                }
                decision => {
                    if let WallDecision::Counted(count) = decision {
                        debug!("Consecutive access walls: {}", count);
                    }
                    sink.append(&record).await?;
                    summary.record(record.status);
                    log_info!(
                        context.with_url(&record.resolved_url).with_status(record.status.label()),
                        "Query recorded"
                    );
                }
            }

            if index + 1 < queries.len() {
                self.pacer.pause(PauseKind::InterQuery, self.inter_query).await;
            }
        }
        Ok(())
    }

    async fn process_query(&self, state: &mut SessionState, query: &str) -> ResolverResult<ResolutionRecord> {
        let session = state.session_mut()?;

        let result = self.search.resolve(session, query).await;
        let Some(url) = result.url else {
            return Ok(ResolutionRecord::not_found(query));
        };

        match self.extractor.extract(session, &url).await {
            Ok(extraction) if extraction.access_walled => Ok(ResolutionRecord::access_wall(query, &url)),
            Ok(extraction) => Ok(ResolutionRecord::resolved(query, &url, &extraction)),
            Err(e) => {
                warn!("Could not load {} for '{}': {}", url, query, e);
                let mut record = ResolutionRecord::not_found(query);
                record.resolved_url = url;
                Ok(record)
            }
        }
    }

    /// Release the old session, then open one on a freshly drawn endpoint
    async fn rotate(&mut self, state: &mut SessionState) -> ResolverResult<()> {
        state.release().await;

        let endpoint = match self.proxies.as_mut() {
            Some(pool) => Some(
                pool.rotate()
                    .await
                    .map_err(|e| ResolverError::rotation(format!("no replacement endpoint: {}", e)))?,
            ),
            None => None,
        };

        let session = self.sessions
            .open(endpoint.as_ref())
            .await
            .map_err(|e| ResolverError::rotation(format!("could not open replacement session: {}", e)))?;

        match &endpoint {
            Some(endpoint) => info!("Rotated to proxy {}", endpoint),
            None => info!("Re-opened session on a direct connection"),
        }
        state.replace(session, endpoint);
        Ok(())
    }
}
