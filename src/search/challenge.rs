use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ResolverError, ResolverResult};

/// What the operator is asked to clear
#[derive(Debug, Clone)]
pub struct ChallengeContext {
    pub engine: &'static str,
    pub query: String,
    pub url: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Resolved,
    GiveUp,
}

/// Clears an anti-bot challenge, or declines to
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    async fn resolve(&self, context: &ChallengeContext) -> ResolverResult<ChallengeOutcome>;
}

/// Asks an operator to solve the challenge and press Enter
pub struct ManualChallengeResolver<R> {
    input: Mutex<R>,
    timeout: Option<Duration>,
}

impl ManualChallengeResolver<BufReader<Stdin>> {
    pub fn stdin(timeout: Option<Duration>) -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()), timeout)
    }
}

impl<R> ManualChallengeResolver<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn with_input(input: R, timeout: Option<Duration>) -> Self {
        Self {
            input: Mutex::new(input),
            timeout,
        }
    }

    async fn wait_for_enter(&self) -> ResolverResult<ChallengeOutcome> {
        let mut input = self.input.lock().await;
        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .await
            .map_err(|e| ResolverError::ChallengeResolver { message: e.to_string() })?;

        if read == 0 {
            warn!("Operator input closed, giving up on challenge");
            return Ok(ChallengeOutcome::GiveUp);
        }
        Ok(ChallengeOutcome::Resolved)
    }
}

#[async_trait]
impl<R> ChallengeResolver for ManualChallengeResolver<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn resolve(&self, context: &ChallengeContext) -> ResolverResult<ChallengeOutcome> {
        eprintln!();
        eprintln!("{} is showing an anti-bot challenge", context.engine);
        eprintln!("   Query: {}", context.query);
        eprintln!("   Page:  {}", context.url);
        eprintln!("   Solve it in the browser window, then press Enter to continue...");

        let outcome = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.wait_for_enter()).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    warn!("No operator response within {}s, giving up on challenge", timeout.as_secs());
                    ChallengeOutcome::GiveUp
                }
            },
            None => self.wait_for_enter().await?,
        };

        info!("Challenge on {} for attempt {}: {:?}", context.engine, context.attempt, outcome);
        Ok(outcome)
    }
}

/// Never waits; for unattended runs
#[derive(Debug, Default, Clone)]
pub struct GiveUpChallengeResolver;

#[async_trait]
impl ChallengeResolver for GiveUpChallengeResolver {
    async fn resolve(&self, context: &ChallengeContext) -> ResolverResult<ChallengeOutcome> {
        warn!("Challenge on {} for '{}', not waiting for an operator", context.engine, context.query);
        Ok(ChallengeOutcome::GiveUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMode {
    Manual,
    GiveUp,
}

/// Build the configured resolver
pub fn build_challenge_resolver(mode: ChallengeMode, timeout_seconds: Option<u64>) -> Box<dyn ChallengeResolver> {
    match mode {
        ChallengeMode::Manual => Box::new(ManualChallengeResolver::stdin(
            timeout_seconds.map(Duration::from_secs),
        )),
        ChallengeMode::GiveUp => Box::new(GiveUpChallengeResolver),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers with a fixed outcome and counts calls
    pub struct ScriptedChallengeResolver {
        pub outcome: ChallengeOutcome,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedChallengeResolver {
        pub fn new(outcome: ChallengeOutcome) -> Self {
            Self { outcome, calls: Arc::new(AtomicUsize::new(0)) }
        }
    }

    #[async_trait]
    impl ChallengeResolver for ScriptedChallengeResolver {
        async fn resolve(&self, _context: &ChallengeContext) -> ResolverResult<ChallengeOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome)
        }
    }
}
