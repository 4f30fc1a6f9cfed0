use crate::pacing::DelayBounds;

/// Why a search attempt ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// A transient session or navigation fault
    Fault,
    /// A challenge was shown and cleared by the resolver
    ChallengeResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { backoff: Option<DelayBounds> },
    Exhausted,
}

/// Bounded retry for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: DelayBounds,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: DelayBounds) -> Self {
        Self { max_attempts, backoff }
    }

    /// Decide what follows a failed attempt; `attempts_used` includes it
    pub fn after_failure(&self, attempts_used: u32, failure: AttemptFailure) -> RetryDecision {
        if attempts_used >= self.max_attempts {
            return RetryDecision::Exhausted;
        }

        match failure {
            AttemptFailure::Fault => RetryDecision::Retry { backoff: Some(self.backoff) },
            AttemptFailure::ChallengeResolved => RetryDecision::Retry { backoff: None },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, DelayBounds::new(2000, 5000))
    }
}
