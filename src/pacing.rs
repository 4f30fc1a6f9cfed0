use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Inclusive millisecond range a pause is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayBounds {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self { min_ms: ms, max_ms: ms }
    }

    pub fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }

    /// Draw a uniform duration from the range
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_ms >= self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

/// Why the pipeline is pausing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    HomepageSettle,
    Typing,
    PostQuery,
    RetryBackoff,
    RenderSettle,
    InterQuery,
}

impl std::fmt::Display for PauseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseKind::HomepageSettle => write!(f, "homepage settle"),
            PauseKind::Typing => write!(f, "typing"),
            PauseKind::PostQuery => write!(f, "post-query"),
            PauseKind::RetryBackoff => write!(f, "retry backoff"),
            PauseKind::RenderSettle => write!(f, "render settle"),
            PauseKind::InterQuery => write!(f, "inter-query"),
        }
    }
}

/// Deliberate suspension of the whole pipeline
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, kind: PauseKind, bounds: DelayBounds);
}

/// Sleeps on the tokio timer for a uniformly drawn duration
#[derive(Debug, Default, Clone)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, kind: PauseKind, bounds: DelayBounds) {
        let delay = bounds.sample(&mut rand::thread_rng());
        if delay.is_zero() {
            return;
        }
        debug!("Pacing: waiting {}ms ({})", delay.as_millis(), kind);
        tokio::time::sleep(delay).await;
    }
}

/// Pause ranges for every deliberate wait in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub homepage_settle: DelayBounds,
    pub typing: DelayBounds,
    pub post_query: DelayBounds,
    pub retry_backoff: DelayBounds,
    pub render_settle: DelayBounds,
    pub inter_query: DelayBounds,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            homepage_settle: DelayBounds::new(1500, 3000),
            typing: DelayBounds::new(500, 1500),
            post_query: DelayBounds::new(2000, 4000),
            retry_backoff: DelayBounds::new(2000, 5000),
            render_settle: DelayBounds::new(1000, 2000),
            inter_query: DelayBounds::new(2000, 5000),
        }
    }
}

impl PacingConfig {
    /// Every range, labelled, for validation
    pub fn all(&self) -> [(&'static str, DelayBounds); 6] {
        [
            ("homepage_settle", self.homepage_settle),
            ("typing", self.typing),
            ("post_query", self.post_query),
            ("retry_backoff", self.retry_backoff),
            ("render_settle", self.render_settle),
            ("inter_query", self.inter_query),
        ]
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_stays_in_bounds() {
        let bounds = DelayBounds::new(200, 300);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = bounds.sample(&mut rng).as_millis() as u64;
            assert!((200..=300).contains(&d));
        }
    }

    #[test]
    fn test_fixed_and_inverted_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(DelayBounds::fixed(3000).sample(&mut rng), Duration::from_millis(3000));
        assert!(!DelayBounds::new(10, 5).is_valid());
        assert_eq!(DelayBounds::new(10, 5).sample(&mut rng), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_zero_pause_returns_immediately() {
        let start = std::time::Instant::now();
        TokioPacer.pause(PauseKind::InterQuery, DelayBounds::fixed(0)).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_default_pacing_is_valid() {
        for (name, bounds) in PacingConfig::default().all() {
            assert!(bounds.is_valid(), "{} has inverted bounds", name);
        }
    }
}
