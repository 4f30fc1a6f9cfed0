use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ChallengeMarkers, SearchProvider, TargetMatcher};
use crate::error::ResolverResult;
use crate::pacing::{DelayBounds, Pacer, PauseKind};
use crate::session::RenderingSession;

pub const HOMEPAGE: &str = "https://www.google.com";
const CONSENT_BUTTON: &str = "#L2AGLb";
const SEARCH_BOX: &str = "[name='q']";
const RESULT_LINKS: &str = "div.g a";

const MARKERS: ChallengeMarkers = ChallengeMarkers {
    content: &["unusual traffic", "captcha", "verify you're a human"],
    url_prefixes: &["https://www.google.com/sorry"],
};

/// Homepage form submission with a human-like typing pause
pub struct GoogleSearch {
    target: TargetMatcher,
    pacer: Arc<dyn Pacer>,
    typing: DelayBounds,
}

impl GoogleSearch {
    pub fn new(target: TargetMatcher, pacer: Arc<dyn Pacer>, typing: DelayBounds) -> Self {
        Self { target, pacer, typing }
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn open_homepage(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        session.navigate(HOMEPAGE).await
    }

    async fn accept_consent(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        if session.click(CONSENT_BUTTON).await? {
            debug!("Accepted Google consent prompt");
        }
        Ok(())
    }

    async fn detect_challenge(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool> {
        MARKERS.detect(session).await
    }

    async fn execute_query(&self, session: &mut dyn RenderingSession, query: &str) -> ResolverResult<()> {
        session.type_text(SEARCH_BOX, query).await?;
        self.pacer.pause(PauseKind::Typing, self.typing).await;
        session.press_enter(SEARCH_BOX).await
    }

    async fn extract_target_link(&self, session: &mut dyn RenderingSession) -> ResolverResult<Option<String>> {
        let links = session.find_all(RESULT_LINKS).await?;
        Ok(self.target.first_match(&links))
    }
}
