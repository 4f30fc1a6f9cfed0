use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::{ChallengeMarkers, SearchProvider, TargetMatcher};
use crate::error::{ResolverError, ResolverResult};
use crate::pacing::{DelayBounds, Pacer, PauseKind};
use crate::session::RenderingSession;

pub const HOMEPAGE: &str = "https://www.bing.com";
const SEARCH_URL: &str = "https://www.bing.com/search";
const CONSENT_BUTTON: &str = "#bnp_btn_accept";
const RESULT_LINKS: &str = "li.b_algo h2 a";
const RESULTS_SETTLE: DelayBounds = DelayBounds::fixed(3000);

const MARKERS: ChallengeMarkers = ChallengeMarkers {
    content: &["please verify you're not a robot", "captcha"],
    url_prefixes: &[],
};

/// Direct result-page navigation restricted to the target site
pub struct BingSearch {
    target: TargetMatcher,
    target_site: String,
    pacer: Arc<dyn Pacer>,
}

impl BingSearch {
    pub fn new(target: TargetMatcher, target_site: impl Into<String>, pacer: Arc<dyn Pacer>) -> Self {
        Self {
            target,
            target_site: target_site.into(),
            pacer,
        }
    }

    /// Result-page URL for an exact-phrase query on the target site
    pub fn search_url(&self, query: &str) -> ResolverResult<String> {
        let q = format!("\"{}\" site:{}", query, self.target_site);
        Url::parse_with_params(SEARCH_URL, &[("q", q.as_str()), ("first", "1")])
            .map(|u| u.to_string())
            .map_err(|e| ResolverError::internal(format!("cannot build search url: {}", e)))
    }
}

#[async_trait]
impl SearchProvider for BingSearch {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn open_homepage(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        session.navigate(HOMEPAGE).await
    }

    async fn accept_consent(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        if session.click(CONSENT_BUTTON).await? {
            debug!("Accepted Bing consent prompt");
        }
        Ok(())
    }

    async fn detect_challenge(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool> {
        MARKERS.detect(session).await
    }

    async fn execute_query(&self, session: &mut dyn RenderingSession, query: &str) -> ResolverResult<()> {
        let url = self.search_url(query)?;
        session.navigate(&url).await?;
        self.pacer.pause(PauseKind::RenderSettle, RESULTS_SETTLE).await;
        Ok(())
    }

    async fn extract_target_link(&self, session: &mut dyn RenderingSession) -> ResolverResult<Option<String>> {
        let links = session.find_all(RESULT_LINKS).await?;
        Ok(self.target.first_match(&links))
    }
}
