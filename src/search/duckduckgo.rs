use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ChallengeMarkers, SearchProvider, TargetMatcher};
use crate::error::{ResolverError, ResolverResult};
use crate::pacing::{DelayBounds, Pacer, PauseKind};
use crate::session::RenderingSession;

pub const HOMEPAGE: &str = "https://duckduckgo.com/";
const HOMEPAGE_SETTLE: DelayBounds = DelayBounds::fixed(2000);
const CONSENT_BUTTON: &str = "button[data-testid='cookie-consent-button']";

/// The homepage box has been renamed several times
const SEARCH_BOXES: &[&str] = &[
    "input[name='q']",
    "#search_form_input_homepage",
    "#searchbox_input",
    "#search_form_input",
];

/// Newer layout first, then the html-only layout
const RESULT_LINKS: &[&str] = &[
    "article a[data-testid='result-title-a']",
    "a.result__a",
    ".results a",
];

const MARKERS: ChallengeMarkers = ChallengeMarkers {
    content: &["unfortunately, bots use duckduckgo too", "anomaly-modal", "challenge-form"],
    url_prefixes: &[],
};

/// Client-rendered results located through fallback selectors
pub struct DuckDuckGoSearch {
    target: TargetMatcher,
    pacer: Arc<dyn Pacer>,
}

impl DuckDuckGoSearch {
    pub fn new(target: TargetMatcher, pacer: Arc<dyn Pacer>) -> Self {
        Self { target, pacer }
    }

    async fn find_search_box(&self, session: &mut dyn RenderingSession) -> ResolverResult<&'static str> {
        for &selector in SEARCH_BOXES {
            if session.find_first(selector).await?.is_some() {
                return Ok(selector);
            }
        }
        Err(ResolverError::element_not_found(SEARCH_BOXES.join(", ")))
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn open_homepage(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        session.navigate(HOMEPAGE).await?;
        self.pacer.pause(PauseKind::HomepageSettle, HOMEPAGE_SETTLE).await;
        Ok(())
    }

    async fn accept_consent(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        if session.click(CONSENT_BUTTON).await? {
            debug!("Accepted DuckDuckGo consent prompt");
        }
        Ok(())
    }

    async fn detect_challenge(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool> {
        MARKERS.detect(session).await
    }

    async fn execute_query(&self, session: &mut dyn RenderingSession, query: &str) -> ResolverResult<()> {
        let search_box = self.find_search_box(session).await?;
        debug!("Using DuckDuckGo search box '{}'", search_box);
        session.type_text(search_box, query).await?;
        session.press_enter(search_box).await
    }

    async fn extract_target_link(&self, session: &mut dyn RenderingSession) -> ResolverResult<Option<String>> {
        for selector in RESULT_LINKS {
            let links = session.find_all(selector).await?;
            if let Some(link) = self.target.first_match(&links) {
                return Ok(Some(link));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::testing::RecordingPacer;
    use crate::session::fake::{FakePage, FakeWeb};

    fn duckduckgo(pacer: Arc<RecordingPacer>) -> DuckDuckGoSearch {
        DuckDuckGoSearch::new(TargetMatcher::default(), pacer)
    }

    #[tokio::test]
    async fn test_falls_back_to_legacy_search_box() {
        let web = FakeWeb::new()
            .page(HOMEPAGE, FakePage::new()
                .text("#search_form_input", "")
                .submit_to("https://duckduckgo.com/html"))
            .page("https://duckduckgo.com/html", FakePage::new()
                .link(".results a", "https://www.linkedin.com/in/jane-doe"));
        let pacer = Arc::new(RecordingPacer::default());
        let engine = duckduckgo(pacer.clone());
        let mut session = web.session();

        engine.open_homepage(&mut session).await.unwrap();
        assert_eq!(pacer.kinds(), vec![PauseKind::HomepageSettle]);
        engine.execute_query(&mut session, "Jane Doe").await.unwrap();

        assert_eq!(web.state().typed, vec![("#search_form_input".to_string(), "Jane Doe".to_string())]);
        assert_eq!(
            engine.extract_target_link(&mut session).await.unwrap().as_deref(),
            Some("https://www.linkedin.com/in/jane-doe")
        );
    }

    #[tokio::test]
    async fn test_result_selectors_tried_in_order() {
        let web = FakeWeb::new()
            .page(HOMEPAGE, FakePage::new()
                .link("article a[data-testid='result-title-a']", "https://www.linkedin.com/in/first")
                .link("a.result__a", "https://www.linkedin.com/in/second"));
        let engine = duckduckgo(Arc::new(RecordingPacer::default()));
        let mut session = web.session();

        engine.open_homepage(&mut session).await.unwrap();
        let link = engine.extract_target_link(&mut session).await.unwrap();
        assert_eq!(link.as_deref(), Some("https://www.linkedin.com/in/first"));
        assert!(!web.queried().contains(&"a.result__a".to_string()));
    }

    #[tokio::test]
    async fn test_unwraps_html_redirect_links() {
        let web = FakeWeb::new()
            .page(HOMEPAGE, FakePage::new().link(
                "a.result__a",
                "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.linkedin.com%2Fin%2Fjane-doe&rut=abc",
            ));
        let engine = duckduckgo(Arc::new(RecordingPacer::default()));
        let mut session = web.session();

        engine.open_homepage(&mut session).await.unwrap();
        let link = engine.extract_target_link(&mut session).await.unwrap();
        assert_eq!(link.as_deref(), Some("https://www.linkedin.com/in/jane-doe"));
    }

    #[tokio::test]
    async fn test_anomaly_modal_is_a_challenge() {
        let web = FakeWeb::new()
            .page(HOMEPAGE, FakePage::new().source("<div class=\"anomaly-modal\"></div>"));
        let engine = duckduckgo(Arc::new(RecordingPacer::default()));
        let mut session = web.session();

        engine.open_homepage(&mut session).await.unwrap();
        assert!(engine.detect_challenge(&mut session).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_search_box_is_element_not_found() {
        let web = FakeWeb::new().page(HOMEPAGE, FakePage::new());
        let engine = duckduckgo(Arc::new(RecordingPacer::default()));
        let mut session = web.session();

        engine.open_homepage(&mut session).await.unwrap();
        let err = engine.execute_query(&mut session, "Jane Doe").await.unwrap_err();
        assert!(matches!(err, ResolverError::ElementNotFound { .. }));
    }
}
