//! Search engines as an indirection layer from a query to a profile URL.
//!
//! Each engine implements the same capability set; `SearchDriver` owns the
//! per-query protocol of attempts, challenge escalation and backoff.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub mod bing;
pub mod challenge;
pub mod duckduckgo;
pub mod google;
pub mod retry;

use crate::error::{ResolverError, ResolverResult};
use crate::logging::LogContext;
use crate::pacing::{Pacer, PacingConfig, PauseKind};
use crate::session::{PageElement, RenderingSession};
use crate::{log_info, log_warn};

use bing::BingSearch;
use challenge::{ChallengeContext, ChallengeMode, ChallengeOutcome, ChallengeResolver};
use duckduckgo::DuckDuckGoSearch;
use google::GoogleSearch;
use retry::{AttemptFailure, RetryDecision, RetryPolicy};

pub const DEFAULT_TARGET_PATTERN: &str = r"linkedin\.com/in/";
pub const DEFAULT_TARGET_SITE: &str = "linkedin.com/in/";

/// Engine redirect endpoints: host label, path prefix, parameters carrying the target
const REDIRECTORS: &[(&str, &str, &[&str])] = &[
    ("google", "/url", &["q", "url"]),
    ("duckduckgo", "/l/", &["uddg"]),
];

/// Outcome of resolving one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub url: Option<String>,
    pub challenge_encountered: bool,
}

impl SearchResult {
    fn found(url: Option<String>, challenge_encountered: bool) -> Self {
        Self { url, challenge_encountered }
    }

    fn blocked() -> Self {
        Self { url: None, challenge_encountered: true }
    }
}

/// Recognizes result links that point at a profile
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    pattern: Regex,
}

impl TargetMatcher {
    pub fn new(pattern: &str) -> ResolverResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ResolverError::config(format!("invalid target link pattern '{}': {}", pattern, e)))?;
        Ok(Self { pattern })
    }

    pub fn is_match(&self, href: &str) -> bool {
        self.pattern.is_match(href)
    }

    /// First link whose (unwrapped) href matches, in page order
    pub fn first_match(&self, links: &[PageElement]) -> Option<String> {
        links.iter()
            .filter_map(PageElement::href)
            .map(unwrap_redirect)
            .find(|href| self.is_match(href))
    }
}

#[cfg(test)]
impl Default for TargetMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_PATTERN).unwrap()
    }
}

/// Destination of an engine redirect link, or the href unchanged
pub fn unwrap_redirect(href: &str) -> String {
    let Ok(url) = Url::parse(href) else {
        return href.to_string();
    };
    let Some(host) = url.host_str() else {
        return href.to_string();
    };

    let Some((_, _, params)) = REDIRECTORS.iter().find(|(label, path, _)| {
        host.split('.').any(|part| part.eq_ignore_ascii_case(label)) && url.path().starts_with(path)
    }) else {
        return href.to_string();
    };

    url.query_pairs()
        .find(|(name, value)| {
            params.contains(&name.as_ref())
                && (value.starts_with("http://") || value.starts_with("https://"))
        })
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| href.to_string())
}

/// Substrings that identify an anti-bot interstitial
#[derive(Debug, Clone, Copy)]
pub struct ChallengeMarkers {
    pub content: &'static [&'static str],
    pub url_prefixes: &'static [&'static str],
}

impl ChallengeMarkers {
    pub fn matches(&self, url: &str, source: &str) -> bool {
        let url = url.to_lowercase();
        if self.url_prefixes.iter().any(|prefix| url.starts_with(prefix)) {
            return true;
        }
        let source = source.to_lowercase();
        self.content.iter().any(|marker| source.contains(marker))
    }

    pub async fn detect(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool> {
        let url = session.current_url().await?;
        let source = session.page_source().await?;
        Ok(self.matches(&url, &source))
    }
}

/// Capabilities every search engine provides
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open_homepage(&self, session: &mut dyn RenderingSession) -> ResolverResult<()>;

    /// No-op when no prompt is shown
    async fn accept_consent(&self, session: &mut dyn RenderingSession) -> ResolverResult<()>;

    async fn detect_challenge(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool>;

    async fn execute_query(&self, session: &mut dyn RenderingSession, query: &str) -> ResolverResult<()>;

    /// `None` is a valid outcome, not a fault
    async fn extract_target_link(&self, session: &mut dyn RenderingSession) -> ResolverResult<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngineKind {
    Google,
    Bing,
    DuckDuckGo,
}

impl std::str::FromStr for SearchEngineKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(SearchEngineKind::Google),
            "bing" => Ok(SearchEngineKind::Bing),
            "duckduckgo" | "ddg" => Ok(SearchEngineKind::DuckDuckGo),
            other => Err(ResolverError::config(format!("unknown search engine '{}'", other))),
        }
    }
}

impl std::fmt::Display for SearchEngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchEngineKind::Google => write!(f, "google"),
            SearchEngineKind::Bing => write!(f, "bing"),
            SearchEngineKind::DuckDuckGo => write!(f, "duckduckgo"),
        }
    }
}

/// Closed set of engines
pub enum SearchEngine {
    Google(GoogleSearch),
    Bing(BingSearch),
    DuckDuckGo(DuckDuckGoSearch),
}

impl SearchEngine {
    pub fn build(config: &SearchConfig, pacing: &PacingConfig, pacer: Arc<dyn Pacer>) -> ResolverResult<Self> {
        let target = TargetMatcher::new(&config.target_link_pattern)?;
        Ok(match config.engine {
            SearchEngineKind::Google => SearchEngine::Google(GoogleSearch::new(target, pacer, pacing.typing)),
            SearchEngineKind::Bing => SearchEngine::Bing(BingSearch::new(target, &config.target_site, pacer)),
            SearchEngineKind::DuckDuckGo => SearchEngine::DuckDuckGo(DuckDuckGoSearch::new(target, pacer)),
        })
    }

    fn provider(&self) -> &dyn SearchProvider {
        match self {
            SearchEngine::Google(engine) => engine,
            SearchEngine::Bing(engine) => engine,
            SearchEngine::DuckDuckGo(engine) => engine,
        }
    }
}

#[async_trait]
impl SearchProvider for SearchEngine {
    fn name(&self) -> &'static str {
        self.provider().name()
    }

    async fn open_homepage(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        self.provider().open_homepage(session).await
    }

    async fn accept_consent(&self, session: &mut dyn RenderingSession) -> ResolverResult<()> {
        self.provider().accept_consent(session).await
    }

    async fn detect_challenge(&self, session: &mut dyn RenderingSession) -> ResolverResult<bool> {
        self.provider().detect_challenge(session).await
    }

    async fn execute_query(&self, session: &mut dyn RenderingSession, query: &str) -> ResolverResult<()> {
        self.provider().execute_query(session, query).await
    }

    async fn extract_target_link(&self, session: &mut dyn RenderingSession) -> ResolverResult<Option<String>> {
        self.provider().extract_target_link(session).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub engine: SearchEngineKind,
    pub max_attempts: u32,
    pub target_link_pattern: String,
    pub target_site: String,
    pub challenge: ChallengeMode,
    pub challenge_timeout_seconds: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine: SearchEngineKind::Google,
            max_attempts: 3,
            target_link_pattern: DEFAULT_TARGET_PATTERN.to_string(),
            target_site: DEFAULT_TARGET_SITE.to_string(),
            challenge: ChallengeMode::Manual,
            challenge_timeout_seconds: None,
        }
    }
}

/// How one attempt ended
enum AttemptOutcome {
    Finished(Option<String>),
    ChallengeResolved,
    GaveUp,
}

/// Runs the per-query protocol against one engine
pub struct SearchDriver {
    engine: Box<dyn SearchProvider>,
    retry: RetryPolicy,
    challenges: Box<dyn ChallengeResolver>,
    pacer: Arc<dyn Pacer>,
    pacing: PacingConfig,
}

impl SearchDriver {
    pub fn new(
        engine: Box<dyn SearchProvider>,
        retry: RetryPolicy,
        challenges: Box<dyn ChallengeResolver>,
        pacer: Arc<dyn Pacer>,
        pacing: PacingConfig,
    ) -> Self {
        Self { engine, retry, challenges, pacer, pacing }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Resolve a query to a profile URL; faults never escape
    pub async fn resolve(&self, session: &mut dyn RenderingSession, query: &str) -> SearchResult {
        let mut attempts_used = 0;
        let mut challenge_encountered = false;

        loop {
            attempts_used += 1;
            let context = LogContext::new("search", "resolve")
                .with_query(query)
                .with_string_field("engine", self.engine.name())
                .with_number_field("attempt", attempts_used);

            let failure = match self.attempt(session, query, attempts_used).await {
                Ok(AttemptOutcome::Finished(url)) => {
                    let status = if url.is_some() { "found" } else { "no_match" };
                    log_info!(context.with_status(status), "Search finished");
                    return SearchResult::found(url, challenge_encountered);
                }
                Ok(AttemptOutcome::GaveUp) => {
                    log_warn!(context.with_status("challenge_blocked"), "Challenge not cleared, skipping query");
                    return SearchResult::blocked();
                }
                Ok(AttemptOutcome::ChallengeResolved) => {
                    challenge_encountered = true;
                    AttemptFailure::ChallengeResolved
                }
                Err(e) if !e.is_transient() => {
                    log_warn!(
                        context.with_error_category(e.category()).with_status("aborted"),
                        format!("Search cannot proceed: {}", e)
                    );
                    return SearchResult::found(None, challenge_encountered);
                }
                Err(e) => {
                    log_warn!(
                        context.clone().with_error_category(e.category()),
                        format!("Search attempt failed: {}", e)
                    );
                    AttemptFailure::Fault
                }
            };

            match self.retry.after_failure(attempts_used, failure) {
                RetryDecision::Retry { backoff: Some(backoff) } => {
                    self.pacer.pause(PauseKind::RetryBackoff, backoff).await;
                }
                RetryDecision::Retry { backoff: None } => {}
                RetryDecision::Exhausted => {
                    log_warn!(context.with_status("exhausted"), "Search attempts exhausted");
                    return SearchResult::found(None, challenge_encountered);
                }
            }
        }
    }

    async fn attempt(
        &self,
        session: &mut dyn RenderingSession,
        query: &str,
        attempt: u32,
    ) -> ResolverResult<AttemptOutcome> {
        self.engine.open_homepage(session).await?;
        self.pacer.pause(PauseKind::HomepageSettle, self.pacing.homepage_settle).await;
        self.engine.accept_consent(session).await?;

        if let Some(outcome) = self.escalate_challenge(session, query, attempt).await? {
            return Ok(outcome);
        }

        self.engine.execute_query(session, query).await?;
        self.pacer.pause(PauseKind::PostQuery, self.pacing.post_query).await;

        if let Some(outcome) = self.escalate_challenge(session, query, attempt).await? {
            return Ok(outcome);
        }

        let url = self.engine.extract_target_link(session).await?;
        Ok(AttemptOutcome::Finished(url))
    }

    /// Hand a detected challenge to the resolver; `None` when the page is clean
    async fn escalate_challenge(
        &self,
        session: &mut dyn RenderingSession,
        query: &str,
        attempt: u32,
    ) -> ResolverResult<Option<AttemptOutcome>> {
        if !self.engine.detect_challenge(session).await? {
            return Ok(None);
        }

        let context = ChallengeContext {
            engine: self.engine.name(),
            query: query.to_string(),
            url: session.current_url().await.unwrap_or_default(),
            attempt,
        };

        let outcome = match self.challenges.resolve(&context).await {
            Ok(ChallengeOutcome::Resolved) => AttemptOutcome::ChallengeResolved,
            Ok(ChallengeOutcome::GiveUp) => AttemptOutcome::GaveUp,
            Err(e) => {
                let log_context = LogContext::new("search", "challenge")
                    .with_query(query)
                    .with_error_category(e.category());
                log_warn!(log_context, format!("Challenge resolver failed: {}", e));
                AttemptOutcome::GaveUp
            }
        };
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::challenge::testing::ScriptedChallengeResolver;
    use super::*;
    use crate::pacing::testing::RecordingPacer;
    use crate::pacing::DelayBounds;
    use crate::session::fake::{FakePage, FakeWeb};
    use std::sync::atomic::Ordering;

    const RESULTS: &str = "https://www.google.com/search";

    fn google_home() -> FakePage {
        FakePage::new().text("[name='q']", "").submit_to(RESULTS)
    }

    fn driver(
        pacer: Arc<RecordingPacer>,
        challenges: ScriptedChallengeResolver,
    ) -> SearchDriver {
        let engine = SearchEngine::build(&SearchConfig::default(), &PacingConfig::default(), pacer.clone()).unwrap();
        SearchDriver::new(
            Box::new(engine),
            RetryPolicy::new(3, DelayBounds::new(2000, 5000)),
            Box::new(challenges),
            pacer,
            PacingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_resolves_first_matching_link() {
        let web = FakeWeb::new()
            .page(google::HOMEPAGE, google_home())
            .page(RESULTS, FakePage::new()
                .link("div.g a", "https://example.com/about")
                .link("div.g a", "https://www.linkedin.com/in/jane-doe"));
        let pacer = Arc::new(RecordingPacer::default());
        let driver = driver(pacer.clone(), ScriptedChallengeResolver::new(ChallengeOutcome::Resolved));
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result.url.as_deref(), Some("https://www.linkedin.com/in/jane-doe"));
        assert!(!result.challenge_encountered);
        assert_eq!(
            pacer.kinds(),
            vec![PauseKind::HomepageSettle, PauseKind::Typing, PauseKind::PostQuery]
        );
    }

    #[tokio::test]
    async fn test_no_matching_link_is_not_retried() {
        let web = FakeWeb::new()
            .page(google::HOMEPAGE, google_home())
            .page(RESULTS, FakePage::new().link("div.g a", "https://example.com/jane"));
        let pacer = Arc::new(RecordingPacer::default());
        let driver = driver(pacer.clone(), ScriptedChallengeResolver::new(ChallengeOutcome::Resolved));
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result, SearchResult::default());
        assert_eq!(pacer.count(PauseKind::RetryBackoff), 0);
        assert_eq!(web.navigations().len(), 2);
    }

    #[tokio::test]
    async fn test_faults_are_retried_then_exhausted() {
        let web = FakeWeb::new().fail_navigations(10);
        let pacer = Arc::new(RecordingPacer::default());
        let driver = driver(pacer.clone(), ScriptedChallengeResolver::new(ChallengeOutcome::Resolved));
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result, SearchResult::default());
        assert_eq!(web.navigations().len(), 3);
        assert_eq!(pacer.count(PauseKind::RetryBackoff), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_ends_query_without_retry() {
        let web = FakeWeb::new()
            .page(google::HOMEPAGE, google_home().post_form());
        let pacer = Arc::new(RecordingPacer::default());
        let driver = driver(pacer.clone(), ScriptedChallengeResolver::new(ChallengeOutcome::Resolved));
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result, SearchResult::default());
        assert_eq!(web.navigations(), vec![google::HOMEPAGE.to_string()]);
        assert_eq!(pacer.count(PauseKind::RetryBackoff), 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_fault() {
        let web = FakeWeb::new()
            .fail_navigations(1)
            .page(google::HOMEPAGE, google_home())
            .page(RESULTS, FakePage::new().link("div.g a", "https://www.linkedin.com/in/jane-doe"));
        let pacer = Arc::new(RecordingPacer::default());
        let driver = driver(pacer.clone(), ScriptedChallengeResolver::new(ChallengeOutcome::Resolved));
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert!(result.url.is_some());
        assert_eq!(pacer.count(PauseKind::RetryBackoff), 1);
    }

    #[tokio::test]
    async fn test_resolved_challenge_consumes_attempts() {
        let web = FakeWeb::new()
            .page(google::HOMEPAGE, google_home().source("Please solve this CAPTCHA"));
        let pacer = Arc::new(RecordingPacer::default());
        let challenges = ScriptedChallengeResolver::new(ChallengeOutcome::Resolved);
        let calls = challenges.calls.clone();
        let driver = driver(pacer.clone(), challenges);
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result, SearchResult { url: None, challenge_encountered: true });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pacer.count(PauseKind::RetryBackoff), 0);
        assert!(web.state().typed.is_empty());
    }

    #[tokio::test]
    async fn test_give_up_ends_resolution_immediately() {
        let web = FakeWeb::new()
            .page(google::HOMEPAGE, google_home())
            .page(RESULTS, FakePage::new().source("unusual traffic from your computer network"));
        let pacer = Arc::new(RecordingPacer::default());
        let challenges = ScriptedChallengeResolver::new(ChallengeOutcome::GiveUp);
        let calls = challenges.calls.clone();
        let driver = driver(pacer, challenges);
        let mut session = web.session();

        let result = driver.resolve(&mut session, "Jane Doe").await;
        assert_eq!(result, SearchResult { url: None, challenge_encountered: true });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwrap_redirect() {
        assert_eq!(
            unwrap_redirect("https://www.google.com/url?q=https://www.linkedin.com/in/jane&sa=U"),
            "https://www.linkedin.com/in/jane"
        );
        assert_eq!(
            unwrap_redirect("https://www.google.com/search?q=Jane+Doe"),
            "https://www.google.com/search?q=Jane+Doe"
        );
        assert_eq!(unwrap_redirect("/relative"), "/relative");
        assert_eq!(
            unwrap_redirect("https://duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.linkedin.com%2Fin%2Fjane&rut=x"),
            "https://www.linkedin.com/in/jane"
        );
    }

    #[test]
    fn test_direct_links_keep_their_own_query() {
        let profile = "https://www.linkedin.com/in/jane-doe?url=https://example.com/elsewhere";
        assert_eq!(unwrap_redirect(profile), profile);
        assert_eq!(
            unwrap_redirect("https://www.linkedin.com/in/jane-doe?q=https://example.com"),
            "https://www.linkedin.com/in/jane-doe?q=https://example.com"
        );
        assert_eq!(
            TargetMatcher::default().first_match(&[PageElement::new("Jane").with_attr("href", profile)]),
            Some(profile.to_string())
        );
    }

    #[test]
    fn test_challenge_url_prefix_ignores_case() {
        let markers = ChallengeMarkers {
            content: &["captcha"],
            url_prefixes: &["https://www.google.com/sorry"],
        };
        assert!(markers.matches("HTTPS://WWW.Google.com/Sorry/index?continue=x", ""));
        assert!(markers.matches("https://www.google.com/search", "Please solve this CAPTCHA"));
        assert!(!markers.matches("https://www.google.com/search", "results"));
    }

    #[test]
    fn test_target_matcher() {
        let matcher = TargetMatcher::default();
        assert!(matcher.is_match("https://de.linkedin.com/in/jane-doe"));
        assert!(!matcher.is_match("https://www.linkedin.com/company/acme"));
        assert!(TargetMatcher::new("linkedin\\.com/(in").is_err());

        let links = vec![PageElement::new("no href"), PageElement::new("x").with_attr("href", "https://example.com")];
        assert_eq!(matcher.first_match(&links), None);
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("DuckDuckGo".parse::<SearchEngineKind>().unwrap(), SearchEngineKind::DuckDuckGo);
        assert_eq!("bing".parse::<SearchEngineKind>().unwrap().to_string(), "bing");
        assert!("yahoo".parse::<SearchEngineKind>().is_err());
    }

    #[test]
    fn test_factory_selects_variant() {
        let pacer: Arc<dyn Pacer> = Arc::new(RecordingPacer::default());
        let config = SearchConfig { engine: SearchEngineKind::Bing, ..SearchConfig::default() };
        let engine = SearchEngine::build(&config, &PacingConfig::default(), pacer.clone()).unwrap();
        assert!(matches!(engine, SearchEngine::Bing(_)));
        assert_eq!(engine.name(), "bing");

        let bad = SearchConfig { target_link_pattern: "(".to_string(), ..SearchConfig::default() };
        assert!(SearchEngine::build(&bad, &PacingConfig::default(), pacer).is_err());
    }
}
