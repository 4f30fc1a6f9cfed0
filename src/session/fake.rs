//! Scripted in-memory rendering sessions for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{PageElement, RenderingSession, SessionProvider};
use crate::error::{ResolverError, ResolverResult};
use crate::proxy::ProxyEndpoint;

/// A scripted page, matched by URL prefix
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub redirect_to: Option<String>,
    pub source: String,
    pub elements: HashMap<String, Vec<PageElement>>,
    pub faults: HashSet<String>,
    pub submit_to: Option<String>,
    pub post_form: bool,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn element(mut self, selector: &str, element: PageElement) -> Self {
        self.elements.entry(selector.to_string()).or_default().push(element);
        self
    }

    pub fn text(self, selector: &str, text: &str) -> Self {
        self.element(selector, PageElement::new(text))
    }

    pub fn link(self, selector: &str, href: &str) -> Self {
        self.element(selector, PageElement::new(href).with_attr("href", href))
    }

    /// Lookups of `selector` fail like a stale element
    pub fn fault(mut self, selector: &str) -> Self {
        self.faults.insert(selector.to_string());
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    /// The search form posts, which a plain HTTP session cannot submit
    pub fn post_form(mut self) -> Self {
        self.post_form = true;
        self
    }

    /// Enter submits to `url?q=<typed text>`
    pub fn submit_to(mut self, url: &str) -> Self {
        self.submit_to = Some(url.to_string());
        self
    }
}

/// Session lifecycle step, in the order sessions saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Open,
    Close,
}

#[derive(Debug, Default)]
pub struct FakeWebState {
    pages: Vec<(String, FakePage)>,
    pub navigations: Vec<String>,
    pub queried: Vec<String>,
    pub clicks: Vec<String>,
    pub typed: Vec<(String, String)>,
    pub navigation_failures: usize,
    pub opens: usize,
    pub closes: usize,
    pub events: Vec<SessionEvent>,
    pub endpoints: Vec<Option<ProxyEndpoint>>,
    pub max_opens: Option<usize>,
}

impl FakeWebState {
    /// Longest registered URL prefix
    fn lookup(&self, url: &str) -> Option<FakePage> {
        self.pages.iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, page)| page.clone())
    }
}

/// Shared script plus the record of everything sessions did with it
#[derive(Debug, Clone, Default)]
pub struct FakeWeb(Arc<Mutex<FakeWebState>>);

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url_prefix: &str, page: FakePage) -> Self {
        self.state().pages.push((url_prefix.to_string(), page));
        self
    }

    /// The next `count` navigations fail
    pub fn fail_navigations(self, count: usize) -> Self {
        self.state().navigation_failures = count;
        self
    }

    /// Opening more than `count` sessions fails
    pub fn max_opens(self, count: usize) -> Self {
        self.state().max_opens = Some(count);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeWebState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            web: self.clone(),
            current: None,
            typed: HashMap::new(),
            closed: false,
        }
    }

    pub fn provider(&self) -> FakeSessionProvider {
        FakeSessionProvider { web: self.clone() }
    }

    pub fn queried(&self) -> Vec<String> {
        self.state().queried.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.state().events.clone()
    }
}

pub struct FakeSession {
    web: FakeWeb,
    current: Option<(String, FakePage)>,
    typed: HashMap<String, String>,
    closed: bool,
}

impl FakeSession {
    fn ensure_open(&self) -> ResolverResult<()> {
        if self.closed {
            return Err(ResolverError::session("session already closed"));
        }
        Ok(())
    }

    fn page(&self) -> ResolverResult<&FakePage> {
        self.current
            .as_ref()
            .map(|(_, page)| page)
            .ok_or_else(|| ResolverError::session("no page loaded"))
    }

    fn lookup(&self, selector: &str) -> ResolverResult<Vec<PageElement>> {
        self.ensure_open()?;
        self.web.state().queried.push(selector.to_string());
        let page = self.page()?;
        if page.faults.contains(selector) {
            return Err(ResolverError::session(format!("stale element for '{}'", selector)));
        }
        Ok(page.elements.get(selector).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RenderingSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        let mut state = self.web.state();
        state.navigations.push(url.to_string());
        if state.navigation_failures > 0 {
            state.navigation_failures -= 1;
            return Err(ResolverError::navigation(url, "connection reset"));
        }

        let page = state.lookup(url).unwrap_or_default();
        let current = match &page.redirect_to {
            Some(target) => (target.clone(), state.lookup(target).unwrap_or_default()),
            None => (url.to_string(), page),
        };
        drop(state);

        self.current = Some(current);
        self.typed.clear();
        Ok(())
    }

    async fn current_url(&mut self) -> ResolverResult<String> {
        self.ensure_open()?;
        self.current
            .as_ref()
            .map(|(url, _)| url.clone())
            .ok_or_else(|| ResolverError::session("no page loaded"))
    }

    async fn page_source(&mut self) -> ResolverResult<String> {
        self.ensure_open()?;
        Ok(self.page()?.source.clone())
    }

    async fn find_first(&mut self, selector: &str) -> ResolverResult<Option<PageElement>> {
        Ok(self.lookup(selector)?.into_iter().next())
    }

    async fn find_all(&mut self, selector: &str) -> ResolverResult<Vec<PageElement>> {
        self.lookup(selector)
    }

    async fn click(&mut self, selector: &str) -> ResolverResult<bool> {
        self.ensure_open()?;
        self.web.state().clicks.push(selector.to_string());
        Ok(self.page()?.elements.contains_key(selector))
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        if !self.page()?.elements.contains_key(selector) {
            return Err(ResolverError::element_not_found(selector));
        }
        self.web.state().typed.push((selector.to_string(), text.to_string()));
        self.typed.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        if self.page()?.post_form {
            return Err(ResolverError::config("cannot submit POST form without the browser backend"));
        }
        let target = self.page()?
            .submit_to
            .clone()
            .ok_or_else(|| ResolverError::session("page has no form to submit"))?;
        let typed = self.typed.get(selector).cloned().unwrap_or_default();
        let query: String = url::form_urlencoded::byte_serialize(typed.as_bytes()).collect();
        self.navigate(&format!("{}?q={}", target, query)).await
    }

    async fn close(&mut self) -> ResolverResult<()> {
        self.ensure_open()?;
        self.closed = true;
        let mut state = self.web.state();
        state.closes += 1;
        state.events.push(SessionEvent::Close);
        Ok(())
    }
}

pub struct FakeSessionProvider {
    web: FakeWeb,
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open(&self, endpoint: Option<&ProxyEndpoint>) -> ResolverResult<Box<dyn RenderingSession>> {
        {
            let mut state = self.web.state();
            state.opens += 1;
            state.events.push(SessionEvent::Open);
            state.endpoints.push(endpoint.cloned());
            if let Some(max) = state.max_opens {
                if state.opens > max {
                    return Err(ResolverError::session("browser failed to start"));
                }
            }
        }
        Ok(Box::new(self.web.session()))
    }
}
