#[cfg(feature = "browser")]
use async_trait::async_trait;
#[cfg(feature = "browser")]
use playwright::api::{Browser, BrowserContext, Page, ProxySettings};
#[cfg(feature = "browser")]
use playwright::Playwright;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use super::user_agent::UserAgentRotator;
#[cfg(feature = "browser")]
use super::{PageElement, RenderingSession, SessionConfig, SessionProvider};
#[cfg(feature = "browser")]
use crate::error::{ResolverError, ResolverResult};
#[cfg(feature = "browser")]
use crate::proxy::ProxyEndpoint;

#[cfg(feature = "browser")]
fn session_error(action: &str, e: impl std::fmt::Display) -> ResolverError {
    ResolverError::session(format!("{}: {}", action, e))
}

/// Chromium sessions driven through Playwright
#[cfg(feature = "browser")]
pub struct BrowserSessionProvider {
    config: SessionConfig,
    user_agent_rotator: UserAgentRotator,
    playwright: Playwright,
}

#[cfg(feature = "browser")]
unsafe impl Send for BrowserSessionProvider {}
#[cfg(feature = "browser")]
unsafe impl Sync for BrowserSessionProvider {}

#[cfg(feature = "browser")]
impl BrowserSessionProvider {
    pub async fn new(config: &SessionConfig) -> ResolverResult<Self> {
        debug!("Initializing Playwright");

        let playwright = Playwright::initialize()
            .await
            .map_err(|e| session_error("failed to initialize Playwright", e))?;
        playwright
            .prepare()
            .map_err(|e| session_error("failed to install browsers", e))?;

        Ok(Self {
            config: config.clone(),
            user_agent_rotator: UserAgentRotator::new(&config.user_agents),
            playwright,
        })
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionProvider for BrowserSessionProvider {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn open(&self, endpoint: Option<&ProxyEndpoint>) -> ResolverResult<Box<dyn RenderingSession>> {
        let mut launcher = self.playwright
            .chromium()
            .launcher()
            .headless(self.config.rendering_mode.is_headless());

        if let Some(endpoint) = endpoint {
            launcher = launcher.proxy(ProxySettings {
                server: format!("http://{}", endpoint.server()),
                bypass: None,
                username: endpoint.username.clone(),
                password: endpoint.password.clone(),
            });
        }

        let browser = launcher
            .launch()
            .await
            .map_err(|e| session_error("failed to launch browser", e))?;

        let user_agent = self.user_agent_rotator.get_random_user_agent();
        let context = match browser.context_builder().user_agent(&user_agent).build().await {
            Ok(context) => context,
            Err(e) => return Err(abandon(&browser, session_error("failed to create browser context", e)).await),
        };

        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => return Err(abandon(&browser, session_error("failed to open page", e)).await),
        };

        if let Err(e) = page.set_default_timeout(self.config.timeout_millis()).await {
            return Err(abandon(&browser, session_error("failed to set timeout", e)).await);
        }

        match endpoint {
            Some(endpoint) => info!("Opened browser session through proxy {}", endpoint),
            None => info!("Opened browser session on a direct connection"),
        }

        Ok(Box::new(BrowserSession {
            browser: Some(browser),
            _context: context,
            page,
        }))
    }
}

/// Close a browser whose session setup failed, then hand back the setup error
#[cfg(feature = "browser")]
async fn abandon(browser: &Browser, error: ResolverError) -> ResolverError {
    if let Err(close_err) = browser.close().await {
        warn!("Failed to close browser: {}", close_err);
    }
    error
}

/// One Chromium instance with a single page
#[cfg(feature = "browser")]
pub struct BrowserSession {
    browser: Option<Browser>,
    _context: BrowserContext,
    page: Page,
}

#[cfg(feature = "browser")]
unsafe impl Send for BrowserSession {}

#[cfg(feature = "browser")]
impl BrowserSession {
    fn ensure_open(&self) -> ResolverResult<()> {
        if self.browser.is_none() {
            return Err(ResolverError::session("session already closed"));
        }
        Ok(())
    }

    async fn snapshot(element: &playwright::api::ElementHandle) -> ResolverResult<PageElement> {
        let text = element.inner_text()
            .await
            .map_err(|e| session_error("failed to read element text", e))?;
        let mut snapshot = PageElement::new(text);
        if let Some(href) = element.get_attribute("href")
            .await
            .map_err(|e| session_error("failed to read href", e))?
        {
            snapshot = snapshot.with_attr("href", href);
        }
        Ok(snapshot)
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl RenderingSession for BrowserSession {
    async fn navigate(&mut self, url: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        debug!("Browser navigating to {}", url);
        self.page
            .goto_builder(url)
            .goto()
            .await
            .map_err(|e| ResolverError::navigation(url, e.to_string()))?;
        Ok(())
    }

    async fn current_url(&mut self) -> ResolverResult<String> {
        self.ensure_open()?;
        self.page.url().map_err(|e| session_error("failed to read url", e))
    }

    async fn page_source(&mut self) -> ResolverResult<String> {
        self.ensure_open()?;
        self.page.content().await.map_err(|e| session_error("failed to read page source", e))
    }

    async fn find_first(&mut self, selector: &str) -> ResolverResult<Option<PageElement>> {
        self.ensure_open()?;
        let handle = self.page
            .query_selector(selector)
            .await
            .map_err(|e| session_error(&format!("query '{}' failed", selector), e))?;
        match handle {
            Some(handle) => Ok(Some(Self::snapshot(&handle).await?)),
            None => Ok(None),
        }
    }

    async fn find_all(&mut self, selector: &str) -> ResolverResult<Vec<PageElement>> {
        self.ensure_open()?;
        let handles = self.page
            .query_selector_all(selector)
            .await
            .map_err(|e| session_error(&format!("query '{}' failed", selector), e))?;
        let mut elements = Vec::with_capacity(handles.len());
        for handle in &handles {
            elements.push(Self::snapshot(handle).await?);
        }
        Ok(elements)
    }

    async fn click(&mut self, selector: &str) -> ResolverResult<bool> {
        self.ensure_open()?;
        let handle = self.page
            .query_selector(selector)
            .await
            .map_err(|e| session_error(&format!("query '{}' failed", selector), e))?;
        match handle {
            Some(handle) => {
                handle.click_builder()
                    .click()
                    .await
                    .map_err(|e| session_error(&format!("click '{}' failed", selector), e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        if self.page.query_selector(selector).await
            .map_err(|e| session_error(&format!("query '{}' failed", selector), e))?
            .is_none()
        {
            return Err(ResolverError::element_not_found(selector));
        }
        self.page
            .fill_builder(selector, text)
            .fill()
            .await
            .map_err(|e| session_error(&format!("typing into '{}' failed", selector), e))
    }

    async fn press_enter(&mut self, selector: &str) -> ResolverResult<()> {
        self.ensure_open()?;
        self.page
            .press_builder(selector, "Enter")
            .press()
            .await
            .map_err(|e| session_error(&format!("pressing Enter in '{}' failed", selector), e))
    }

    async fn close(&mut self) -> ResolverResult<()> {
        let browser = self.browser
            .take()
            .ok_or_else(|| ResolverError::session("session already closed"))?;
        browser.close().await.map_err(|e| session_error("failed to close browser", e))?;
        debug!("Browser session closed");
        Ok(())
    }
}

// Stub when the browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserSessionProvider;

#[cfg(not(feature = "browser"))]
impl BrowserSessionProvider {
    pub async fn new(_config: &super::SessionConfig) -> crate::error::ResolverResult<Self> {
        Err(crate::error::ResolverError::config("Browser feature not enabled"))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl super::SessionProvider for BrowserSessionProvider {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn open(
        &self,
        _endpoint: Option<&crate::proxy::ProxyEndpoint>,
    ) -> crate::error::ResolverResult<Box<dyn super::RenderingSession>> {
        Err(crate::error::ResolverError::config("Browser feature not enabled"))
    }
}
