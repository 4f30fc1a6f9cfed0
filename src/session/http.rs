use async_trait::async_trait;
use reqwest::{header::{HeaderMap, HeaderValue}, Client};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::user_agent::UserAgentRotator;
use super::{PageElement, RenderingSession, SessionConfig, SessionProvider};
use crate::error::{ResolverError, ResolverResult};
use crate::proxy::ProxyEndpoint;

/// Sessions backed by plain HTTP requests and static HTML parsing
pub struct HttpSessionProvider {
    config: SessionConfig,
    user_agent_rotator: UserAgentRotator,
}

impl HttpSessionProvider {
    pub fn new(config: &SessionConfig) -> Self {
        let user_agent_rotator = UserAgentRotator::new(&config.user_agents);
        debug!("HTTP sessions rotate among {} user agents", user_agent_rotator.count());
        Self {
            config: config.clone(),
            user_agent_rotator,
        }
    }

    fn build_client(&self, endpoint: Option<&ProxyEndpoint>) -> ResolverResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .user_agent(self.user_agent_rotator.get_random_user_agent())
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(endpoint) = endpoint {
            let proxy = reqwest::Proxy::all(endpoint.proxy_url()?.as_str())
                .map_err(|e| ResolverError::session(format!("invalid proxy {}: {}", endpoint, e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| ResolverError::session(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, endpoint: Option<&ProxyEndpoint>) -> ResolverResult<Box<dyn RenderingSession>> {
        let client = self.build_client(endpoint)?;
        match endpoint {
            Some(endpoint) => info!("Opened HTTP session through proxy {}", endpoint),
            None => info!("Opened HTTP session on a direct connection"),
        }
        Ok(Box::new(HttpSession::new(client)))
    }
}

/// Last loaded document
#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    body: String,
}

/// One cookie jar plus the last loaded page
pub struct HttpSession {
    client: Option<Client>,
    page: Option<LoadedPage>,
    typed: HashMap<String, String>,
}

impl HttpSession {
    fn new(client: Client) -> Self {
        Self {
            client: Some(client),
            page: None,
            typed: HashMap::new(),
        }
    }

    fn client(&self) -> ResolverResult<&Client> {
        self.client.as_ref().ok_or_else(|| ResolverError::session("session already closed"))
    }

    fn page(&self) -> ResolverResult<&LoadedPage> {
        self.page.as_ref().ok_or_else(|| ResolverError::session("no page loaded"))
    }
}

fn parse_selector(selector: &str) -> ResolverResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| ResolverError::session(format!("invalid selector '{}': {:?}", selector, e)))
}

/// Snapshot an element, resolving link attributes against the page URL
fn snapshot(element: &ElementRef<'_>, base: Option<&Url>) -> PageElement {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let attributes = element.value().attrs()
        .map(|(name, value)| {
            let value = match (name, base) {
                ("href" | "src", Some(base)) => base
                    .join(value)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| value.to_string()),
                _ => value.to_string(),
            };
            (name.to_string(), value)
        })
        .collect();

    PageElement { text, attributes }
}

/// All matches of `selector` in `body`, as snapshots
pub fn select_all(body: &str, page_url: &str, selector: &str) -> ResolverResult<Vec<PageElement>> {
    let selector = parse_selector(selector)?;
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(body);
    Ok(document
        .select(&selector)
        .map(|el| snapshot(&el, base.as_ref()))
        .collect())
}

/// URL a GET form submits to when Enter is pressed in the input at `selector`
pub fn form_submission_url(body: &str, page_url: &str, selector: &str, value: &str) -> ResolverResult<String> {
    let input_selector = parse_selector(selector)?;
    let hidden_selector = parse_selector("input[type='hidden'][name]")?;
    let base = Url::parse(page_url)
        .map_err(|e| ResolverError::session(format!("invalid page url '{}': {}", page_url, e)))?;

    let document = Html::parse_document(body);
    let input = document
        .select(&input_selector)
        .next()
        .ok_or_else(|| ResolverError::element_not_found(selector))?;

    let field_name = input.value().attr("name")
        .ok_or_else(|| ResolverError::session(format!("input '{}' has no name to submit", selector)))?;

    let form = input.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form");

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut target = base.clone();

    if let Some(form) = form {
        let method = form.value().attr("method").unwrap_or("get");
        if !method.eq_ignore_ascii_case("get") {
            return Err(ResolverError::config(format!("cannot submit {} form without the browser backend", method)));
        }

        if let Some(action) = form.value().attr("action").filter(|a| !a.is_empty()) {
            target = base.join(action)
                .map_err(|e| ResolverError::session(format!("invalid form action '{}': {}", action, e)))?;
        }

        for hidden in form.select(&hidden_selector) {
            if let Some(name) = hidden.value().attr("name") {
                if name != field_name {
                    pairs.push((name.to_string(), hidden.value().attr("value").unwrap_or("").to_string()));
                }
            }
        }
    }

    pairs.push((field_name.to_string(), value.to_string()));

    target.set_query(None);
    target.set_fragment(None);
    {
        let mut query = target.query_pairs_mut();
        for (name, value) in &pairs {
            query.append_pair(name, value);
        }
    }

    Ok(target.to_string())
}

#[async_trait]
impl RenderingSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> ResolverResult<()> {
        debug!("HTTP GET {}", url);
        let response = self.client()?
            .get(url)
            .send()
            .await
            .map_err(|e| ResolverError::navigation(url, e.to_string()))?;

        let final_url = response.url().to_string();
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ResolverError::navigation(url, e.to_string()))?;

        debug!("Loaded {} ({}, {} bytes)", final_url, status, body.len());
        self.page = Some(LoadedPage { url: final_url, body });
        self.typed.clear();
        Ok(())
    }

    async fn current_url(&mut self) -> ResolverResult<String> {
        Ok(self.page()?.url.clone())
    }

    async fn page_source(&mut self) -> ResolverResult<String> {
        Ok(self.page()?.body.clone())
    }

    async fn find_first(&mut self, selector: &str) -> ResolverResult<Option<PageElement>> {
        let page = self.page()?;
        Ok(select_all(&page.body, &page.url, selector)?.into_iter().next())
    }

    async fn find_all(&mut self, selector: &str) -> ResolverResult<Vec<PageElement>> {
        let page = self.page()?;
        select_all(&page.body, &page.url, selector)
    }

    async fn click(&mut self, selector: &str) -> ResolverResult<bool> {
        let target = match self.find_first(selector).await? {
            Some(element) => element.href().map(str::to_string),
            None => return Ok(false),
        };

        match target {
            Some(href) => {
                self.navigate(&href).await?;
                Ok(true)
            }
            None => {
                debug!("'{}' is not a link, nothing to click without a browser", selector);
                Ok(false)
            }
        }
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> ResolverResult<()> {
        if self.find_first(selector).await?.is_none() {
            return Err(ResolverError::element_not_found(selector));
        }
        self.typed.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> ResolverResult<()> {
        let value = self.typed.get(selector).cloned().unwrap_or_default();
        let target = {
            let page = self.page()?;
            form_submission_url(&page.body, &page.url, selector, &value)?
        };
        self.navigate(&target).await
    }

    async fn close(&mut self) -> ResolverResult<()> {
        if self.client.take().is_none() {
            return Err(ResolverError::session("session already closed"));
        }
        self.page = None;
        self.typed.clear();
        debug!("HTTP session closed");
        Ok(())
    }
}
