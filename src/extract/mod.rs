//! Profile field extraction through ordered selector chains.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ResolverResult;
use crate::pacing::{DelayBounds, Pacer, PauseKind};
use crate::session::RenderingSession;

pub const DEFAULT_ACCESS_WALL_MARKER: &str = "authwall";

/// Fields read from a profile page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    pub name: Option<String>,
    pub location: Option<String>,
    pub position: Option<String>,
    pub access_walled: bool,
}

impl ExtractionResult {
    fn walled() -> Self {
        Self {
            access_walled: true,
            ..Self::default()
        }
    }
}

/// Candidate selectors per field, most specific layout first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorChains {
    pub name: Vec<String>,
    pub location: Vec<String>,
    pub position: Vec<String>,
}

fn chain(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(|s| s.to_string()).collect()
}

impl Default for SelectorChains {
    fn default() -> Self {
        Self {
            name: chain(&[
                "h1.text-heading-xlarge",
                "h1.top-card-layout__title",
                ".pv-text-details__left-panel h1",
                "h1",
            ]),
            location: chain(&[
                ".top-card-layout__card span.top-card__subline-item",
                "span.location",
                ".pv-text-details__left-panel div.text-body-small",
                ".profile-info-subheader .not-first-middot span:first-child",
            ]),
            position: chain(&[
                ".experience-item__title",
                ".top-card-layout__headline",
                ".pv-text-details__left-panel div.text-body-medium.break-words",
            ]),
        }
    }
}

pub struct Extractor {
    chains: SelectorChains,
    access_wall_marker: String,
    pacer: Arc<dyn Pacer>,
    render_settle: DelayBounds,
}

impl Extractor {
    pub fn new(
        chains: SelectorChains,
        access_wall_marker: &str,
        pacer: Arc<dyn Pacer>,
        render_settle: DelayBounds,
    ) -> Self {
        Self {
            chains,
            access_wall_marker: access_wall_marker.to_lowercase(),
            pacer,
            render_settle,
        }
    }

    /// Whether the page URL shows the login/access wall
    pub fn is_access_walled(&self, current_url: &str) -> bool {
        !self.access_wall_marker.is_empty()
            && current_url.to_lowercase().contains(&self.access_wall_marker)
    }

    /// Load `url` and read every field; navigation faults propagate
    pub async fn extract(&self, session: &mut dyn RenderingSession, url: &str) -> ResolverResult<ExtractionResult> {
        session.navigate(url).await?;
        self.pacer.pause(PauseKind::RenderSettle, self.render_settle).await;

        let current_url = session.current_url().await?;
        if self.is_access_walled(&current_url) {
            debug!("Access wall at {}", current_url);
            return Ok(ExtractionResult::walled());
        }

        Ok(ExtractionResult {
            name: first_text(session, &self.chains.name).await,
            location: first_text(session, &self.chains.location).await,
            position: first_text(session, &self.chains.position).await,
            access_walled: false,
        })
    }
}

/// First candidate with non-blank text; later candidates are not queried
async fn first_text(session: &mut dyn RenderingSession, selectors: &[String]) -> Option<String> {
    for selector in selectors {
        match session.find_first(selector).await {
            Ok(Some(element)) => {
                if let Some(text) = element.trimmed_text() {
                    return Some(text.to_string());
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Lookup of '{}' failed, trying next candidate: {}", selector, e),
        }
    }
    None
}
