use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::types::SearchResult;

use super::context::{ContextOutcome, EmptyReason};
use super::parser::{page_text, parse_search_results};
use super::transport::{ProxyTransport, SearchTransport};

/// Host that is answered with a canned pointer instead of being fetched
pub const WEATHER_SHORTCUT_DOMAIN: &str = "accuweather.com";
pub const WEATHER_SHORTCUT_TEXT: &str =
    "Current weather data available at AccuWeather. Please visit the link for real-time information.";

/// Looks up web context for search directives. Every failure degrades to an
/// empty result; nothing here returns an error to the caller.
pub struct WebContextFetcher {
    transport: Arc<dyn SearchTransport>,
    config: SearchConfig,
}

impl WebContextFetcher {
    pub fn new(transport: Arc<dyn SearchTransport>, config: SearchConfig) -> Self {
        Self { transport, config }
    }

    /// Fetcher using the configured HTTP proxy
    pub fn with_proxy(config: SearchConfig) -> Result<Self> {
        let transport = ProxyTransport::new(&config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    fn search_target(&self, query: &str) -> String {
        format!("{}{}", self.config.search_url, urlencoding::encode(query))
    }

    async fn try_search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let html = self.transport.fetch_text(&self.search_target(query)).await?;
        let results = parse_search_results(&html, self.config.max_results);
        debug!(query, count = results.len(), "Parsed search results");
        Ok(results)
    }

    /// Search results for `query`, empty on any failure
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        match self.try_search(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query, error = %e, "Search failed");
                Vec::new()
            }
        }
    }

    /// Search and format, reporting why the context is empty when it is
    pub async fn lookup(&self, query: &str) -> ContextOutcome {
        info!(query, "Looking up web context");
        match self.try_search(query).await {
            Ok(results) => ContextOutcome::from_results(results),
            Err(e) => {
                warn!(query, error = %e, "Search failed");
                ContextOutcome::Empty {
                    reason: EmptyReason::FetchFailed(e.to_string()),
                }
            }
        }
    }

    /// Formatted context for `query`; `""` when nothing was found or the fetch failed
    pub async fn fetch_context(&self, query: &str) -> String {
        self.lookup(query).await.into_context()
    }

    /// Readable text of `url`, capped at the configured character limit.
    /// Returns `""` on failure.
    pub async fn visit_page(&self, url: &str) -> String {
        if url.contains(WEATHER_SHORTCUT_DOMAIN) {
            return WEATHER_SHORTCUT_TEXT.to_string();
        }

        match self.transport.fetch_text(url).await {
            Ok(html) => {
                let text = page_text(&html, self.config.page_char_limit);
                debug!(url, chars = text.chars().count(), "Visited page");
                text
            }
            Err(e) => {
                warn!(url, error = %e, "Page visit failed");
                String::new()
            }
        }
    }
}
