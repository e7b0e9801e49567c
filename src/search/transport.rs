use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::{ChatError, Result};

/// Raw text retrieval for the search and page-visit paths
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Fetch the body of `target` as text
    async fn fetch_text(&self, target: &str) -> Result<String>;
}

/// Fetches every target through a CORS-style proxy of the form
/// `{proxy_base}{percent-encoded target}`
pub struct ProxyTransport {
    client: Client,
    proxy_base: String,
}

impl ProxyTransport {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ChatError::configuration(
                "search",
                format!("Failed to build HTTP client: {}", e),
            ))?;

        Ok(Self {
            client,
            proxy_base: config.proxy_base.clone(),
        })
    }

    pub fn proxied_url(&self, target: &str) -> String {
        format!("{}{}", self.proxy_base, urlencoding::encode(target))
    }
}

#[async_trait]
impl SearchTransport for ProxyTransport {
    async fn fetch_text(&self, target: &str) -> Result<String> {
        let url = self.proxied_url(target);
        debug!(%url, "Fetching through proxy");

        let fetch_failure = |message: String| ChatError::FetchFailure {
            url: target.to_string(),
            message,
        };

        let response = self.client.get(&url).send().await
            .map_err(|e| fetch_failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failure(format!("proxy responded with {}", status)));
        }

        response.text().await.map_err(|e| fetch_failure(e.to_string()))
    }
}
