//! SearXNG binding. Tries the configured instance, then a few public ones,
//! then a local install, and returns the first usable answer.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SearchError;

use super::serper::{map_status, map_transport_error};
use super::{SearchHit, SearchProvider};

/// Public SearXNG instances (subset of https://searx.space/)
const PUBLIC_INSTANCES: &[&str] = &[
    "https://searx.be",
    "https://search.sapti.me",
    "https://searx.tiekoetter.com",
];

const LOCAL_INSTANCES: &[&str] = &["http://localhost:8888", "http://127.0.0.1:8888"];

pub struct SearxngProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngProvider {
    /// `custom_url` (or `SEARXNG_URL`) takes priority over the built-in list
    pub fn new(custom_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoints: endpoint_list(custom_url.or_else(|| std::env::var("SEARXNG_URL").ok())),
        }
    }

    /// Only ever query the given instances
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints
            .iter()
            .map(|e| format!("{}/search", e.trim_end_matches('/')))
            .collect();
        self
    }

    async fn query_endpoint(
        &self,
        endpoint: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));
        let response = self.client.get(&url).send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::unavailable(format!("unreadable SearXNG response: {}", e)))?;
        Ok(parse_results(&json, max_results))
    }
}

fn endpoint_list(custom_url: Option<String>) -> Vec<String> {
    let mut endpoints = Vec::new();
    if let Some(url) = custom_url.filter(|u| !u.trim().is_empty()) {
        endpoints.push(format!("{}/search", url.trim_end_matches('/')));
    }
    endpoints.extend(PUBLIC_INSTANCES.iter().map(|e| format!("{}/search", e)));
    endpoints.extend(LOCAL_INSTANCES.iter().map(|e| format!("{}/search", e)));
    endpoints
}

fn parse_results(json: &serde_json::Value, max_results: usize) -> Vec<SearchHit> {
    json.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .take(max_results)
                .map(|r| SearchHit {
                    title: r.get("title").and_then(|t| t.as_str()).unwrap_or("").to_string(),
                    url: r.get("url").and_then(|u| u.as_str()).unwrap_or("").to_string(),
                    snippet: r.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for SearxngProvider {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let mut last_error = SearchError::unavailable("no SearXNG endpoint configured");

        for endpoint in &self.endpoints {
            match self.query_endpoint(endpoint, query, max_results).await {
                Ok(hits) => return Ok(hits),
                Err(err) => {
                    tracing::debug!(endpoint = %endpoint, error = %err, "SearXNG endpoint failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}
