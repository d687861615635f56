//! Serper (serper.dev) binding for Google web results.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::{SearchError, SearchErrorKind};

use super::{SearchHit, SearchProvider};

const SERPER_URL: &str = "https://google.serper.dev/search";

/// Google results through the Serper API
pub struct SerperProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SerperProvider {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("guild-agent/1.0")
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: SERPER_URL.to_string(),
        }
    }

    /// Read `SERPER_API_KEY`; a missing key surfaces on first use
    pub fn from_env(timeout: Duration) -> Self {
        Self::new(std::env::var("SERPER_API_KEY").ok(), timeout)
    }

    /// Point at a different endpoint (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchError::unavailable("SERPER_API_KEY is not set"))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query, "num": max_results }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| SearchError::unavailable(format!("unreadable Serper response: {}", e)))?;

        Ok(parsed
            .organic
            .into_iter()
            .take(max_results)
            .map(|o| SearchHit {
                title: o.title,
                snippet: o.snippet,
                url: o.link,
            })
            .collect())
    }
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> SearchError {
    if err.is_timeout() {
        SearchError::new(SearchErrorKind::Timeout, err.to_string())
    } else {
        SearchError::unavailable(err.to_string())
    }
}

pub(crate) fn map_status(status: StatusCode, body: &str) -> SearchError {
    let message = format!("HTTP {}: {}", status.as_u16(), super::truncate(body, 200));
    match status {
        StatusCode::TOO_MANY_REQUESTS => SearchError::rate_limited(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SearchError::invalid_query(message)
        }
        _ => SearchError::unavailable(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "").kind,
            SearchErrorKind::RateLimited
        );
        assert_eq!(
            map_status(StatusCode::BAD_REQUEST, "bad q").kind,
            SearchErrorKind::InvalidQuery
        );
        assert_eq!(
            map_status(StatusCode::FORBIDDEN, "").kind,
            SearchErrorKind::ProviderUnavailable
        );
        assert_eq!(
            map_status(StatusCode::BAD_GATEWAY, "").kind,
            SearchErrorKind::ProviderUnavailable
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_provider_unavailable() {
        let provider = SerperProvider::new(None, Duration::from_secs(1));
        let err = provider.search("rust", 3).await.unwrap_err();
        assert_eq!(err.kind, SearchErrorKind::ProviderUnavailable);
        assert!(err.message.contains("SERPER_API_KEY"));
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let provider = SerperProvider::new(Some("  ".to_string()), Duration::from_secs(1));
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let body = r#"{"organic":[{"title":"Todo MVC","link":"https://todomvc.com"}]}"#;
        let parsed: SerperResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.organic.len(), 1);
        assert_eq!(parsed.organic[0].snippet, "");

        let empty: SerperResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.organic.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_over_the_wire() {
        use axum::http::StatusCode as AxumStatus;
        use axum::routing::post;

        let base = crate::test_support::serve_stub(axum::Router::new().route(
            "/search",
            post(|| async { (AxumStatus::TOO_MANY_REQUESTS, "quota exceeded") }),
        ))
        .await;
        let provider = SerperProvider::new(Some("key".to_string()), Duration::from_secs(5))
            .with_endpoint(format!("{}/search", base));

        let err = provider.search("rust", 3).await.unwrap_err();
        assert_eq!(err.kind, SearchErrorKind::RateLimited);
        assert!(err.message.contains("HTTP 429"));
        assert!(err.message.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_organic_results_become_hits() {
        use axum::http::{HeaderMap, StatusCode as AxumStatus};
        use axum::routing::post;
        use axum::Json;

        let handler = |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
            if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("key") {
                return (AxumStatus::FORBIDDEN, Json(json!({})));
            }
            assert_eq!(body["q"], "todo app");
            assert_eq!(body["num"], 2);
            (
                AxumStatus::OK,
                Json(json!({
                    "organic": [
                        {"title": "Todo MVC", "link": "https://todomvc.com", "snippet": "Helping you select"},
                        {"title": "MDN", "link": "https://developer.mozilla.org"},
                        {"title": "Extra", "link": "https://example.com"}
                    ]
                })),
            )
        };
        let base = crate::test_support::serve_stub(axum::Router::new().route("/search", post(handler))).await;
        let provider = SerperProvider::new(Some("key".to_string()), Duration::from_secs(5))
            .with_endpoint(format!("{}/search", base));

        let hits = provider.search("todo app", 2).await.unwrap();
        assert_eq!(
            hits,
            vec![
                SearchHit {
                    title: "Todo MVC".to_string(),
                    snippet: "Helping you select".to_string(),
                    url: "https://todomvc.com".to_string(),
                },
                SearchHit {
                    title: "MDN".to_string(),
                    snippet: String::new(),
                    url: "https://developer.mozilla.org".to_string(),
                },
            ]
        );
    }
}
