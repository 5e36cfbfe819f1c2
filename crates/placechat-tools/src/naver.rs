//! Naver Local Search: place lookup against `openapi.naver.com`.
//!
//! [`NaverLocalSearch::search`] never fails: credential, transport and
//! decoding problems come back as a single `{"error": ...}` element so the
//! agent sees them as an ordinary tool result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use placechat_core::config::{NAVER_CLIENT_ID_ENV, NAVER_CLIENT_SECRET_ENV};

use crate::{Tool, ToolContext, ToolOutput};

pub const NAVER_LOCAL_SEARCH_URL: &str = "https://openapi.naver.com/v1/search/local.json";
pub const MISSING_CREDENTIALS_ERROR: &str =
    "Server configuration error: Missing Naver API credentials.";
const INVALID_RESPONSE_ERROR: &str = "Invalid response format from Naver API.";

const MAX_DISPLAY: i64 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A normalized place returned to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub category: String,
    pub address: String,
    pub road_address: String,
}

/// One element of a search result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlaceResult {
    Place(Place),
    Error { error: String },
}

impl PlaceResult {
    fn error(message: impl Into<String>) -> Vec<Self> {
        vec![Self::Error {
            error: message.into(),
        }]
    }
}

#[derive(Clone)]
pub struct NaverCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl NaverCredentials {
    /// Both values must be present and non-empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let client_id = lookup(NAVER_CLIENT_ID_ENV).filter(|v| !v.is_empty())?;
        let client_secret = lookup(NAVER_CLIENT_SECRET_ENV).filter(|v| !v.is_empty())?;
        Some(Self {
            client_id,
            client_secret,
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

enum CredentialSource {
    /// Read the environment on every call.
    Environment,
    Static(Option<NaverCredentials>),
}

/// Map the caller-facing sort option onto Naver's sort key.
pub fn provider_sort_key(sort_by: &str) -> &'static str {
    if sort_by == "reviews" { "comment" } else { "random" }
}

/// Clamp a requested result count into `1..=5`; absent means 5.
pub fn clamp_display(max_results: Option<i64>) -> i64 {
    max_results.unwrap_or(MAX_DISPLAY).clamp(1, MAX_DISPLAY)
}

/// Drop the `<b>`/`</b>` highlight markers Naver wraps around query matches.
pub fn strip_highlight(title: &str) -> String {
    title.replace("<b>", "").replace("</b>", "")
}

#[derive(Debug, Deserialize)]
struct LocalSearchResponse {
    #[serde(default)]
    items: Vec<LocalSearchItem>,
}

#[derive(Debug, Deserialize)]
struct LocalSearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    address: String,
    #[serde(default, rename = "roadAddress")]
    road_address: String,
}

impl From<LocalSearchItem> for Place {
    fn from(item: LocalSearchItem) -> Self {
        Self {
            name: strip_highlight(&item.title),
            category: item.category,
            address: item.address,
            road_address: item.road_address,
        }
    }
}

/// Client for the Naver Local Search API.
pub struct NaverLocalSearch {
    client: reqwest::Client,
    url: String,
    credentials: CredentialSource,
}

impl Default for NaverLocalSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl NaverLocalSearch {
    /// Client reading credentials from the environment at call time.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: NAVER_LOCAL_SEARCH_URL.to_string(),
            credentials: CredentialSource::Environment,
        }
    }

    /// Use fixed credentials instead of the environment.
    pub fn with_credentials(mut self, credentials: Option<NaverCredentials>) -> Self {
        self.credentials = CredentialSource::Static(credentials);
        self
    }

    /// Point the client at another endpoint (full URL of `local.json`).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn credentials(&self) -> Option<NaverCredentials> {
        match &self.credentials {
            CredentialSource::Environment => NaverCredentials::from_env(),
            CredentialSource::Static(c) => c.clone(),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: Option<i64>,
        sort_by: Option<&str>,
    ) -> Vec<PlaceResult> {
        let sort_by = sort_by.unwrap_or("reviews");
        info!(%query, ?max_results, %sort_by, "Executing search_naver_places");

        let Some(credentials) = self.credentials() else {
            error!(
                "Naver API credentials ({NAVER_CLIENT_ID_ENV}, {NAVER_CLIENT_SECRET_ENV}) not found in environment"
            );
            return PlaceResult::error(MISSING_CREDENTIALS_ERROR);
        };

        let display = clamp_display(max_results).to_string();
        let params = [
            ("query", query),
            ("display", display.as_str()),
            ("start", "1"),
            ("sort", provider_sort_key(sort_by)),
        ];

        let response = self
            .client
            .get(&self.url)
            .header("X-Naver-Client-Id", &credentials.client_id)
            .header("X-Naver-Client-Secret", &credentials.client_secret)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let body = match response {
            Ok(r) => r.bytes().await,
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(b) => b,
            Err(e) => {
                error!(%e, "Error calling Naver API");
                return PlaceResult::error(format!("Failed to contact Naver API: {e}"));
            }
        };

        let parsed: LocalSearchResponse = match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(e) => {
                error!(%e, "Error decoding Naver API response");
                return PlaceResult::error(INVALID_RESPONSE_ERROR);
            }
        };

        info!(count = parsed.items.len(), "Received items from Naver API");

        parsed
            .items
            .into_iter()
            .map(|item| PlaceResult::Place(item.into()))
            .collect()
    }
}

/// `search_naver_places` tool backed by [`NaverLocalSearch`].
pub struct SearchNaverPlacesTool {
    client: NaverLocalSearch,
}

impl SearchNaverPlacesTool {
    pub fn new(client: NaverLocalSearch) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    max_results: Option<i64>,
    #[serde(default)]
    sort_by: Option<String>,
}

#[async_trait]
impl Tool for SearchNaverPlacesTool {
    fn name(&self) -> &str {
        "search_naver_places"
    }

    fn description(&self) -> &str {
        "Searches Naver Map for places (like restaurants, cafes) based on a query. \
         Can prioritize popular places based on review counts ('reviews') or relevance ('accuracy')."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for, e.g. '강남역 카페'"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of places to return, 1-5 (default: 5)",
                    "default": 5
                },
                "sort_by": {
                    "type": "string",
                    "description": "'reviews' for popular places first, 'accuracy' for relevance",
                    "default": "reviews"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let p: Params = serde_json::from_value(params)?;
        let results = self
            .client
            .search(&p.query, p.max_results, p.sort_by.as_deref())
            .await;
        Ok(ToolOutput::ok(serde_json::to_string(&results)?))
    }
}
