pub mod auth;
pub mod conditional_access;
pub mod directory;

use crate::error::{MatrixError, Result};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Default retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// Calculate backoff with jitter for exponential backoff
fn calculate_backoff_with_jitter(attempt: u32, initial_ms: u64) -> Duration {
    let base_backoff = initial_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped_backoff = base_backoff.min(MAX_BACKOFF_MS);

    let jitter_range = (capped_backoff as f64 * JITTER_FACTOR) as i64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };

    let final_backoff = (capped_backoff as i64 + jitter).max(0) as u64;
    Duration::from_millis(final_backoff)
}

/// Read-only Graph API client with retry support
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    initial_backoff_ms: u64,
}

impl GraphClient {
    /// Build a client whose requests time out after `timeout`
    pub fn new(access_token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            access_token,
            base_url: GRAPH_API_BASE.to_string(),
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Send requests somewhere other than the public v1.0 endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    /// Make a GET request to Graph API with retry for transient failures
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let url = self.url_for(endpoint);
        self.get_with_retry(&url).await
    }

    async fn get_with_retry<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            let is_last = attempt + 1 == MAX_RETRIES;
            tracing::debug!("GET {} (attempt {}/{})", url, attempt + 1, MAX_RETRIES);

            let response = self
                .client
                .get(url)
                .bearer_auth(&self.access_token)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !is_last {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(INITIAL_BACKOFF_MS / 1000);

                        tracing::warn!(
                            "Rate limited (429). Retrying in {} seconds... (attempt {}/{})",
                            retry_after,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }

                    if status.is_server_error() && !is_last {
                        let wait_time = calculate_backoff_with_jitter(attempt, self.initial_backoff_ms);
                        tracing::warn!(
                            "Server error ({}). Retrying in {:?}... (attempt {}/{})",
                            status,
                            wait_time,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(wait_time).await;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = resp.text().await.unwrap_or_default();
                        let enhanced_error = crate::error::enhance_graph_error(&error_text);
                        return Err(MatrixError::GraphApiError(format!(
                            "HTTP {}: {}",
                            status, enhanced_error
                        )));
                    }

                    let data = resp.json::<T>().await?;
                    return Ok(data);
                }
                Err(e) => {
                    if !is_last {
                        let wait_time = calculate_backoff_with_jitter(attempt, self.initial_backoff_ms);
                        tracing::warn!(
                            "Connection error: {}. Retrying in {:?}... (attempt {}/{})",
                            e,
                            wait_time,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(|e| e.into()).unwrap_or_else(|| {
            MatrixError::GraphApiError(format!("GET {} failed after {} retries", url, MAX_RETRIES))
        }))
    }
}

// ============================================================================
// Pagination Helpers
// ============================================================================

/// Generic paginated response from Graph API
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl GraphClient {
    /// Fetch all pages of a paginated Graph API endpoint
    ///
    /// Follows `@odata.nextLink` until all pages are retrieved.
    ///
    /// # Example
    /// ```ignore
    /// let all_users: Vec<User> = client.get_all_pages("/users").await?;
    /// ```
    pub async fn get_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
    ) -> Result<Vec<T>> {
        let mut all_items: Vec<T> = Vec::new();
        let mut current_url = self.url_for(endpoint);
        let mut page_count = 0usize;

        loop {
            let response: PaginatedResponse<T> = self.get_with_retry(&current_url).await?;
            all_items.extend(response.value);
            page_count += 1;

            match response.next_link {
                Some(next) if !next.is_empty() => current_url = self.url_for(&next),
                _ => break,
            }
        }

        tracing::debug!(
            "Fetched {} item(s) over {} page(s) from {}",
            all_items.len(),
            page_count,
            endpoint
        );

        Ok(all_items)
    }
}
