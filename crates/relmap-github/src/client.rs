//! HTTP transport with retry, backoff and rate-limit handling.

use std::sync::Arc;

use chrono::Utc;
use relmap_core::metrics::METRICS;
use relmap_core::{SourceError, SourceResult};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::GithubConfig;
use crate::wire::rate_limit_wait;

const JSON: &str = "application/vnd.github+json";
const RAW: &str = "application/vnd.github.raw+json";
const PER_PAGE: u32 = 100;

/// Shared GitHub REST client. Cloning is cheap.
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    config: Arc<GithubConfig>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.config.api_base)
            .field("authenticated", &self.config.token.is_some())
            .finish()
    }
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> SourceResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SourceError::Transport(format!("invalid token header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        if config.token.is_none() {
            warn!("GITHUB_TOKEN is not set; unauthenticated requests are heavily rate limited");
        }
        Ok(GithubClient {
            http,
            config: Arc::new(config),
        })
    }

    pub fn from_env() -> SourceResult<Self> {
        Self::new(GithubConfig::from_env())
    }

    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
    }

    /// Decoded JSON at `path`; `None` on 404.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SourceResult<Option<T>> {
        let url = self.url(path);
        match self.send(&url, query, JSON).await? {
            Some(response) => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| SourceError::Decode(format!("{url}: {e}"))),
            None => Ok(None),
        }
    }

    /// Raw file body at `path`; `None` on 404.
    pub async fn get_raw(&self, path: &str, query: &[(&str, String)]) -> SourceResult<Option<String>> {
        let url = self.url(path);
        match self.send(&url, query, RAW).await? {
            Some(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| SourceError::Transport(format!("{url}: {e}"))),
            None => Ok(None),
        }
    }

    /// Every item of a paginated array listing, up to the configured page limit.
    pub async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SourceResult<Vec<T>> {
        let mut items = Vec::new();
        for page in 1..=self.config.max_pages {
            let mut params = query.to_vec();
            params.push(("per_page", PER_PAGE.to_string()));
            params.push(("page", page.to_string()));
            let Some(batch) = self.get_json::<Vec<T>>(path, &params).await? else {
                return Ok(items);
            };
            let last = batch.len() < PER_PAGE as usize;
            items.extend(batch);
            if last {
                return Ok(items);
            }
        }
        warn!(
            path,
            pages = self.config.max_pages,
            items = items.len(),
            "page limit reached with a full last page; listing may be truncated"
        );
        Ok(items)
    }

    /// Send a GET with retries. Transient failures are retried with
    /// exponential backoff; rate limits wait for the advertised reset.
    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &'static str,
    ) -> SourceResult<Option<Response>> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            METRICS.inc_api_requests();
            let outcome = self
                .http
                .get(url)
                .query(query)
                .header(ACCEPT, accept)
                .send()
                .await;

            let err = match outcome {
                Ok(response) => match classify(response, url) {
                    Ok(found) => return Ok(found),
                    Err(err) => err,
                },
                Err(e) => SourceError::Transport(e.to_string()),
            };

            if !retry.should_retry(&err, attempt) {
                if attempt > 0 && retry.should_retry(&err, 0) {
                    return Err(SourceError::Exhausted {
                        attempts: attempt + 1,
                        last: err.to_string(),
                    });
                }
                return Err(err);
            }

            let delay = retry.delay_for(&err, attempt);
            METRICS.inc_api_retries();
            warn!(
                url = %url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying GitHub request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Map a response to success, not-found, or a typed error.
fn classify(response: Response, url: &str) -> SourceResult<Option<Response>> {
    let status = response.status();
    let headers = response.headers();
    let remaining = header(headers, "x-ratelimit-remaining").and_then(|v| v.parse::<u64>().ok());
    if let Some(left) = remaining {
        if left < 100 {
            debug!(remaining = left, "GitHub rate limit running low");
        }
    }

    if status.is_success() {
        return Ok(Some(response));
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (remaining == Some(0) || header(headers, "retry-after").is_some()));
    if limited {
        let reset_in_secs = rate_limit_wait(
            header(headers, "x-ratelimit-reset"),
            header(headers, "retry-after"),
            Utc::now(),
        );
        return Err(SourceError::RateLimited { reset_in_secs });
    }

    Err(SourceError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
