//! Client configuration

use std::time::Duration;

use relmap_core::SourceError;

/// Retry behaviour for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each subsequent one.
    pub base_delay: Duration,
    /// Cap for exponential backoff.
    pub max_delay: Duration,
    /// HTTP statuses worth retrying.
    pub retry_on: Vec<u16>,
    /// Sleep until the advertised rate-limit reset instead of backing off.
    pub respect_rate_limit: bool,
    /// Longest wait accepted for a rate-limit reset.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            retry_on: vec![429, 500, 502, 503, 504],
            respect_rate_limit: true,
            max_rate_limit_wait: Duration::from_secs(3600),
        }
    }
}

impl RetryConfig {
    /// Whether `err` on attempt `attempt` (0-based) deserves another try.
    pub fn should_retry(&self, err: &SourceError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match err {
            SourceError::Transport(_) | SourceError::RateLimited { .. } => true,
            SourceError::Status { status, .. } => self.retry_on.contains(status),
            _ => false,
        }
    }

    /// Wait before retrying after `err` on attempt `attempt`.
    pub fn delay_for(&self, err: &SourceError, attempt: u32) -> Duration {
        if let SourceError::RateLimited { reset_in_secs } = err {
            if self.respect_rate_limit {
                return Duration::from_secs(reset_in_secs.saturating_add(1))
                    .min(self.max_rate_limit_wait);
            }
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// REST API base URL.
    pub api_base: String,
    /// Personal access token; unauthenticated requests hit low rate limits.
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryConfig,
    /// Page limit for paginated listings (100 items per page). Searches stop
    /// earlier, at the API's result cap.
    pub max_pages: u32,
    /// Concurrent lookups for tag commits and search-hit merge targets.
    pub concurrency: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_base: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(30),
            user_agent: format!("relmap/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
            max_pages: 30,
            concurrency: 8,
        }
    }
}

impl GithubConfig {
    /// Config from `GITHUB_API_URL` and `GITHUB_TOKEN`.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SourceError {
        SourceError::Status {
            status: code,
            url: "https://api.github.com/x".to_string(),
        }
    }

    #[test]
    fn retries_only_configured_statuses() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry(&status(502), 0));
        assert!(retry.should_retry(&status(429), 2));
        assert!(!retry.should_retry(&status(404), 0));
        assert!(!retry.should_retry(&status(403), 0));
        assert!(retry.should_retry(&SourceError::Transport("timeout".into()), 1));
        assert!(!retry.should_retry(&SourceError::Decode("bad".into()), 0));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let retry = RetryConfig::default();
        assert!(!retry.should_retry(&status(503), 3));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig::default();
        let err = status(500);
        assert_eq!(retry.delay_for(&err, 0), Duration::from_millis(500));
        assert_eq!(retry.delay_for(&err, 1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(&err, 3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(&err, 12), Duration::from_secs(60));
        assert_eq!(retry.delay_for(&err, 40), Duration::from_secs(60));
    }

    #[test]
    fn rate_limit_waits_for_reset() {
        let retry = RetryConfig::default();
        let err = SourceError::RateLimited { reset_in_secs: 42 };
        assert_eq!(retry.delay_for(&err, 0), Duration::from_secs(43));

        let ignoring = RetryConfig {
            respect_rate_limit: false,
            ..RetryConfig::default()
        };
        assert_eq!(ignoring.delay_for(&err, 0), Duration::from_millis(500));
    }

    #[test]
    fn api_base_is_trimmed() {
        let config = GithubConfig::default()
            .with_api_base("http://localhost:8080/")
            .with_token("t");
        assert_eq!(config.api_base, "http://localhost:8080");
        assert_eq!(config.token.as_deref(), Some("t"));
    }

    #[test]
    fn default_page_limit_covers_large_tag_listings() {
        let config = GithubConfig::default();
        assert!(config.max_pages * 100 >= 3000);
        assert!(config.concurrency > 0);
    }
}
