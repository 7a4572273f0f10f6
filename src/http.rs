//! Blocking HTTP plumbing shared by the embedder, scorer and index clients.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

/// Retry budget for transient transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; values below one are raised to one, and one
    /// means no retries.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Sends the request built by `build`, retrying 429/5xx and connection errors.
    pub fn send<F>(&self, label: &str, mut build: F) -> Result<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build().send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("{label} request failed ({status}): {body}");
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(anyhow::Error::new(err).context(format!("{label} request failed")));
                }
            }
        }
    }
}

/// Builds a JSON client with an optional bearer token.
pub fn json_client(label: &str, bearer: Option<&str>, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer.map(str::trim).filter(|token| !token.is_empty()) {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .with_context(|| format!("invalid {label} credential"))?,
        );
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .with_context(|| format!("failed to build {label} HTTP client"))
}

/// Ensures a base URL is http(s) and strips trailing slashes.
pub fn normalize_base_url(label: &str, url: &str) -> Result<String> {
    let trimmed = url.trim();
    anyhow::ensure!(
        trimmed.starts_with("http://") || trimmed.starts_with("https://"),
        "{label} endpoint must be an http(s) URL, got {trimmed:?}"
    );
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(5), retry_backoff(9));
    }

    #[test]
    fn normalizes_urls() {
        assert_eq!(
            normalize_base_url("index", "http://localhost:19530/").unwrap(),
            "http://localhost:19530"
        );
        assert!(normalize_base_url("index", "localhost:19530").is_err());
    }

    #[test]
    fn retries_only_transient_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn single_attempt_fails_fast_on_connect_errors() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let client = json_client("index", None, Duration::from_secs(2)).unwrap();
        let mut builds = 0;
        let start = std::time::Instant::now();
        let result = RetryPolicy::new(1).send("index", || {
            builds += 1;
            client.post(format!("http://{addr}/v2/vectordb/entities/search"))
        });
        assert!(result.is_err());
        assert_eq!(builds, 1);
        assert!(start.elapsed() < retry_backoff(1));
    }
}
