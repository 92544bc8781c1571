use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::credential::TokenCredential;
use crate::error::CloudError;

/// Management endpoint of the Azure public cloud.
pub const ARM_PUBLIC_CLOUD: &str = "https://management.azure.com/";

const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// Per-call retry budget for transient provider failures.
///
/// The budget is deliberately per-call, not per-run: one flaky endpoint
/// cannot starve the rest of the validation graph.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so at most `max_retries + 1`
    /// requests go out).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Relative jitter applied to each delay, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1), factor: 2.0, jitter: 0.2 }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), with jitter applied.
    fn backoff(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.saturating_sub(1) as i32);
        let nominal = self.base_delay.as_secs_f64() * exp;
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64((nominal * (1.0 + spread)).max(0.0))
    }
}

/// Builder for [`ArmClient`]. The base URL override exists for tests and
/// sovereign clouds; everything else has production defaults.
pub struct ArmClientBuilder {
    credential: Arc<dyn TokenCredential>,
    base_url: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    http: Option<reqwest::Client>,
}

impl ArmClientBuilder {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential,
            base_url: ARM_PUBLIC_CLOUD.to_string(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            http: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cancellation signal honored by every in-flight call and backoff
    /// sleep issued through the client.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reuse an existing HTTP client (and its connection pool).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ArmClient, CloudError> {
        let base = Url::parse(&self.base_url).map_err(|e| CloudError::Malformed {
            reason: format!("invalid base URL {}: {e}", self.base_url),
            request_id: None,
        })?;
        Ok(ArmClient {
            http: self.http.unwrap_or_default(),
            base,
            credential: self.credential,
            token: OnceCell::new(),
            retry: self.retry,
            cancel: self.cancel,
        })
    }
}

/// Authenticated HTTP client for the ARM control plane.
///
/// One instance serves a whole run: the bearer token is fetched lazily on
/// first use and reused afterwards, and the underlying connection pool is
/// shared across all concurrent scopes.
pub struct ArmClient {
    http: reqwest::Client,
    base: Url,
    credential: Arc<dyn TokenCredential>,
    token: OnceCell<String>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

/// One page of an ARM collection response.
#[derive(Debug, Deserialize)]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

impl ArmClient {
    pub fn builder(credential: Arc<dyn TokenCredential>) -> ArmClientBuilder {
        ArmClientBuilder::new(credential)
    }

    async fn bearer(&self) -> Result<&str, CloudError> {
        self.token
            .get_or_try_init(|| async {
                let token = self.credential.token().await?;
                Ok::<_, CloudError>(token.token)
            })
            .await
            .map(String::as_str)
    }

    fn endpoint(&self, path_and_query: &str) -> Result<Url, CloudError> {
        self.base
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|e| CloudError::Malformed {
                reason: format!("invalid request path {path_and_query}: {e}"),
                request_id: None,
            })
    }

    /// GET a single resource and decode its JSON body.
    ///
    /// `resource` is the human-readable name used in `NotFound` /
    /// `Forbidden` errors, e.g. `"subscription sub-1"`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        resource: &str,
    ) -> Result<T, CloudError> {
        let url = self.endpoint(path_and_query)?;
        let response = self.execute(Method::GET, url, None, resource).await?;
        decode(response).await
    }

    /// PUT a JSON body and decode the response. Used only by the gated
    /// storage-account create.
    pub async fn put_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        body: serde_json::Value,
        resource: &str,
    ) -> Result<T, CloudError> {
        let url = self.endpoint(path_and_query)?;
        let response = self.execute(Method::PUT, url, Some(body), resource).await?;
        decode(response).await
    }

    /// POST a JSON body and decode the response (resource-graph queries).
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        body: serde_json::Value,
        resource: &str,
    ) -> Result<T, CloudError> {
        let url = self.endpoint(path_and_query)?;
        let response = self.execute(Method::POST, url, Some(body), resource).await?;
        decode(response).await
    }

    /// GET an ARM collection, following `nextLink` until exhausted.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        resource: &str,
    ) -> Result<Vec<T>, CloudError> {
        let mut items = Vec::new();
        let mut url = Some(self.endpoint(path_and_query)?);
        while let Some(page_url) = url.take() {
            let response = self.execute(Method::GET, page_url, None, resource).await?;
            let page: ListPage<T> = decode(response).await?;
            items.extend(page.value);
            if let Some(next) = page.next_link {
                let next_url = Url::parse(&next).map_err(|e| CloudError::Malformed {
                    reason: format!("invalid nextLink {next}: {e}"),
                    request_id: None,
                })?;
                url = Some(next_url);
            }
        }
        Ok(items)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        resource: &str,
    ) -> Result<Response, CloudError> {
        let bearer = self.bearer().await?;
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CloudError::Cancelled);
            }
            attempts += 1;
            let mut request = self.http.request(method.clone(), url.clone()).bearer_auth(bearer);
            if let Some(ref b) = body {
                request = request.json(b);
            }

            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(CloudError::Cancelled),
                result = request.send() => result,
            };

            match sent {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let request_id = header_value(&response, REQUEST_ID_HEADER);
                    if is_transient_status(status) && attempts <= self.retry.max_retries {
                        self.sleep_before_retry(&url, status.as_u16(), attempts).await?;
                        continue;
                    }
                    return Err(classify_terminal(status, request_id, resource, attempts));
                }
                Err(err) => {
                    // Connection resets and timeouts are transient; anything
                    // else (TLS, invalid request) is not going to improve.
                    let retryable = err.is_connect() || err.is_timeout() || err.is_request();
                    if retryable && attempts <= self.retry.max_retries {
                        self.sleep_before_retry(&url, 0, attempts).await?;
                        continue;
                    }
                    return Err(CloudError::Network { reason: err.to_string() });
                }
            }
        }
    }

    async fn sleep_before_retry(
        &self,
        url: &Url,
        status: u16,
        attempts: u32,
    ) -> Result<(), CloudError> {
        let delay = self.retry.backoff(attempts);
        tracing::debug!(
            url = %url,
            status,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "transient provider failure, backing off"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CloudError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 429 | 500 | 502 | 503 | 504
    )
}

fn classify_terminal(
    status: StatusCode,
    request_id: Option<String>,
    resource: &str,
    attempts: u32,
) -> CloudError {
    match status.as_u16() {
        404 => CloudError::NotFound { resource: resource.to_string(), request_id },
        401 | 403 => CloudError::Forbidden { scope: resource.to_string(), request_id },
        429 => CloudError::Throttled { request_id, attempts },
        408 | 500 | 502 | 503 | 504 => {
            CloudError::Transient { status: status.as_u16(), request_id, attempts }
        }
        other => CloudError::Malformed {
            reason: format!("unexpected HTTP {other} for {resource}"),
            request_id,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CloudError> {
    let request_id = header_value(&response, REQUEST_ID_HEADER);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CloudError::Network { reason: e.to_string() })?;
    serde_json::from_slice(&bytes).map_err(|e| CloudError::Malformed {
        reason: format!("undecodable provider response: {e}"),
        request_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 1..=3 {
            let nominal = Duration::from_secs(1 << (retry - 1)).as_secs_f64();
            for _ in 0..50 {
                let d = policy.backoff(retry).as_secs_f64();
                assert!(d >= nominal * 0.8 - f64::EPSILON, "{d} below jitter floor");
                assert!(d <= nominal * 1.2 + f64::EPSILON, "{d} above jitter ceiling");
            }
        }
    }

    #[test]
    fn transient_statuses() {
        for code in [408u16, 429, 500, 502, 503, 504] {
            assert!(is_transient_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404, 409] {
            assert!(!is_transient_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn terminal_classification() {
        let err = classify_terminal(StatusCode::NOT_FOUND, None, "vnet v1", 1);
        assert!(err.is_not_found());
        let err = classify_terminal(StatusCode::FORBIDDEN, Some("req-9".into()), "scope", 1);
        assert!(err.is_forbidden());
        assert_eq!(err.request_id(), Some("req-9"));
        let err = classify_terminal(StatusCode::TOO_MANY_REQUESTS, None, "skus", 4);
        assert!(matches!(err, CloudError::Throttled { attempts: 4, .. }));
        let err = classify_terminal(StatusCode::CONFLICT, None, "storage", 1);
        assert!(matches!(err, CloudError::Malformed { .. }));
    }
}
