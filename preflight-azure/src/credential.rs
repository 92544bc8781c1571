use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CloudError;

/// A bearer token for the ARM audience.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), expires_on: None }
    }
}

/// Supplied capability that authenticates cloud calls.
///
/// Acquisition and refresh are the caller's responsibility; the access
/// layer requests a token once per run and reuses it for every call made
/// under the same client.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<AccessToken, CloudError>;
}

/// Credential wrapping an already-acquired token. Useful for callers that
/// run their own acquisition flow, and for tests.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<AccessToken, CloudError> {
        Ok(AccessToken::new(self.token.clone()))
    }
}
