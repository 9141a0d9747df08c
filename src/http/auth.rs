//! Bearer token acquisition and caching
//!
//! Token issuance is external; the harvester only consumes tokens through
//! [`TokenProvider`]. [`TokenCache`] keeps the last token per audience and
//! refreshes it shortly before it expires.

use crate::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tokens expiring within this window are refreshed before use
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Returns true if the token expires within `margin` of `now`
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

/// Source of bearer tokens for a given audience
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, audience: &str) -> Result<AccessToken>;
}

/// Reads a pre-issued token from an environment variable
pub struct EnvTokenProvider {
    variable: String,
    lifetime: Duration,
}

impl EnvTokenProvider {
    pub fn new(variable: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            variable: variable.into(),
            lifetime,
        }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self, _audience: &str) -> Result<AccessToken> {
        let token = std::env::var(&self.variable).map_err(|_| {
            HarvestError::Auth(format!("environment variable {} is not set", self.variable))
        })?;

        if token.trim().is_empty() {
            return Err(HarvestError::Auth(format!(
                "environment variable {} is empty",
                self.variable
            )));
        }

        Ok(AccessToken {
            token,
            expires_at: Utc::now() + self.lifetime,
        })
    }
}

/// Caches the token for one audience
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    audience: String,
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>, audience: impl Into<String>) -> Self {
        Self {
            provider,
            audience: audience.into(),
            current: Mutex::new(None),
        }
    }

    /// Returns a token valid for at least the refresh margin
    pub async fn bearer(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        let margin = Duration::minutes(REFRESH_MARGIN_MINUTES);

        match current.as_ref() {
            Some(token) if !token.expires_within(margin, Utc::now()) => Ok(token.token.clone()),
            _ => {
                tracing::debug!("Refreshing access token for audience '{}'", self.audience);
                let token = self.provider.access_token(&self.audience).await?;
                let value = token.token.clone();
                *current = Some(token);
                Ok(value)
            }
        }
    }
}
