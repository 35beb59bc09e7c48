//! Token validation collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;

/// Validates bearer tokens and resolves them to a user id.
#[async_trait]
pub trait AuthValidator: Send + Sync + std::fmt::Debug {
    /// Validates `token` and returns the authenticated user id.
    async fn validate(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Clone)]
struct Grant {
    user_id: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Validator backed by a fixed token table.
///
/// Expiry is checked against the attached clock, the system clock unless
/// replaced with [`StaticTokenValidator::with_clock`].
#[derive(Debug, Clone)]
pub struct StaticTokenValidator {
    grants: HashMap<String, Grant>,
    clock: Arc<dyn Clock>,
}

impl Default for StaticTokenValidator {
    fn default() -> Self {
        Self {
            grants: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl StaticTokenValidator {
    /// Creates an empty validator that rejects every token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the clock used for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Adds a non-expiring token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.grants.insert(
            token.into(),
            Grant {
                user_id: user_id.into(),
                expires_at: None,
            },
        );
        self
    }

    /// Adds a token that stops validating at `expires_at`.
    #[must_use]
    pub fn with_expiring_token(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        self.grants.insert(
            token.into(),
            Grant {
                user_id: user_id.into(),
                expires_at: Some(expires_at),
            },
        );
        self
    }

    /// Parses a `token:user,token:user` list. Malformed entries are skipped.
    #[must_use]
    pub fn from_list(list: &str) -> Self {
        list.split(',')
            .filter_map(|entry| entry.trim().split_once(':'))
            .filter(|(token, user)| !token.is_empty() && !user.is_empty())
            .fold(Self::new(), |v, (token, user)| v.with_token(token, user))
    }

    /// Returns the number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Returns true if no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl AuthValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let grant = self.grants.get(token).ok_or(AuthError::InvalidToken)?;
        if grant.expires_at.is_some_and(|at| self.clock.now() >= at) {
            return Err(AuthError::Expired);
        }

        Ok(grant.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_validate_known_token() {
        let validator = StaticTokenValidator::new().with_token("t1", "alice");
        assert_eq!(validator.validate("t1").await, Ok("alice".to_string()));
    }

    #[tokio::test]
    async fn test_validate_unknown_token() {
        let validator = StaticTokenValidator::new().with_token("t1", "alice");
        assert_eq!(validator.validate("nope").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_validate_empty_token() {
        let validator = StaticTokenValidator::new();
        assert_eq!(validator.validate("").await, Err(AuthError::MissingToken));
    }

    #[tokio::test]
    async fn test_validate_expired_token() {
        let past = Utc::now() - Duration::minutes(1);
        let validator = StaticTokenValidator::new().with_expiring_token("t1", "alice", past);
        assert_eq!(validator.validate("t1").await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn test_expiry_follows_injected_clock() {
        let clock = Arc::new(ManualClock::default());
        let expires_at = clock.now() + Duration::minutes(5);
        let validator = StaticTokenValidator::new()
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .with_expiring_token("t1", "alice", expires_at);

        assert_eq!(validator.validate("t1").await, Ok("alice".to_string()));

        clock.advance(Duration::minutes(4));
        assert_eq!(validator.validate("t1").await, Ok("alice".to_string()));

        clock.advance(Duration::minutes(1));
        assert_eq!(validator.validate("t1").await, Err(AuthError::Expired));
    }

    #[test]
    fn test_from_list() {
        let validator = StaticTokenValidator::from_list("a:alice, b:bob,broken,:x");
        assert_eq!(validator.len(), 2);
    }
}
