//! Domain service for user accounts.
//!
//! Handles registration, credential checks, access-token issuance and the
//! reverse lookup from a presented token to its account, plus the small
//! administrative surface (activation, removal, listings).

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::auth::TokenError;
use crate::config::CredentialScheme;
use crate::db::{Record, RepositoryError};
use crate::entities::users;

/// Errors surfaced by account operations.
///
/// Missing-user and wrong-secret both become [`AccountError::InvalidCredentials`];
/// every token defect becomes [`AccountError::InvalidToken`].
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Username already registered")]
    DuplicateUsername,

    #[error("Incorrect username or password")]
    InvalidCredentials,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error("Inactive user")]
    InactiveAccount,

    #[error("Could not issue a unique token after {0} attempts")]
    IssuanceExhausted(u32),

    #[error("Filter matched more than one account")]
    MultipleMatches,

    #[error("Account not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AccountError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::MultipleMatches => Self::MultipleMatches,
            RepositoryError::UniqueViolation(detail) => {
                Self::Database(format!("unique constraint violated: {detail}"))
            }
            RepositoryError::Database(err) => Self::Database(err.to_string()),
        }
    }
}

impl From<TokenError> for AccountError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => Self::Internal(msg),
            TokenError::InvalidSignature | TokenError::Expired | TokenError::Malformed => {
                Self::InvalidToken
            }
        }
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Public view of an account. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub id: i32,
    pub username: String,
    pub is_active: bool,
}

impl From<users::Model> for UserAccount {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            is_active: model.is_active,
        }
    }
}

/// Outcome of a registration. `token` is set under the token scheme only.
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: UserAccount,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

impl AccessToken {
    #[must_use]
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// Domain service trait for accounts.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    fn scheme(&self) -> CredentialScheme;

    /// Creates an account. `secret` is the password under the password
    /// scheme and ignored under the token scheme.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::DuplicateUsername`] if the name is taken, even
    /// when a concurrent registration wins the race.
    async fn register(
        &self,
        username: &str,
        secret: Option<&str>,
    ) -> Result<Registration, AccountError>;

    /// Verifies credentials and returns the account.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::InvalidCredentials`] for an unknown user or a
    /// wrong secret alike.
    async fn authenticate(&self, username: &str, secret: &str)
    -> Result<UserAccount, AccountError>;

    /// Authenticates and hands out a bearer access token.
    async fn login(&self, username: &str, secret: &str) -> Result<AccessToken, AccountError>;

    /// Resolves a presented bearer token back to its (active) account.
    async fn resolve_from_token(&self, token: &str) -> Result<UserAccount, AccountError>;

    /// Projection of every account (id, username, `is_active`).
    async fn list_accounts(&self) -> Result<Vec<Record>, AccountError>;

    /// Every account aggregated under a `"users"` key.
    async fn accounts_json(&self) -> Result<JsonValue, AccountError>;

    async fn account_json(&self, username: &str) -> Result<Option<JsonValue>, AccountError>;

    /// # Errors
    ///
    /// Returns [`AccountError::NotFound`] if no account has that username.
    async fn set_active(&self, username: &str, active: bool) -> Result<(), AccountError>;

    /// Deletes by key. Removing an absent id is a no-op.
    async fn remove(&self, id: i32) -> Result<(), AccountError>;
}
