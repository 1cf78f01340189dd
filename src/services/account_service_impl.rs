//! `SeaORM` implementation of the `AccountService` trait.

use async_trait::async_trait;
use chrono::Duration;
use sea_orm::{IdenStatic, Set};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

use crate::auth::{JwtIssuer, JwtValidator, OpaqueTokenIssuer, PasswordHasher, TokenSource};
use crate::config::{CredentialScheme, SecurityConfig};
use crate::db::{Fields, Record, Repository, RepositoryError, Store};
use crate::entities::users;
use crate::services::account_service::{
    AccessToken, AccountError, AccountService, Registration, UserAccount,
};

/// Output shape of the JSON listings: `(output key, column)`.
const ACCOUNT_FIELDS: [(&str, users::Column); 3] = [
    ("id", users::Column::Id),
    ("username", users::Column::Username),
    ("is_active", users::Column::IsActive),
];

const ACCOUNT_COLUMNS: [users::Column; 3] = [
    users::Column::Id,
    users::Column::Username,
    users::Column::IsActive,
];

pub struct SeaOrmAccountService {
    users: Repository<users::Entity>,
    scheme: CredentialScheme,
    hasher: PasswordHasher,
    tokens: Arc<dyn TokenSource>,
    issuer: JwtIssuer,
    validator: JwtValidator,
    access_ttl: Duration,
    issuance_retries: u32,
    auto_migrate_hashes: bool,
    /// Verified against when there is no real digest, so a missing account
    /// costs the same as a wrong password.
    decoy_digest: String,
    #[cfg(test)]
    verifications: std::sync::atomic::AtomicUsize,
}

impl SeaOrmAccountService {
    pub fn new(store: &Store, config: &SecurityConfig) -> anyhow::Result<Self> {
        let access_ttl = Duration::try_minutes(config.access_token_expire_minutes)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "access_token_expire_minutes out of range: {}",
                    config.access_token_expire_minutes
                )
            })?;

        let hasher = PasswordHasher::from_config(config)?;
        let decoy_digest = hasher.hash(&OpaqueTokenIssuer::new(32).issue())?;

        Ok(Self {
            users: store.users(),
            scheme: config.credential_scheme,
            hasher,
            tokens: Arc::new(OpaqueTokenIssuer::new(config.opaque_token_length)),
            issuer: JwtIssuer::from_config(config)?,
            validator: JwtValidator::from_config(config)?,
            access_ttl,
            issuance_retries: config.token_issuance_retries.max(1),
            auto_migrate_hashes: config.auto_migrate_password_hashes,
            decoy_digest,
            #[cfg(test)]
            verifications: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Swap the opaque token generator.
    #[must_use]
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    async fn hash_secret(&self, secret: &str) -> Result<String, AccountError> {
        let hasher = self.hasher.clone();
        let secret = secret.to_string();

        // Argon2 is CPU-bound; keep it off the async workers.
        let digest = task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AccountError::Internal(format!("Password hashing task failed: {e}")))??;

        Ok(digest)
    }

    async fn verify_secret(&self, secret: &str, digest: &str) -> Result<bool, AccountError> {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let hasher = self.hasher.clone();
        let secret = secret.to_string();
        let digest = digest.to_string();

        task::spawn_blocking(move || hasher.verify(&secret, &digest))
            .await
            .map_err(|e| AccountError::Internal(format!("Password verification task failed: {e}")))
    }

    async fn register_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Registration, AccountError> {
        let digest = self.hash_secret(password).await?;

        let model = self
            .users
            .create(new_account(username, Some(digest), None))
            .await
            .map_err(username_taken)?;

        Ok(Registration {
            account: model.into(),
            token: None,
        })
    }

    async fn register_with_token(&self, username: &str) -> Result<Registration, AccountError> {
        for attempt in 1..=self.issuance_retries {
            let token = self.tokens.issue();

            match self
                .users
                .create(new_account(username, None, Some(token.clone())))
                .await
            {
                Ok(model) => {
                    return Ok(Registration {
                        account: model.into(),
                        token: Some(token),
                    });
                }
                Err(RepositoryError::UniqueViolation(detail))
                    if detail.contains(users::Column::Token.as_str()) =>
                {
                    warn!(attempt, "Opaque token collided with an existing one, reissuing");
                }
                Err(err) => return Err(username_taken(err)),
            }
        }

        Err(AccountError::IssuanceExhausted(self.issuance_retries))
    }

    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<users::Model, AccountError> {
        let Some(account) = self.users.get_if_exists(&by_username(username)).await? else {
            self.verify_secret(password, &self.decoy_digest).await?;
            debug!("Authentication failed: unknown user");
            return Err(AccountError::InvalidCredentials);
        };

        let Some(digest) = account.hashed_password.clone() else {
            self.verify_secret(password, &self.decoy_digest).await?;
            debug!(user_id = account.id, "Authentication failed: account has no password");
            return Err(AccountError::InvalidCredentials);
        };

        if !self.verify_secret(password, &digest).await? {
            debug!(user_id = account.id, "Authentication failed: wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        if self.auto_migrate_hashes && self.hasher.needs_rehash(&digest) {
            self.rehash(&account, password).await;
        }

        Ok(account)
    }

    /// Best effort: a failed migration leaves the old, still valid digest.
    async fn rehash(&self, account: &users::Model, password: &str) {
        let digest = match self.hash_secret(password).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(user_id = account.id, "Password rehash failed: {e}");
                return;
            }
        };

        let result = self
            .users
            .update(
                &Fields::new().with(users::Column::Id, account.id),
                Fields::new().with(users::Column::HashedPassword, digest),
            )
            .await;

        match result {
            Ok(_) => info!(user_id = account.id, "Migrated password digest to current parameters"),
            Err(e) => warn!(user_id = account.id, "Failed to store migrated password digest: {e}"),
        }
    }

    async fn authenticate_token(
        &self,
        username: &str,
        token: &str,
    ) -> Result<users::Model, AccountError> {
        if token.is_empty() {
            return Err(AccountError::InvalidCredentials);
        }

        let filters = by_username(username).with(users::Column::Token, token);
        self.users.get_if_exists(&filters).await?.ok_or_else(|| {
            debug!("Authentication failed: unknown user or token");
            AccountError::InvalidCredentials
        })
    }

    async fn issue_access_token(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<AccessToken, AccountError> {
        let account = self.authenticate(username, secret).await?;
        if !account.is_active {
            return Err(AccountError::InactiveAccount);
        }

        let token = match self.scheme {
            CredentialScheme::Password => {
                self.issuer.issue(&account.username, Some(self.access_ttl))?
            }
            // The opaque token is the bearer credential itself.
            CredentialScheme::Token => secret.to_string(),
        };

        Ok(AccessToken::bearer(token))
    }
}

fn by_username(username: &str) -> Fields<users::Entity> {
    Fields::new().with(users::Column::Username, username)
}

fn new_account(
    username: &str,
    hashed_password: Option<String>,
    token: Option<String>,
) -> users::ActiveModel {
    users::ActiveModel {
        username: Set(username.to_string()),
        hashed_password: Set(hashed_password),
        token: Set(token),
        is_active: Set(true),
        ..Default::default()
    }
}

/// The storage constraint is the authority on username uniqueness.
fn username_taken(err: RepositoryError) -> AccountError {
    match err {
        RepositoryError::UniqueViolation(_) => AccountError::DuplicateUsername,
        other => other.into(),
    }
}

fn record_outcome(name: &'static str, result: &Result<impl Sized, AccountError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(AccountError::InvalidCredentials | AccountError::InvalidToken) => "rejected",
        Err(AccountError::DuplicateUsername) => "duplicate",
        Err(AccountError::InactiveAccount) => "inactive",
        Err(_) => "error",
    };
    metrics::counter!(name, "outcome" => outcome).increment(1);
}

#[async_trait]
impl AccountService for SeaOrmAccountService {
    fn scheme(&self) -> CredentialScheme {
        self.scheme
    }

    async fn register(
        &self,
        username: &str,
        secret: Option<&str>,
    ) -> Result<Registration, AccountError> {
        if username.trim().is_empty() {
            return Err(AccountError::Validation("Username is required".to_string()));
        }

        // Fast path only; concurrent registrations are settled by the UNIQUE constraint.
        if self
            .users
            .get(&[users::Column::Id], &by_username(username))
            .await?
            .is_some()
        {
            let duplicate = Err::<Registration, _>(AccountError::DuplicateUsername);
            record_outcome("auth_registrations_total", &duplicate);
            return duplicate;
        }

        let result = match self.scheme {
            CredentialScheme::Password => {
                let password = secret.filter(|s| !s.is_empty()).ok_or_else(|| {
                    AccountError::Validation("Password is required".to_string())
                })?;
                self.register_with_password(username, password).await
            }
            CredentialScheme::Token => self.register_with_token(username).await,
        };

        record_outcome("auth_registrations_total", &result);
        if let Ok(registration) = &result {
            info!(user_id = registration.account.id, "Registered new account");
        }
        result
    }

    async fn authenticate(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<UserAccount, AccountError> {
        let account = match self.scheme {
            CredentialScheme::Password => self.authenticate_password(username, secret).await?,
            CredentialScheme::Token => self.authenticate_token(username, secret).await?,
        };

        Ok(account.into())
    }

    async fn login(&self, username: &str, secret: &str) -> Result<AccessToken, AccountError> {
        let result = self.issue_access_token(username, secret).await;
        record_outcome("auth_login_total", &result);
        result
    }

    async fn resolve_from_token(&self, token: &str) -> Result<UserAccount, AccountError> {
        let account = match self.scheme {
            CredentialScheme::Password => {
                let subject = self.validator.validate(token).map_err(|e| {
                    debug!(reason = %e, "Rejected access token");
                    AccountError::from(e)
                })?;
                self.users.get_if_exists(&by_username(&subject)).await?
            }
            CredentialScheme::Token => {
                if token.is_empty() {
                    None
                } else {
                    let filters: Fields<users::Entity> =
                        Fields::new().with(users::Column::Token, token);
                    self.users.get_if_exists(&filters).await?
                }
            }
        };

        let Some(account) = account else {
            debug!("Rejected access token: no matching account");
            return Err(AccountError::InvalidToken);
        };

        if !account.is_active {
            return Err(AccountError::InactiveAccount);
        }

        Ok(account.into())
    }

    async fn list_accounts(&self) -> Result<Vec<Record>, AccountError> {
        Ok(self.users.list(&ACCOUNT_COLUMNS, &Fields::new()).await?)
    }

    async fn accounts_json(&self) -> Result<JsonValue, AccountError> {
        Ok(self
            .users
            .list_as_json("users", &ACCOUNT_FIELDS, None, &Fields::new())
            .await?)
    }

    async fn account_json(&self, username: &str) -> Result<Option<JsonValue>, AccountError> {
        Ok(self
            .users
            .get_as_json(&ACCOUNT_FIELDS, &by_username(username))
            .await?)
    }

    async fn set_active(&self, username: &str, active: bool) -> Result<(), AccountError> {
        let updated = self
            .users
            .update(
                &by_username(username),
                Fields::new().with(users::Column::IsActive, active),
            )
            .await?;

        if updated == 0 {
            return Err(AccountError::NotFound);
        }

        info!(username, active, "Account activation changed");
        Ok(())
    }

    async fn remove(&self, id: i32) -> Result<(), AccountError> {
        self.users.delete_by_key(id).await?;
        info!(user_id = id, "Account removed");
        Ok(())
    }
}
