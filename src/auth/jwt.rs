//! Signed access tokens (JWT).
//!
//! Claims carry the subject (username), issue time and absolute expiry in
//! seconds since the epoch. Only HMAC algorithms are used: one shared secret
//! signs and verifies.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::config::SecurityConfig;

/// Lifetime applied when the caller doesn't ask for one.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Why a token was refused. Kept for logs; callers only ever see "unauthorized".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is malformed")]
    Malformed,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            _ => Self::Malformed,
        }
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::from_str(name)
        .map_err(|_| anyhow::anyhow!("Unknown signing algorithm: {name}"))?;

    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => anyhow::bail!("Signing algorithm {other:?} needs an asymmetric key"),
    }
}

#[derive(Clone)]
pub struct JwtIssuer {
    encoding_key: EncodingKey,
    header: Header,
    default_ttl: Duration,
}

impl JwtIssuer {
    #[must_use]
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            header: Header::new(algorithm),
            default_ttl: Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;
        Ok(Self::new(config.secret_key.as_bytes(), algorithm))
    }

    /// Sign a token for `subject` expiring `ttl` from now (15 minutes if unset).
    pub fn issue(&self, subject: &str, ttl: Option<Duration>) -> Result<String, TokenError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl.unwrap_or(self.default_ttl))
            .ok_or_else(|| TokenError::Signing("Token expiry is out of range".to_string()))?;

        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    #[must_use]
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;
        Ok(Self::new(config.secret_key.as_bytes(), algorithm))
    }

    /// Check signature and expiry, returning the subject claim.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;

        if data.claims.sub.is_empty() {
            return Err(TokenError::Malformed);
        }

        Ok(data.claims.sub)
    }
}
