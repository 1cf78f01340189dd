use anyhow::Result;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

use crate::config::SecurityConfig;

/// One-way password digests.
///
/// New digests are Argon2id PHC strings carrying their own salt and cost.
/// Verification is driven by the digest itself, so bcrypt digests written by
/// earlier deployments still verify; [`PasswordHasher::needs_rehash`] flags
/// them for migration.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    #[must_use]
    pub const fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;

        Ok(Self::new(params))
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash with a fresh random salt. CPU heavy; call from a blocking task.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

        Ok(hash.to_string())
    }

    /// Never errors: a malformed or unknown digest simply doesn't verify.
    #[must_use]
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        if is_bcrypt(digest) {
            return bcrypt::verify(plaintext, digest).unwrap_or(false);
        }

        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };

        // Argon2 re-derives with the algorithm and params embedded in `parsed`.
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// True when `digest` was produced by another scheme or other parameters.
    #[must_use]
    pub fn needs_rehash(&self, digest: &str) -> bool {
        if is_bcrypt(digest) {
            return true;
        }

        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };

        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }

        Params::try_from(&parsed).map_or(true, |params| {
            params.m_cost() != self.params.m_cost()
                || params.t_cost() != self.params.t_cost()
                || params.p_cost() != self.params.p_cost()
        })
    }
}

fn is_bcrypt(digest: &str) -> bool {
    ["$2a$", "$2b$", "$2x$", "$2y$"]
        .iter()
        .any(|prefix| digest.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(Params::new(1024, 1, 1, None).unwrap())
    }

    #[test]
    fn verify_accepts_own_digest() {
        let hasher = hasher();
        let digest = hasher.hash("s3cret").unwrap();

        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify("s3cret", &digest));
        assert!(!hasher.verify("s3cret!", &digest));
    }

    #[test]
    fn digests_are_salted() {
        let hasher = hasher();
        let first = hasher.hash("same").unwrap();
        let second = hasher.hash("same").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("same", &first));
        assert!(hasher.verify("same", &second));
    }

    #[test]
    fn malformed_digest_is_false_not_error() {
        let hasher = hasher();
        assert!(!hasher.verify("anything", ""));
        assert!(!hasher.verify("anything", "not-a-digest"));
        assert!(!hasher.verify("anything", "$argon2id$v=19$garbage"));
        assert!(!hasher.verify("anything", "$2b$04$short"));
    }

    #[test]
    fn legacy_bcrypt_digest_verifies_and_needs_rehash() {
        let hasher = hasher();
        let legacy = bcrypt::hash("s3cret", 4).unwrap();

        assert!(hasher.verify("s3cret", &legacy));
        assert!(!hasher.verify("wrong", &legacy));
        assert!(hasher.needs_rehash(&legacy));
    }

    #[test]
    fn needs_rehash_tracks_params() {
        let hasher = hasher();
        let digest = hasher.hash("pw").unwrap();
        assert!(!hasher.needs_rehash(&digest));

        let stronger = PasswordHasher::new(Params::new(2048, 2, 1, None).unwrap());
        assert!(stronger.needs_rehash(&digest));
        // Old digests still verify under the new settings.
        assert!(stronger.verify("pw", &digest));
    }

    #[test]
    fn from_config_rejects_invalid_params() {
        let config = SecurityConfig {
            argon2_memory_cost_kib: 1,
            ..SecurityConfig::default()
        };
        assert!(PasswordHasher::from_config(&config).is_err());
    }
}
