use rand::{Rng, distr::Alphanumeric};

/// Anything that can mint opaque bearer tokens.
pub trait TokenSource: Send + Sync {
    fn issue(&self) -> String;
}

/// Random bearer tokens with no inner structure.
///
/// Drawn from the thread-local CSPRNG over `[A-Za-z0-9]`. Uniqueness is left
/// to the storage constraint on the token column; callers retry on collision.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueTokenIssuer {
    length: usize,
}

impl OpaqueTokenIssuer {
    pub const MIN_LENGTH: usize = 12;

    #[must_use]
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(Self::MIN_LENGTH),
        }
    }
}

impl TokenSource for OpaqueTokenIssuer {
    fn issue(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_fixed_length_alphanumeric() {
        let issuer = OpaqueTokenIssuer::new(32);
        let token = issuer.issue();

        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn length_is_clamped_to_minimum() {
        assert_eq!(OpaqueTokenIssuer::new(4).issue().len(), OpaqueTokenIssuer::MIN_LENGTH);
    }

    #[test]
    fn tokens_differ() {
        let issuer = OpaqueTokenIssuer::new(24);
        assert_ne!(issuer.issue(), issuer.issue());
    }
}
