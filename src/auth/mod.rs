//! Credential primitives: password digests, opaque bearer tokens and signed
//! access tokens. Nothing in here touches storage.

pub mod jwt;
pub mod opaque;
pub mod password;

pub use jwt::{Claims, JwtIssuer, JwtValidator, TokenError};
pub use opaque::{OpaqueTokenIssuer, TokenSource};
pub use password::PasswordHasher;
