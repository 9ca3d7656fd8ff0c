//! Credential store: adaptive, salted password hashing (bcrypt).
//!
//! Only the hash is ever held. The plaintext passes through `set` and is dropped
//! when the call returns.
use std::fmt;

use thiserror::Error;

/// bcrypt's own default work factor.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashingError(#[from] bcrypt::BcryptError);

/// One-way hash of a user's password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    hash: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("hash", &"<redacted>").finish()
    }
}

impl Credential {
    /// Hash `plaintext` with a fresh random salt at the default cost.
    pub fn set(plaintext: &str) -> Result<Self, HashingError> {
        Self::set_with_cost(plaintext, DEFAULT_COST)
    }

    /// Hash `plaintext` with a fresh random salt.
    ///
    /// Fails when bcrypt refuses the cost (outside 4..=31).
    pub fn set_with_cost(plaintext: &str, cost: u32) -> Result<Self, HashingError> {
        let hash = bcrypt::hash(plaintext, cost)?;
        Ok(Self { hash })
    }

    /// Rebuild a credential from a stored hash. The encoding is checked on `matches`.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_hash(&self) -> &str {
        &self.hash
    }

    /// `Ok(false)` on a plain mismatch. `Err` only when the stored hash itself is unusable.
    pub fn matches(&self, candidate: &str) -> Result<bool, HashingError> {
        Ok(bcrypt::verify(candidate, &self.hash)?)
    }
}
