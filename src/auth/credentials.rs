//! Password hashing and verification.
//!
//! Hashes are Argon2id PHC strings. The cost parameters are compiled in so
//! every hash issued by a given build is comparable; verification reads the
//! parameters back out of the PHC string, so older hashes keep verifying
//! after the constants change.

use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

/// Argon2 memory cost in KiB.
pub const MEMORY_COST_KIB: u32 = 19_456;
/// Argon2 iteration count.
pub const TIME_COST: u32 = 2;
/// Argon2 degree of parallelism.
pub const PARALLELISM: u32 = 1;

const SALT_LEN: usize = 16;

/// Errors raised by the credential verifier.
#[derive(Debug, Clone)]
pub enum CredentialError {
    /// Entropy or hasher failure. Not caused by the caller's input.
    HashingFailure(String),
    /// The stored hash is not a parseable PHC string.
    MalformedHash(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashingFailure(msg) => write!(f, "Password hashing failed: {}", msg),
            Self::MalformedHash(msg) => write!(f, "Malformed password hash: {}", msg),
        }
    }
}

impl std::error::Error for CredentialError {}

fn hasher() -> Result<Argon2<'static>, CredentialError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(plaintext: &str) -> Result<String, CredentialError> {
    let mut salt_bytes = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?;

    let phc = hasher()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Check a plaintext password against a stored hash.
///
/// A mismatch is `Ok(false)`; only an unparseable hash is an error.
pub fn verify_password(hash: &str, plaintext: &str) -> Result<bool, CredentialError> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| CredentialError::MalformedHash(e.to_string()))?;

    match hasher()?.verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CredentialError::MalformedHash(e.to_string())),
    }
}

/// Hash on the blocking pool so request tasks are not stalled by Argon2.
pub async fn hash_password_blocking(plaintext: String) -> Result<String, CredentialError> {
    tokio::task::spawn_blocking(move || hash_password(&plaintext))
        .await
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?
}

/// Verify on the blocking pool.
pub async fn verify_password_blocking(
    hash: String,
    plaintext: String,
) -> Result<bool, CredentialError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &plaintext))
        .await
        .map_err(|e| CredentialError::HashingFailure(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("correct horse"));

        assert!(verify_password(&hash, "correct horse battery staple").unwrap());
        assert!(!verify_password(&hash, "Tr0ub4dor&3").unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let result = verify_password("not-a-phc-string", "whatever");
        assert!(matches!(result, Err(CredentialError::MalformedHash(_))));
    }

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError::HashingFailure("no entropy".to_string());
        assert_eq!(err.to_string(), "Password hashing failed: no entropy");
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let hash = hash_password_blocking("pw".to_string()).await.unwrap();
        assert!(verify_password_blocking(hash, "pw".to_string()).await.unwrap());
    }
}
