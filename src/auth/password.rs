//! Argon2 password hashing.

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::OnceLock;

use crate::error::AuthError;

/// Hash a password into a PHC string with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string. A malformed hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash checked when the account does not exist, so that lookup misses cost
/// one argon2 verification like hits do.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("no such user").unwrap_or_default())
}

/// `verify_password` on the blocking pool. Without a stored hash the dummy hash
/// is verified instead and the result is always false.
pub async fn check_password(password: &str, hash: Option<&str>) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.map(str::to_string);
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            verify_password(&password, dummy_hash());
            false
        }
    })
    .await
    .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

/// `hash_password` on the blocking pool.
pub async fn hash_password_blocking(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_salted() {
        assert_ne!(hash_password("pw").unwrap(), hash_password("pw").unwrap());
    }

    #[test]
    fn test_malformed_hash_does_not_match() {
        assert!(!verify_password("pw", "not-a-hash"));
        assert!(!verify_password("pw", ""));
    }

    #[test]
    fn test_dummy_hash_is_a_real_hash() {
        assert!(dummy_hash().starts_with("$argon2"));
        assert!(PasswordHash::new(dummy_hash()).is_ok());
    }

    #[tokio::test]
    async fn test_check_password_without_account() {
        assert!(!check_password("no such user", None).await.unwrap());
        assert!(!check_password("anything", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_password_off_thread() {
        let hash = hash_password_blocking("correct horse").await.unwrap();
        assert!(check_password("correct horse", Some(&hash)).await.unwrap());
        assert!(!check_password("wrong horse", Some(&hash)).await.unwrap());
    }
}
