use anyhow::{Result, anyhow};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::Rng;
use serde::Deserialize;

pub const USERNAME_MAX_LEN: usize = 150;
pub const PASSWORD_MIN_LEN: usize = 8;

/// Account-creation fields: a username and the password entered twice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password1: String,
    pub password2: String,
}

/// Check new-account credentials, returning every problem found.
///
/// An empty list means the credentials are acceptable. Uniqueness of the
/// username is checked by the store, not here.
pub fn validate_new_account(credentials: &Credentials) -> Vec<String> {
    let mut errors = Vec::new();
    let username = credentials.username.trim();

    if username.is_empty() {
        errors.push("Username is required.".to_string());
    } else if username.chars().count() > USERNAME_MAX_LEN {
        errors.push(format!(
            "Username must be {USERNAME_MAX_LEN} characters or fewer."
        ));
    } else if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        errors.push(
            "Username may contain only letters, numbers, and @/./+/-/_ characters.".to_string(),
        );
    }

    let password = &credentials.password1;
    if password != &credentials.password2 {
        errors.push("The two password fields didn't match.".to_string());
    }
    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(format!(
            "Password must contain at least {PASSWORD_MIN_LEN} characters."
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.push("Password can't be entirely numeric.".to_string());
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        errors.push("Password is too similar to the username.".to_string());
    }

    errors
}

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!("invalid salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(username: &str, password1: &str, password2: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password1: password1.to_string(),
            password2: password2.to_string(),
        }
    }

    #[test]
    fn test_valid_credentials() {
        assert!(validate_new_account(&creds("alice", "s3cret-pass", "s3cret-pass")).is_empty());
        assert!(validate_new_account(&creds("a.b+c@d-e_f", "longenough", "longenough")).is_empty());
    }

    #[test]
    fn test_username_rules() {
        assert!(!validate_new_account(&creds("", "longenough", "longenough")).is_empty());
        assert!(!validate_new_account(&creds("bad name", "longenough", "longenough")).is_empty());
        let long = "a".repeat(USERNAME_MAX_LEN + 1);
        assert!(!validate_new_account(&creds(&long, "longenough", "longenough")).is_empty());
    }

    #[test]
    fn test_password_rules() {
        let mismatch = validate_new_account(&creds("alice", "longenough", "different1"));
        assert_eq!(mismatch, vec!["The two password fields didn't match."]);

        assert!(!validate_new_account(&creds("alice", "short", "short")).is_empty());
        assert!(!validate_new_account(&creds("alice", "12345678", "12345678")).is_empty());
        assert!(!validate_new_account(&creds("alicealice", "AliceAlice", "AliceAlice")).is_empty());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
