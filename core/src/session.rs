use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::onboarding::OnboardingState;

/// Everything kept server-side for one browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionData {
    pub user_id: Option<i64>,
    pub onboarding: OnboardingState,
}

/// Fresh random session token for the client cookie.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Key under which a token's session is stored; raw tokens never hit the database.
pub fn token_digest(token: &str) -> String {
    use std::fmt::Write;

    Sha256::digest(token.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tokens_are_unique() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let digest = token_digest("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(digest, token_digest("abd"));
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_data_defaults() {
        let data: SessionData = serde_json::from_str("{}").unwrap();
        assert!(data.user_id.is_none());
        assert!(data.onboarding.is_pristine());
    }
}
