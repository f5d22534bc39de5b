//! Shared-password gate.
//!
//! The configured password and each candidate are both run through
//! HMAC-SHA256 under a per-process random key, and the tags are compared
//! with [`Mac::verify_slice`], which is constant time. Candidate length and
//! content therefore do not leak through timing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct PasswordGate {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
}

impl PasswordGate {
    /// A gate for `password`. With `None` (or an empty password) every
    /// login attempt is refused.
    pub fn new(password: Option<&str>) -> Self {
        let key: Vec<u8> = Uuid::new_v4()
            .as_bytes()
            .iter()
            .chain(Uuid::new_v4().as_bytes())
            .copied()
            .collect();
        let expected = password
            .filter(|p| !p.is_empty())
            .and_then(|p| tag(&key, p));
        Self { key, expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, candidate: &str) -> bool {
        let Some(expected) = &self.expected else {
            tracing::warn!("login refused: no password configured");
            return false;
        };
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mut mac) => {
                mac.update(candidate.as_bytes());
                mac.verify_slice(expected).is_ok()
            }
            Err(_) => false,
        }
    }
}

fn tag(key: &[u8], value: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(value.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}
