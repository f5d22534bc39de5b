//! Request-scoped session state and its sealed token form.
//!
//! A [`Session`] is passed into every command and a new one is returned with
//! the resulting view. Over HTTP it travels as an opaque token:
//! `base64url(json) "." hex(hmac_sha256(json))`. The payload carries the
//! time it was sealed; a token whose signature does not verify is rejected,
//! and one older than the configured lifetime has expired.
//!
//! Each sign-in gets its own login id. Signing out records that id in
//! [`RevokedLogins`], so earlier tokens from the same sign-in stop working
//! even though their signatures still verify.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime: eight hours since the last response.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

/// Menu entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    #[default]
    Home,
    RepositorySetup,
    RepositoryManage,
    Analyse,
    AboutUs,
    Methodology,
    Disclaimer,
}

impl Page {
    pub fn title(self) -> &'static str {
        match self {
            Page::Home => "Home",
            Page::RepositorySetup => "Repository Setup",
            Page::RepositoryManage => "Manage Repositories",
            Page::Analyse => "Analyse",
            Page::AboutUs => "About Us",
            Page::Methodology => "Methodology",
            Page::Disclaimer => "Disclaimer",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub disclaimer_acknowledged: bool,
    pub authenticated: bool,
    /// Identifies the sign-in this session belongs to.
    #[serde(default)]
    pub login_id: Option<String>,
    pub page: Page,
    /// Repository chosen in step 1 of the analyse page.
    pub repository_id: Option<String>,
    /// Files chosen in step 2, in selection order.
    pub file_ids: Vec<i64>,
}

impl Session {
    /// Mark the session as signed in under a fresh login id.
    pub fn sign_in(&mut self) {
        self.authenticated = true;
        self.login_id = Some(Uuid::new_v4().to_string());
    }

    pub fn clear_selection(&mut self) {
        self.repository_id = None;
        self.file_ids.clear();
    }
}

/// Login ids that have signed out, with the time they did.
///
/// Entries are dropped once every token that could carry them has expired.
pub struct RevokedLogins {
    ttl_secs: u64,
    revoked: RwLock<HashMap<String, i64>>,
}

impl RevokedLogins {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    pub fn revoke(&self, login_id: &str) {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - self.ttl_secs as i64;
        let mut revoked = self.revoked.write().unwrap();
        revoked.retain(|_, at| *at >= cutoff);
        revoked.insert(login_id.to_string(), now);
    }

    pub fn is_revoked(&self, login_id: &str) -> bool {
        self.revoked.read().unwrap().contains_key(login_id)
    }
}

#[derive(Serialize, Deserialize)]
struct SealedPayload {
    issued_at: i64,
    #[serde(flatten)]
    session: Session,
}

pub struct SessionSealer {
    key: Vec<u8>,
    ttl_secs: u64,
}

impl SessionSealer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// A sealer with a random key; tokens do not survive a restart.
    pub fn random() -> Self {
        let key: Vec<u8> = Uuid::new_v4()
            .as_bytes()
            .iter()
            .chain(Uuid::new_v4().as_bytes())
            .copied()
            .collect();
        Self {
            key,
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }

    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(s) => Self::new(s.as_bytes()),
            None => Self::random(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| anyhow!("invalid session key: {e}"))
    }

    pub fn seal(&self, session: &Session) -> Result<String> {
        self.seal_at(session, chrono::Utc::now().timestamp())
    }

    fn seal_at(&self, session: &Session, issued_at: i64) -> Result<String> {
        let json = serde_json::to_vec(&SealedPayload {
            issued_at,
            session: session.clone(),
        })?;
        let mut mac = self.mac()?;
        mac.update(&json);
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&json), signature))
    }

    /// Verify and decode a token. Errors are [`SessionError`]s.
    pub fn open(&self, token: &str) -> Result<Session> {
        let (payload, signature) = token.split_once('.').ok_or(SessionError::Malformed)?;
        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| SessionError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(&json);
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let sealed: SealedPayload =
            serde_json::from_slice(&json).map_err(|_| SessionError::Malformed)?;
        let age = chrono::Utc::now().timestamp() - sealed.issued_at;
        if age > self.ttl_secs as i64 {
            return Err(SessionError::Expired.into());
        }
        Ok(sealed.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            disclaimer_acknowledged: true,
            authenticated: true,
            login_id: Some("login-1".into()),
            page: Page::Analyse,
            repository_id: Some("repo-1".into()),
            file_ids: vec![3, 1],
        }
    }

    #[test]
    fn seal_then_open() {
        let sealer = SessionSealer::new(b"k");
        let token = sealer.seal(&sample()).unwrap();
        assert_eq!(sealer.open(&token).unwrap(), sample());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let sealer = SessionSealer::new(b"k");
        let token = sealer.seal(&Session::default()).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&sample()).unwrap());
        assert!(sealer.open(&format!("{forged}.{sig}")).is_err());
    }

    #[test]
    fn other_key_is_rejected() {
        let token = SessionSealer::new(b"a").seal(&sample()).unwrap();
        assert!(SessionSealer::new(b"b").open(&token).is_err());
        assert!(SessionSealer::random().open("garbage").is_err());
    }

    fn kind(err: anyhow::Error) -> SessionError {
        err.downcast::<SessionError>().unwrap()
    }

    #[test]
    fn old_token_expires() {
        let sealer = SessionSealer::new(b"k").with_ttl(60);
        let now = chrono::Utc::now().timestamp();
        let fresh = sealer.seal_at(&sample(), now - 30).unwrap();
        assert_eq!(sealer.open(&fresh).unwrap(), sample());

        let stale = sealer.seal_at(&sample(), now - 120).unwrap();
        assert_eq!(kind(sealer.open(&stale).unwrap_err()), SessionError::Expired);
        assert_eq!(kind(sealer.open("garbage").unwrap_err()), SessionError::Malformed);
    }

    #[test]
    fn sign_in_gets_a_new_login_id() {
        let mut a = Session::default();
        let mut b = Session::default();
        a.sign_in();
        b.sign_in();
        assert!(a.authenticated);
        assert!(a.login_id.is_some());
        assert_ne!(a.login_id, b.login_id);
    }

    #[test]
    fn revoked_logins_are_remembered() {
        let revoked = RevokedLogins::new(60);
        assert!(!revoked.is_revoked("a"));
        revoked.revoke("a");
        revoked.revoke("b");
        assert!(revoked.is_revoked("a"));
        assert!(revoked.is_revoked("b"));
    }
}
