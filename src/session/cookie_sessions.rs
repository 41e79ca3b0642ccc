use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use http::header::{HeaderMap, HeaderValue, COOKIE};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::resolver::{IdentityResolver, ResolveError};
use crate::store::{SessionRecord, Store, StoreError};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "atgate_sid";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to sign session cookie: {0}")]
    Signing(String),
}

/// Signed-cookie sessions backed by the store.
#[derive(Clone)]
pub struct CookieSessions {
    store: Arc<dyn Store>,
    secret: Arc<str>,
    secure: bool,
}

/// A loaded or freshly created session.
pub struct Session {
    id: String,
    record: SessionRecord,
    is_new: bool,
    sessions: CookieSessions,
}

/// The logged-in user, as reported by `/userinfo`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub did: String,
    pub handle: Option<String>,
}

impl CookieSessions {
    /// `secure` adds the `Secure` attribute; set it when the public URL is https.
    pub fn new(store: Arc<dyn Store>, secret: &str, secure: bool) -> Self {
        Self {
            store,
            secret: Arc::from(secret),
            secure,
        }
    }

    fn sign(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| SessionError::Signing(e.to_string()))?;
        mac.update(id.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Returns the session id if `value` carries a valid signature.
    fn verify(&self, value: &str) -> Option<String> {
        let (id, signature) = value.split_once('.')?;
        let provided = hex::decode(signature).ok()?;
        let expected = self.sign(id).ok()?;
        if bool::from(expected.ct_eq(&provided)) {
            Some(id.to_string())
        } else {
            debug!("Ignoring session cookie with a bad signature");
            None
        }
    }

    /// The session id carried by a validly signed cookie, if any.
    fn cookie_session_id(&self, headers: &HeaderMap) -> Option<String> {
        cookie_value(headers, SESSION_COOKIE).and_then(|v| self.verify(&v))
    }

    /// Opens the caller's session, or starts a new one when the request has
    /// no valid session cookie.
    pub async fn get_session(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let Some(id) = self.cookie_session_id(headers) else {
            return Ok(self.new_session());
        };
        Ok(match self.store.load_session(&id).await? {
            Some(record) => Session {
                id,
                record,
                is_new: false,
                sessions: self.clone(),
            },
            None => self.new_session(),
        })
    }

    /// A session with a fresh random id. Nothing is stored until it is saved.
    pub fn new_session(&self) -> Session {
        Session {
            id: Uuid::new_v4().to_string(),
            record: SessionRecord {
                did: None,
                created_at: Utc::now().timestamp(),
            },
            is_new: true,
            sessions: self.clone(),
        }
    }

    /// Drops whatever session the request carried and starts a fresh one.
    /// Call this whenever the session is about to gain an identity.
    pub async fn rotate_session(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        if let Some(previous) = self.cookie_session_id(headers) {
            self.store.delete_session(&previous).await?;
            debug!("Discarded session {} before login", previous);
        }
        Ok(self.new_session())
    }

    /// Looks up who is logged in. `Ok(None)` means nobody.
    pub async fn get_session_user(
        &self,
        session: &Session,
        resolver: &dyn IdentityResolver,
    ) -> Result<Option<SessionUser>, SessionError> {
        let did = match session.did() {
            Some(did) => did,
            None => return Ok(None),
        };
        let identity = resolver.resolve_did(did).await?;
        Ok(Some(SessionUser {
            did: identity.did,
            handle: identity.handle,
        }))
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn did(&self) -> Option<&str> {
        self.record.did.as_deref()
    }

    pub fn set_did(&mut self, did: impl Into<String>) {
        self.record.did = Some(did.into());
    }

    /// Persists the session and returns the `Set-Cookie` value for it.
    pub async fn save(&self) -> Result<HeaderValue, SessionError> {
        self.sessions
            .store
            .save_session(&self.id, &self.record)
            .await?;

        let signature = hex::encode(self.sessions.sign(&self.id)?);
        let mut cookie = format!(
            "{}={}.{}; HttpOnly; SameSite=Lax; Path=/",
            SESSION_COOKIE, self.id, signature
        );
        if self.sessions.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::Signing(e.to_string()))
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
