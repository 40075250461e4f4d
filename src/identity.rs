//! Identity provider contract and a document-store backed implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document_store::{collections, new_document_id, to_document, DocumentStore, Query};
use crate::errors::{PortalError, PortalResult};
use crate::timefmt::{self, iso_millis};

/// An authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub uid: String,
    pub email: String,
}

/// Bearer session handed out on sign-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub principal: Principal,
    #[serde(with = "iso_millis")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateChange {
    SignedIn(Principal),
    SignedOut(Principal),
}

pub type AuthCallback = Arc<dyn Fn(&AuthStateChange) + Send + Sync>;

type ListenerMap = Mutex<HashMap<u64, AuthCallback>>;

/// Registry of auth-state callbacks
#[derive(Default)]
pub struct AuthListeners {
    next_id: AtomicU64,
    listeners: Arc<ListenerMap>,
}

impl AuthListeners {
    pub fn subscribe(&self, callback: AuthCallback) -> AuthStateSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.listeners.lock() {
            map.insert(id, callback);
        }
        AuthStateSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn notify(&self, change: &AuthStateChange) {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly
        let callbacks: Vec<AuthCallback> = match self.listeners.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(change);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`; `unsubscribe` removes the callback
pub struct AuthStateSubscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl AuthStateSubscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut map) = listeners.lock() {
                map.remove(&self.id);
            }
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> PortalResult<Principal>;

    /// Fails with `InvalidCredentials` on unknown email or wrong password
    async fn authenticate(&self, email: &str, password: &str) -> PortalResult<AuthSession>;

    async fn sign_out(&self, token: &str) -> PortalResult<()>;

    async fn send_password_reset(&self, email: &str) -> PortalResult<()>;

    /// Resolve a bearer token; expired or unknown tokens yield `None`
    async fn principal_for_token(&self, token: &str) -> PortalResult<Option<Principal>>;

    fn subscribe(&self, callback: AuthCallback) -> AuthStateSubscription;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    uid: String,
    email: String,
    /// Argon2 PHC string; carries its own salt and parameters
    password_hash: String,
    disabled: bool,
    #[serde(with = "iso_millis")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    uid: String,
    email: String,
    #[serde(with = "iso_millis")]
    created_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRecord {
    uid: String,
    #[serde(with = "iso_millis")]
    expires_at: DateTime<Utc>,
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

fn hash_password(password: &str) -> PortalResult<String> {
    let salt = SaltString::encode_b64(&random_bytes::<16>())
        .map_err(|e| PortalError::internal(format!("Failed to encode salt: {e}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PortalError::internal(format!("Failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> PortalResult<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| PortalError::internal(format!("Stored password hash is unreadable: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accounts, sessions and reset tokens kept in the portal's own document store
pub struct StoreIdentityProvider {
    store: Arc<dyn DocumentStore>,
    session_ttl: Duration,
    reset_ttl: Duration,
    listeners: AuthListeners,
}

impl StoreIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>, session_ttl_hours: i64) -> Self {
        Self {
            store,
            session_ttl: Duration::hours(session_ttl_hours.max(1)),
            reset_ttl: Duration::hours(1),
            listeners: AuthListeners::default(),
        }
    }

    async fn find_account(&self, email: &str) -> PortalResult<Option<AccountRecord>> {
        let query = Query::new().where_eq("email", normalize_email(email)).limit(1);
        let docs = self.store.query(collections::ACCOUNTS, &query).await?;
        docs.first().map(|d| d.decode()).transpose()
    }

    /// Create a reset token for `email`; `None` when no such account exists
    pub async fn issue_password_reset(&self, email: &str) -> PortalResult<Option<String>> {
        let Some(account) = self.find_account(email).await? else {
            return Ok(None);
        };
        let token = URL_SAFE_NO_PAD.encode(random_bytes::<32>());
        let record = ResetRecord {
            uid: account.uid,
            expires_at: Utc::now() + self.reset_ttl,
        };
        self.store
            .set(collections::PASSWORD_RESETS, &token, to_document(&record)?)
            .await?;
        Ok(Some(token))
    }

    /// Set a new password using a reset token; revokes the user's sessions
    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> PortalResult<()> {
        let doc = self
            .store
            .get(collections::PASSWORD_RESETS, token)
            .await?
            .ok_or_else(|| PortalError::unauthorized("invalid or expired reset token"))?;
        let reset: ResetRecord = doc.decode()?;
        self.store.delete(collections::PASSWORD_RESETS, token).await?;
        if reset.expires_at < Utc::now() {
            return Err(PortalError::unauthorized("invalid or expired reset token"));
        }

        self.store
            .update(
                collections::ACCOUNTS,
                &reset.uid,
                json!({ "passwordHash": hash_password(new_password)? }),
            )
            .await?;

        let sessions = self
            .store
            .query(collections::SESSIONS, &Query::new().where_eq("uid", reset.uid.as_str()))
            .await?;
        for session in sessions {
            self.store.delete(collections::SESSIONS, &session.id).await?;
        }
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl IdentityProvider for StoreIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> PortalResult<Principal> {
        let email = normalize_email(email);
        if self.find_account(&email).await?.is_some() {
            return Err(PortalError::conflict("an account with this email already exists"));
        }

        let uid = new_document_id();
        let record = AccountRecord {
            uid: uid.clone(),
            email: email.clone(),
            password_hash: hash_password(password)?,
            disabled: false,
            created_at: Utc::now(),
        };
        self.store
            .set(collections::ACCOUNTS, &uid, to_document(&record)?)
            .await?;
        Ok(Principal { uid, email })
    }

    async fn authenticate(&self, email: &str, password: &str) -> PortalResult<AuthSession> {
        let account = self
            .find_account(email)
            .await?
            .ok_or(PortalError::InvalidCredentials)?;
        if !verify_password(password, &account.password_hash)? {
            return Err(PortalError::InvalidCredentials);
        }
        if account.disabled {
            return Err(PortalError::forbidden("account disabled"));
        }

        let token = URL_SAFE_NO_PAD.encode(random_bytes::<32>());
        let now = Utc::now();
        let session = SessionRecord {
            uid: account.uid.clone(),
            email: account.email.clone(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        self.store
            .set(collections::SESSIONS, &token, to_document(&session)?)
            .await?;

        let principal = Principal {
            uid: account.uid,
            email: account.email,
        };
        self.listeners
            .notify(&AuthStateChange::SignedIn(principal.clone()));
        Ok(AuthSession {
            token,
            principal,
            expires_at: session.expires_at,
        })
    }

    async fn sign_out(&self, token: &str) -> PortalResult<()> {
        let Some(doc) = self.store.get(collections::SESSIONS, token).await? else {
            return Ok(());
        };
        let session: SessionRecord = doc.decode()?;
        self.store.delete(collections::SESSIONS, token).await?;
        self.listeners.notify(&AuthStateChange::SignedOut(Principal {
            uid: session.uid,
            email: session.email,
        }));
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> PortalResult<()> {
        // Unknown addresses succeed silently so account existence is not revealed
        if self.issue_password_reset(email).await?.is_some() {
            tracing::info!(email = %normalize_email(email), issued_at = %timefmt::now_string(), "Password reset issued");
        }
        Ok(())
    }

    async fn principal_for_token(&self, token: &str) -> PortalResult<Option<Principal>> {
        let Some(doc) = self.store.get(collections::SESSIONS, token).await? else {
            return Ok(None);
        };
        let session: SessionRecord = doc.decode()?;
        if session.expires_at <= Utc::now() {
            self.store.delete(collections::SESSIONS, token).await?;
            return Ok(None);
        }
        Ok(Some(Principal {
            uid: session.uid,
            email: session.email,
        }))
    }

    fn subscribe(&self, callback: AuthCallback) -> AuthStateSubscription {
        self.listeners.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store_memory::MemoryDocumentStore;

    fn provider() -> StoreIdentityProvider {
        StoreIdentityProvider::new(Arc::new(MemoryDocumentStore::new()), 24)
    }

    #[tokio::test]
    async fn create_and_authenticate() {
        let idp = provider();
        let principal = idp.create_account("Meera@Example.com", "secret1").await.unwrap();
        assert_eq!(principal.email, "meera@example.com");

        let session = idp.authenticate("meera@example.com", "secret1").await.unwrap();
        assert_eq!(session.principal, principal);
        assert_eq!(
            idp.principal_for_token(&session.token).await.unwrap(),
            Some(principal)
        );

        assert!(matches!(
            idp.authenticate("meera@example.com", "wrong").await,
            Err(PortalError::InvalidCredentials)
        ));
        assert!(matches!(
            idp.authenticate("nobody@example.com", "secret1").await,
            Err(PortalError::InvalidCredentials)
        ));
    }

    #[test]
    fn stored_hash_is_salted_argon2() {
        let first = hash_password("secret1").unwrap();
        let second = hash_password("secret1").unwrap();
        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(verify_password("secret1", &first).unwrap());
        assert!(!verify_password("secret2", &first).unwrap());
        assert!(verify_password("secret1", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let idp = provider();
        idp.create_account("a@b.co", "secret1").await.unwrap();
        assert!(matches!(
            idp.create_account("A@B.CO", "other12").await,
            Err(PortalError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn sign_out_notifies_and_revokes() {
        let idp = provider();
        idp.create_account("a@b.co", "secret1").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = idp.subscribe(Arc::new(move |change: &AuthStateChange| {
            sink.lock().unwrap().push(change.clone());
        }));

        let session = idp.authenticate("a@b.co", "secret1").await.unwrap();
        idp.sign_out(&session.token).await.unwrap();
        assert_eq!(idp.principal_for_token(&session.token).await.unwrap(), None);
        assert_eq!(seen.lock().unwrap().len(), 2);

        sub.unsubscribe();
        assert_eq!(idp.listener_count(), 0);
        idp.authenticate("a@b.co", "secret1").await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let idp = provider();
        idp.create_account("a@b.co", "secret1").await.unwrap();
        let old = idp.authenticate("a@b.co", "secret1").await.unwrap();

        assert_eq!(idp.issue_password_reset("missing@b.co").await.unwrap(), None);
        let token = idp.issue_password_reset("a@b.co").await.unwrap().unwrap();
        idp.confirm_password_reset(&token, "newpass1").await.unwrap();

        assert!(idp.authenticate("a@b.co", "secret1").await.is_err());
        assert!(idp.authenticate("a@b.co", "newpass1").await.is_ok());
        assert_eq!(idp.principal_for_token(&old.token).await.unwrap(), None);
        // tokens are single use
        assert!(idp.confirm_password_reset(&token, "again12").await.is_err());
    }
}
