//! Account workflows on top of the identity provider: registration, sign-in,
//! sign-out, password reset and the stored user profile.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config_loader::AuthSettings;
use crate::document_store::{collections, to_document, DocumentStore};
use crate::errors::{PortalError, PortalResult, ValidationError};
use crate::event_logger::{user_context, EventLogger};
use crate::identity::{AuthSession, IdentityProvider, Principal};
use crate::input_validator::{is_valid_phone, validate_registration};
use crate::models::UserProfile;
use crate::role::{Actor, Role};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

/// Session plus the profile it belongs to
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIn {
    pub session: AuthSession,
    pub profile: UserProfile,
}

fn check_phone(phone: &Option<String>) -> Result<(), ValidationError> {
    match phone.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() && !is_valid_phone(p) => {
            Err(ValidationError::InvalidPhone(p.to_string()))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    logger: EventLogger,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        logger: EventLogger,
        settings: AuthSettings,
    ) -> Self {
        Self {
            identity,
            store,
            logger,
            settings,
        }
    }

    async fn create_user(&self, request: &RegisterRequest, role: Role) -> PortalResult<UserProfile> {
        validate_registration(
            &request.email,
            &request.password,
            &request.display_name,
            self.settings.min_password_length,
        )?;
        check_phone(&request.phone)?;

        let principal = self
            .identity
            .create_account(
                request.email.as_deref().unwrap_or_default(),
                request.password.as_deref().unwrap_or_default(),
            )
            .await?;

        let profile = UserProfile {
            uid: principal.uid.clone(),
            email: principal.email.clone(),
            display_name: request.display_name.as_deref().unwrap_or_default().trim().to_string(),
            phone: request
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            role,
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        };
        if let Err(e) = self
            .store
            .set(collections::USERS, &profile.uid, to_document(&profile)?)
            .await
        {
            self.logger
                .error_with("Failed to store user profile", &e, Some(user_context(&profile.uid)));
            return Err(e);
        }

        self.logger.user_action(
            "User registered",
            Some(json!({ "email": profile.email, "role": profile.role.as_str() })),
            Some(user_context(&profile.uid)),
        );
        Ok(profile)
    }

    /// Create a citizen account and sign it in
    pub async fn register(&self, request: &RegisterRequest) -> PortalResult<SignedIn> {
        let profile = self.create_user(request, Role::Citizen).await?;
        self.login(&profile.email, request.password.as_deref().unwrap_or_default())
            .await
    }

    pub async fn create_admin(&self, email: &str, password: &str, display_name: &str) -> PortalResult<UserProfile> {
        let request = RegisterRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            display_name: Some(display_name.to_string()),
            phone: None,
        };
        self.create_user(&request, Role::Admin).await
    }

    pub async fn login(&self, email: &str, password: &str) -> PortalResult<SignedIn> {
        let session = match self.identity.authenticate(email, password).await {
            Ok(session) => session,
            Err(e) => {
                self.logger.security(
                    "Failed login attempt",
                    Some(json!({ "email": email, "reason": e.to_string() })),
                    None,
                );
                return Err(e);
            }
        };

        let uid = session.principal.uid.clone();
        let mut profile = self.profile(&uid).await?;
        if !profile.is_active {
            self.identity.sign_out(&session.token).await?;
            self.logger.security(
                "Login blocked for inactive account",
                None,
                Some(user_context(&uid)),
            );
            return Err(PortalError::forbidden("account is deactivated"));
        }

        let now = Utc::now();
        self.store
            .update(
                collections::USERS,
                &uid,
                json!({ "lastLoginAt": crate::timefmt::format(&now) }),
            )
            .await?;
        profile.last_login_at = Some(now);

        self.logger.security(
            "User logged in",
            Some(json!({ "email": profile.email })),
            Some(user_context(&uid)),
        );
        Ok(SignedIn { session, profile })
    }

    pub async fn logout(&self, token: &str, uid: &str) -> PortalResult<()> {
        self.identity.sign_out(token).await?;
        self.logger
            .security("User logged out", None, Some(user_context(uid)));
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str) -> PortalResult<()> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingFields(vec!["email".into()]).into());
        }
        self.identity.send_password_reset(email).await?;
        self.logger.security(
            "Password reset requested",
            Some(json!({ "email": email })),
            None,
        );
        Ok(())
    }

    pub async fn profile(&self, uid: &str) -> PortalResult<UserProfile> {
        self.store
            .get(collections::USERS, uid)
            .await?
            .ok_or_else(|| PortalError::not_found("user", uid))?
            .decode()
    }

    pub async fn update_profile(&self, uid: &str, update: &ProfileUpdate) -> PortalResult<UserProfile> {
        check_phone(&update.phone)?;
        let mut profile = self.profile(uid).await?;
        if let Some(name) = update.display_name.as_deref().map(str::trim) {
            if name.is_empty() {
                return Err(ValidationError::MissingFields(vec!["displayName".into()]).into());
            }
            profile.display_name = name.to_string();
        }
        if let Some(phone) = update.phone.as_deref().map(str::trim) {
            profile.phone = (!phone.is_empty()).then(|| phone.to_string());
        }
        self.store
            .set(collections::USERS, uid, to_document(&profile)?)
            .await?;
        self.logger
            .user_action("Profile updated", None, Some(user_context(uid)));
        Ok(profile)
    }

    /// Resolve a bearer token to the acting principal and role
    pub async fn resolve(&self, token: &str) -> PortalResult<Option<(Principal, Actor)>> {
        let Some(principal) = self.identity.principal_for_token(token).await? else {
            return Ok(None);
        };
        let profile = match self.profile(&principal.uid).await {
            Ok(profile) => profile,
            Err(PortalError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !profile.is_active {
            return Ok(None);
        }
        let actor = Actor::new(profile.uid, profile.role);
        Ok(Some((principal, actor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::LoggerSettings;
    use crate::document_store_memory::MemoryDocumentStore;
    use crate::identity::StoreIdentityProvider;
    use crate::log_sink::NullSink;

    fn service() -> AuthService {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let identity = Arc::new(StoreIdentityProvider::new(store.clone(), 24));
        let logger = EventLogger::new(LoggerSettings::default(), None, Arc::new(NullSink));
        AuthService::new(identity, store, logger, AuthSettings::default())
    }

    fn request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: Some(email.into()),
            password: Some(password.into()),
            display_name: Some("Ravi".into()),
            phone: None,
        }
    }

    #[tokio::test]
    async fn register_signs_in_as_citizen() {
        let auth = service();
        let signed_in = auth.register(&request("ravi@example.in", "secret1")).await.unwrap();
        assert_eq!(signed_in.profile.role, Role::Citizen);
        assert!(signed_in.profile.last_login_at.is_some());

        let (principal, actor) = auth.resolve(&signed_in.session.token).await.unwrap().unwrap();
        assert_eq!(principal.email, "ravi@example.in");
        assert_eq!(actor.role, Role::Citizen);

        auth.logout(&signed_in.session.token, &actor.uid).await.unwrap();
        assert!(auth.resolve(&signed_in.session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_password_rejected_before_account_creation() {
        let auth = service();
        let err = auth.register(&request("ravi@example.in", "123")).await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
        assert!(auth.register(&request("ravi@example.in", "secret1")).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let auth = service();
        auth.create_admin("root@example.in", "secret1", "Root").await.unwrap();
        assert!(matches!(
            auth.login("root@example.in", "nope").await,
            Err(PortalError::InvalidCredentials)
        ));
        let ok = auth.login("root@example.in", "secret1").await.unwrap();
        assert_eq!(ok.profile.role, Role::Admin);
    }

    #[tokio::test]
    async fn profile_update_validates_phone() {
        let auth = service();
        let signed_in = auth.register(&request("a@b.co", "secret1")).await.unwrap();
        let uid = signed_in.profile.uid;
        let bad = ProfileUpdate {
            phone: Some("12".into()),
            ..Default::default()
        };
        assert!(auth.update_profile(&uid, &bad).await.is_err());
        let good = ProfileUpdate {
            display_name: Some("Ravi K".into()),
            phone: Some("98765 43210".into()),
        };
        let updated = auth.update_profile(&uid, &good).await.unwrap();
        assert_eq!(updated.display_name, "Ravi K");
        assert_eq!(updated.phone.as_deref(), Some("98765 43210"));
    }
}
