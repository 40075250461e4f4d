//! Request authentication for the web layer.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::role::{Actor, Role};

/// The signed-in caller, resolved from the bearer token on each request
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.uid.clone(), self.role)
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role.can_review_applications() {
            Ok(())
        } else {
            Err(AppError::forbidden("staff role required"))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.can_manage_services() {
            Ok(())
        } else {
            Err(AppError::forbidden("admin role required"))
        }
    }
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = parts
            .extensions
            .get::<Arc<AppState>>()
            .cloned()
            .ok_or_else(|| AppError::internal("application state missing"))?;
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?
            .to_string();

        match state.auth.resolve(&token).await? {
            Some((principal, actor)) => Ok(CurrentUser {
                uid: actor.uid,
                email: principal.email,
                role: actor.role,
                token,
            }),
            None => Err(AppError::unauthorized("invalid or expired session")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
