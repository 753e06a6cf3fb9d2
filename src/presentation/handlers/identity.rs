use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use super::api_error::ApiError;
use crate::domain::{Identity, UserId, UserRole};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller identity as forwarded by the authenticating gateway. A missing
/// role header means an ordinary user.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Identity);

impl AuthenticatedUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.0.role {
            UserRole::Admin => Ok(()),
            UserRole::User => Err(ApiError::forbidden("administrator role required")),
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(UserId::from_uuid)
            .ok_or_else(|| ApiError::unauthorized("missing or invalid caller identity"))?;

        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => UserRole::User,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<UserRole>().ok())
                .ok_or_else(|| ApiError::unauthorized("invalid caller role"))?,
        };

        Ok(AuthenticatedUser(Identity::new(user_id, role)))
    }
}
