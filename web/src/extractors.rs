//! Request extractors for caller identity.
//!
//! Session issuance is out of scope for this service; an upstream auth layer
//! authenticates users and forwards their id in the `x-user-id` header.
//! Anonymous guests identify themselves by email in request bodies.

use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use guestflow_registration::types::UserId;
use uuid::Uuid;

/// Header the upstream auth layer forwards the authenticated user id in.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user, when the upstream auth layer identified one.
#[derive(Clone, Copy, Debug)]
pub struct MaybeUser(pub Option<UserId>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Self(None));
        };
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value).ok())
            .map(UserId::from_uuid)
            .ok_or_else(|| AppError::bad_request("malformed x-user-id header"))?;
        Ok(Self(Some(user_id)))
    }
}

/// A required authenticated user (host endpoints).
#[derive(Clone, Copy, Debug)]
pub struct RequiredUser(pub UserId);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequiredUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await? {
            MaybeUser(Some(user_id)) => Ok(Self(user_id)),
            MaybeUser(None) => Err(AppError::unauthorized("authentication required")),
        }
    }
}
