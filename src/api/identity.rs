//! Request identity.
//!
//! Authentication happens upstream; it forwards the user id in `x-user-id`.
//! Anonymous shoppers are keyed by the session id in `x-session-id`.
//! Operator calls to `/internal` carry the shared secret in `x-internal-token`.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap};
use uuid::Uuid;

use super::AppState;
use crate::domain::value_objects::CartOwner;
use crate::StoreError;

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-id";
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim).filter(|v| !v.is_empty())
}

pub fn user_from_headers(headers: &HeaderMap) -> Result<Option<Uuid>, StoreError> {
    match header(headers, USER_HEADER) {
        Some(raw) => Uuid::parse_str(raw).map(Some).map_err(|_| StoreError::MissingIdentity),
        None => Ok(None),
    }
}

pub fn owner_from_headers(headers: &HeaderMap) -> Result<CartOwner, StoreError> {
    if let Some(user_id) = user_from_headers(headers)? {
        return Ok(CartOwner::User(user_id));
    }
    header(headers, SESSION_HEADER)
        .map(|key| CartOwner::Session(key.to_string()))
        .ok_or(StoreError::MissingIdentity)
}

/// Whoever owns the cart: the signed-in user, else the session.
pub struct Owner(pub CartOwner);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        owner_from_headers(&parts.headers).map(Owner)
    }
}

/// A signed-in user; anonymous requests are rejected.
pub struct CurrentUser(pub Uuid);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)?.map(CurrentUser).ok_or(StoreError::MissingIdentity)
    }
}

pub fn check_internal_token(headers: &HeaderMap, expected: Option<&str>) -> Result<(), StoreError> {
    match (expected, header(headers, INTERNAL_TOKEN_HEADER)) {
        (Some(expected), Some(given)) if given == expected => Ok(()),
        _ => Err(StoreError::Forbidden),
    }
}

/// An operator or scheduler holding the internal token.
pub struct InternalCaller;

#[axum::async_trait]
impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        check_internal_token(&parts.headers, state.internal_token.as_deref()).map(|()| InternalCaller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_header_wins_over_session() {
        let user = Uuid::now_v7();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("guest-1"));
        assert_eq!(owner_from_headers(&headers).unwrap(), CartOwner::Session("guest-1".into()));

        headers.insert(USER_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(owner_from_headers(&headers).unwrap(), CartOwner::User(user));
    }

    #[test]
    fn test_missing_or_bad_identity() {
        let mut headers = HeaderMap::new();
        assert!(matches!(owner_from_headers(&headers), Err(StoreError::MissingIdentity)));
        headers.insert(USER_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(user_from_headers(&headers), Err(StoreError::MissingIdentity)));
        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(user_from_headers(&headers).unwrap(), None);
    }

    #[test]
    fn test_internal_token() {
        let mut headers = HeaderMap::new();
        assert!(matches!(check_internal_token(&headers, Some("s3cret")), Err(StoreError::Forbidden)));
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_static("guess"));
        assert!(matches!(check_internal_token(&headers, Some("s3cret")), Err(StoreError::Forbidden)));
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(check_internal_token(&headers, Some("s3cret")).is_ok());
        assert!(matches!(check_internal_token(&headers, None), Err(StoreError::Forbidden)));
    }
}
