//! Authentication extractor.
//!
//! Clients present `Authorization: Bearer <token>`. When the server has an
//! `AUTH_SECRET`, the token must equal it; otherwise any well-formed header,
//! or none at all, is accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, `None` for anonymous access
    pub token: Option<String>,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match header {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some("") => return Err((StatusCode::UNAUTHORIZED, "Empty bearer token")),
                Some(token) => Some(token.to_string()),
                None => {
                    return Err((
                        StatusCode::UNAUTHORIZED,
                        "Invalid authorization header format",
                    ))
                }
            },
            None => None,
        };

        match (&state.config.auth_secret, token) {
            (None, token) => Ok(AuthUser { token }),
            (Some(secret), Some(token)) if token == *secret => Ok(AuthUser { token: Some(token) }),
            (Some(_), Some(_)) => {
                tracing::warn!("Rejected request with invalid bearer token");
                Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"))
            }
            (Some(_), None) => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}
