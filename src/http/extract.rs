//! Access-token extraction (C6) for handlers that require an authenticated
//! caller. Scope enforcement itself stays a per-handler call to
//! [`crate::auth::TokenService::ensure_scopes`] — the extractor's only job
//! is turning a bearer header into validated claims.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::AccessClaims;
use crate::error::Error;
use crate::state::AppState;

/// Extracts and validates the `Authorization: Bearer <token>` header,
/// rejecting with `Error::InvalidCredentials` when it's missing or
/// malformed and whatever [`crate::auth::TokenService::decode_access_token`]
/// returns otherwise.
pub struct AuthenticatedUser(pub AccessClaims);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::InvalidCredentials { retry_after_secs: None })?;

        let token = header.strip_prefix("Bearer ").ok_or(Error::InvalidCredentials { retry_after_secs: None })?;
        let claims = state.tokens().decode_access_token(token)?;
        Ok(AuthenticatedUser(claims))
    }
}
