//! Auth Engine HTTP surface (§6.1): issuance, rotation, logout, the
//! caller's own profile and sessions, and the audit trail behind them.

use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderValue, SET_COOKIE, USER_AGENT};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::Form;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::auth::AccessClaims;
use crate::auth::{CookieConfig, TokenBundle, TokenService};
use crate::audit::{AuthAuditEvent, EventTag, NewAuthAuditEvent};
use crate::error::Error;
use crate::session::{RefreshSession, User};
use crate::state::AppState;

use super::extract::AuthenticatedUser;

const CSRF_HEADER: &str = "x-refresh-token-csrf";

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub scope: Option<String>,
}

/// `POST /auth/token` — password grant. Rate-limited per `subject:source_ip`
/// (C7); failures are recorded to the audit log (C9) the same as successes.
pub async fn login(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<TokenForm>) -> Result<Response, Error> {
    let ip = client_ip(&headers);
    let user_agent = user_agent_header(&headers);
    let key = crate::auth::RateLimiter::key(&form.username, ip.as_deref().unwrap_or("unknown"));

    if let Some(retry_after_secs) = state.rate_limiter().check(&key) {
        return Err(Error::RateLimited { retry_after_secs });
    }

    let user = state.sessions().get_user_by_email(&form.username).await?;
    let authenticated = match &user {
        Some(u) if state.passwords().verify(&form.password, &u.password_hash) => true,
        _ => false,
    };

    if !authenticated {
        let retry_after_secs = state.rate_limiter().hit(&key);
        state
            .sessions()
            .record_auth_event(
                state.db(),
                NewAuthAuditEvent::new(EventTag::LoginFailed, form.username.clone()).with_source(ip, user_agent),
            )
            .await
            .ok();
        return Err(Error::InvalidCredentials { retry_after_secs });
    }

    let user = user.expect("authenticated implies Some(user)");
    if !user.active {
        return Err(Error::InactiveUser);
    }

    state.rate_limiter().reset(&key);

    let scopes = form
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| user.scopes.clone());

    let bundle = state.tokens().issue(&user, scopes, ip, user_agent).await?;
    Ok(bundle_response(&state, &bundle))
}

/// `POST /auth/refresh` — rotate the session bound to the refresh cookie.
/// Any 401 clears the cookie, so a client that keeps retrying with a reused
/// or expired token doesn't keep resending it forever.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ip = client_ip(&headers);
    let user_agent = user_agent_header(&headers);
    let cookie_name = state.config().auth.cookie.name.clone();
    let csrf_header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    let result = match extract_cookie(&headers, &cookie_name) {
        Some(token) => state.tokens().rotate(token, csrf_header, ip, user_agent).await,
        None => Err(Error::RefreshToken("missing refresh token".to_string())),
    };

    match result {
        Ok(bundle) => bundle_response(&state, &bundle),
        Err(err) => clear_cookie_on_unauthorized(err, &state),
    }
}

/// `POST /auth/logout` — revoke the session named by the refresh cookie, if
/// any, and clear the cookie unconditionally.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookie_name = state.config().auth.cookie.name.clone();
    if let Some(token) = extract_cookie(&headers, &cookie_name) {
        if let Some(session_id) = TokenService::session_id_from_refresh_token(token) {
            if let Ok(session) = state.tokens().revoke(session_id, "logout").await {
                state
                    .sessions()
                    .record_auth_event(
                        state.db(),
                        NewAuthAuditEvent::new(EventTag::Logout, session.user_id.to_string())
                            .with_user(session.user_id)
                            .with_session(session.id),
                    )
                    .await
                    .ok();
            }
        }
    }

    let mut response = Json(serde_json::json!({"status": "logged_out"})).into_response();
    append_set_cookie(&mut response, &clear_cookie_header(&state.config().auth.cookie));
    response
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub active: bool,
    pub superuser: bool,
    pub scopes: Vec<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            active: u.active,
            superuser: u.superuser,
            scopes: u.scopes,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// `GET /auth/me`
pub async fn get_me(AuthenticatedUser(claims): AuthenticatedUser, State(state): State<AppState>) -> Result<Json<UserProfile>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let user = current_user(&state, &claims).await?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub email: String,
}

/// `PUT /auth/me` — the only mutable profile field is email; password
/// changes go through `/auth/me/password`.
pub async fn update_me(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Json(body): Json<UpdateMeRequest>,
) -> Result<Json<UserProfile>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;
    let user_id = subject_id(&claims)?;
    let updated = state.sessions().update_user_email(user_id, &body.email).await?;
    Ok(Json(updated.into()))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub revoked_sessions: usize,
}

/// `POST /auth/me/password` — verifies the current password, hashes and
/// stores the new one, and revokes every other active refresh session for
/// the account (the one presenting this access token is left alone, since
/// it has no refresh session of its own to revoke).
pub async fn change_password(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;
    let user_id = subject_id(&claims)?;
    let user = current_user(&state, &claims).await?;

    if !state.passwords().verify(&body.current_password, &user.password_hash) {
        return Err(Error::InvalidCredentials { retry_after_secs: None });
    }

    let new_hash = state.passwords().hash(&body.new_password)?;
    state.sessions().update_user_password(user_id, &new_hash).await?;

    let sessions = state.sessions().list_active_refresh_sessions(user_id, Utc::now()).await?;
    let mut revoked_sessions = 0usize;
    for session in &sessions {
        if session.id == claims.sid {
            continue;
        }
        state.sessions().revoke_refresh_session_now(session.id, "password_changed").await?;
        revoked_sessions += 1;
    }

    state
        .sessions()
        .record_auth_event(state.db(), NewAuthAuditEvent::new(EventTag::PasswordChanged, user.email.clone()).with_user(user_id))
        .await?;

    Ok(Json(ChangePasswordResponse { revoked_sessions }))
}

/// Session metadata exposed over HTTP — deliberately omits `token_hash` and
/// `anti_csrf`, which are internal secrets, not session attributes a client
/// needs to see.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub last_used_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

impl From<RefreshSession> for SessionSummary {
    fn from(s: RefreshSession) -> Self {
        Self {
            id: s.id,
            ip: s.ip,
            user_agent: s.user_agent,
            created_at: s.created_at,
            last_used_at: s.last_used_at,
            expires_at: s.expires_at,
        }
    }
}

/// `GET /auth/sessions`
pub async fn list_sessions(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let user_id = subject_id(&claims)?;
    let sessions = state.sessions().list_active_refresh_sessions(user_id, Utc::now()).await?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

/// `DELETE /auth/sessions/{id}` — only the owning user may revoke their own
/// session; anyone else's session id resolves as not-found rather than
/// forbidden, so its existence isn't leaked.
pub async fn revoke_session(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;
    let user_id = subject_id(&claims)?;

    let session = state.sessions().get_refresh_session(id).await?.ok_or_else(|| Error::StateNotFound(id.to_string()))?;
    if session.user_id != user_id {
        return Err(Error::StateNotFound(id.to_string()));
    }

    state.tokens().revoke(id, "revoked_by_user").await?;
    state
        .sessions()
        .record_auth_event(
            state.db(),
            NewAuthAuditEvent::new(EventTag::SessionRevoked, user_id.to_string()).with_user(user_id).with_session(id),
        )
        .await?;

    Ok(Json(serde_json::json!({"status": "revoked"})))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: i64,
}

fn default_events_limit() -> i64 {
    50
}

/// `GET /auth/events?limit=1..200`
pub async fn list_events(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<AuthAuditEvent>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let user_id = subject_id(&claims)?;
    let events = state.sessions().list_recent_auth_events(Some(user_id), None, query.limit.clamp(1, 200)).await?;
    Ok(Json(events))
}

async fn current_user(state: &AppState, claims: &AccessClaims) -> Result<User, Error> {
    let user_id = subject_id(claims)?;
    state.sessions().get_user_by_id(user_id).await?.ok_or(Error::InvalidCredentials { retry_after_secs: None })
}

fn subject_id(claims: &AccessClaims) -> Result<Uuid, Error> {
    Uuid::parse_str(&claims.sub).map_err(|_| Error::InvalidCredentials { retry_after_secs: None })
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
}

fn user_agent_header(headers: &HeaderMap) -> Option<String> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn extract_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()).and_then(|raw| {
        raw.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value)
        })
    })
}

fn cookie_header(config: &CookieConfig, value: &str, max_age_secs: i64) -> String {
    let mut parts = vec![
        format!("{}={}", config.name, value),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        format!("Max-Age={}", max_age_secs.max(0)),
        format!("SameSite={}", titlecase_samesite(&config.samesite)),
    ];
    if config.secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &config.domain {
        parts.push(format!("Domain={domain}"));
    }
    parts.join("; ")
}

fn clear_cookie_header(config: &CookieConfig) -> String {
    cookie_header(config, "", 0)
}

fn titlecase_samesite(value: &str) -> String {
    match value.to_ascii_lowercase().as_str() {
        "strict" => "Strict".to_string(),
        "none" => "None".to_string(),
        _ => "Lax".to_string(),
    }
}

fn append_set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

fn bundle_response(state: &AppState, bundle: &TokenBundle) -> Response {
    let mut response = Json(bundle).into_response();
    append_set_cookie(
        &mut response,
        &cookie_header(&state.config().auth.cookie, &bundle.refresh_token, bundle.refresh_expires_in),
    );
    if let Ok(value) = HeaderValue::from_str(&bundle.anti_csrf_token) {
        response.headers_mut().insert("x-refresh-token-csrf", value);
    }
    response
}

fn clear_cookie_on_unauthorized(err: Error, state: &AppState) -> Response {
    let mut response = err.into_response();
    if response.status() == axum::http::StatusCode::UNAUTHORIZED {
        append_set_cookie(&mut response, &clear_cookie_header(&state.config().auth.cookie));
    }
    response
}
