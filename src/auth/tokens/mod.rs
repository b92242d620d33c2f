//! Token Service (C6)
//!
//! Issues short-lived signed access tokens and rotating opaque refresh
//! tokens, detects refresh-token reuse, and binds an anti-CSRF token to
//! each refresh session. Rotation and revocation serialize on a single
//! session row via [`SessionRepository::revoke_if_active`]'s conditional
//! update, so a losing concurrent rotation always lands in the reuse
//! branch rather than silently succeeding twice.

use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::config::{RefreshTokenConfig, TokenConfig};
use crate::audit::{EventTag, NewAuthAuditEvent};
use crate::error::Error;
use crate::session::{NewRefreshSession, RefreshSession, SessionRepository, TouchRefreshSession, User};

/// Claims carried by the signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub scopes: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub sid: Uuid,
    pub fam: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// The bundle returned by both issuance and rotation.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_expires_in: i64,
    pub anti_csrf_token: String,
    pub scopes: Vec<String>,
    pub session_id: Uuid,
}

pub struct TokenService {
    tokens: TokenConfig,
    refresh: RefreshTokenConfig,
    repository: SessionRepository,
}

impl TokenService {
    pub fn new(tokens: TokenConfig, refresh: RefreshTokenConfig, repository: SessionRepository) -> Self {
        Self { tokens, refresh, repository }
    }

    /// Issue a fresh refresh session + access token for an already
    /// authenticated user.
    pub async fn issue(
        &self,
        user: &User,
        scopes: Vec<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenBundle, Error> {
        if !user.active {
            return Err(Error::InactiveUser);
        }

        let family_id = Uuid::new_v4();
        let refresh_plaintext_secret = generate_opaque_token();
        let anti_csrf = generate_opaque_token();
        let expires_at = Utc::now() + ChronoDuration::minutes(self.refresh.refresh_token_minutes);

        let mut tx = self.repository.begin().await?;

        // token_hash is computed against the final plaintext, which embeds
        // the session id — but the id is only known once the row exists.
        // Insert first with a placeholder hash, then patch it once the id
        // is known, all inside the same transaction.
        let placeholder_hash = sha256_hex(&refresh_plaintext_secret);
        let row = self
            .repository
            .create_refresh_session(
                &mut *tx,
                NewRefreshSession {
                    user_id: user.id,
                    family_id,
                    token_hash: placeholder_hash,
                    anti_csrf: anti_csrf.clone(),
                    scopes: scopes.clone(),
                    ip: ip.clone(),
                    user_agent: user_agent.clone(),
                    expires_at,
                },
            )
            .await?;

        let refresh_plaintext = format_refresh_token(row.id, &refresh_plaintext_secret);
        let final_hash = sha256_hex(&refresh_plaintext);
        let row = self
            .repository
            .touch_refresh_session(
                &mut *tx,
                row.id,
                TouchRefreshSession { token_hash: Some(final_hash), ..Default::default() },
            )
            .await?;

        self.repository
            .record_auth_event(
                &mut *tx,
                NewAuthAuditEvent::new(EventTag::LoginSuccess, user.email.clone())
                    .with_user(user.id)
                    .with_session(row.id)
                    .with_scopes(scopes.clone())
                    .with_source(ip, user_agent),
            )
            .await?;

        tx.commit().await?;

        let access_token = self.mint_access_token(&user.id.to_string(), &scopes, row.id, family_id)?;

        tracing::info!(session_id = %row.id, user_id = %user.id, "refresh session issued");

        Ok(TokenBundle {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.tokens.access_token_minutes * 60,
            refresh_token: refresh_plaintext,
            refresh_expires_in: self.refresh.refresh_token_minutes * 60,
            anti_csrf_token: anti_csrf,
            scopes,
            session_id: row.id,
        })
    }

    /// Rotate a refresh session, detecting reuse of an already-consumed
    /// plaintext and revoking the whole family when it happens.
    pub async fn rotate(
        &self,
        refresh_plaintext: &str,
        anti_csrf_header: Option<&str>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenBundle, Error> {
        let (sid, _secret) = parse_refresh_token(refresh_plaintext).ok_or_else(|| Error::RefreshToken("malformed refresh token".to_string()))?;

        let session = self
            .repository
            .get_refresh_session(sid)
            .await?
            .ok_or_else(|| Error::RefreshToken("unknown refresh session".to_string()))?;

        let now = Utc::now();
        if now > session.expires_at {
            return Err(Error::RefreshTokenExpired);
        }

        if session.revoked_at.is_some() {
            self.revoke_family_for_reuse(&session, ip, user_agent).await?;
            return Err(Error::RefreshTokenReuse);
        }

        if sha256_hex(refresh_plaintext) != session.token_hash {
            self.revoke_family_for_reuse(&session, ip, user_agent).await?;
            return Err(Error::RefreshTokenReuse);
        }

        if let Some(header) = anti_csrf_header {
            if header != session.anti_csrf {
                return Err(Error::RefreshToken("anti-CSRF token mismatch".to_string()));
            }
        }

        self.mint_next_in_family(&session, ip, user_agent).await
    }

    /// Mark a session revoked; idempotent.
    pub async fn revoke(&self, session_id: Uuid, reason: &str) -> Result<RefreshSession, Error> {
        self.repository.revoke_refresh_session_now(session_id, reason).await
    }

    /// Pull the session id out of a refresh token's plaintext without
    /// consuming it, for callers (e.g. logout) that only need to know
    /// which session a cookie refers to.
    pub fn session_id_from_refresh_token(refresh_plaintext: &str) -> Option<Uuid> {
        parse_refresh_token(refresh_plaintext).map(|(sid, _)| sid)
    }

    /// Decode and validate an access token's signature, type, and expiry
    /// (and issuer/audience when configured).
    pub fn decode_access_token(&self, token: &str) -> Result<AccessClaims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        if let Some(iss) = &self.tokens.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &self.tokens.audience {
            validation.set_audience(&[aud]);
        }

        let key = DecodingKey::from_secret(self.tokens.jwt_secret.as_bytes());
        let data = decode::<AccessClaims>(token, &key, &validation)?;

        if data.claims.token_type != "access" {
            return Err(Error::RefreshToken("not an access token".to_string()));
        }
        Ok(data.claims)
    }

    /// Every scope in `required` must be present in the token's scopes.
    pub fn ensure_scopes(claims: &AccessClaims, required: &[&str]) -> Result<(), Error> {
        let missing: Vec<&str> = required.iter().filter(|r| !claims.scopes.iter().any(|s| s == *r)).copied().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidCredentials { retry_after_secs: None })
        }
    }

    async fn revoke_family_for_reuse(&self, session: &RefreshSession, ip: Option<String>, user_agent: Option<String>) -> Result<(), Error> {
        let mut tx = self.repository.begin().await?;
        let family = self.repository.list_sessions_by_family(session.family_id).await?;
        for member in family.iter().filter(|s| s.revoked_at.is_none()) {
            self.repository.revoke_refresh_session(&mut *tx, member.id, "reuse_detected", None).await?;
        }
        self.repository
            .record_auth_event(
                &mut *tx,
                NewAuthAuditEvent::new(EventTag::RefreshReuse, session.user_id.to_string())
                    .with_user(session.user_id)
                    .with_session(session.id)
                    .with_source(ip, user_agent),
            )
            .await?;
        tx.commit().await?;
        tracing::warn!(family_id = %session.family_id, "refresh token reuse detected, family revoked");
        Ok(())
    }

    async fn mint_next_in_family(&self, old: &RefreshSession, ip: Option<String>, user_agent: Option<String>) -> Result<TokenBundle, Error> {
        let refresh_plaintext_secret = generate_opaque_token();
        let anti_csrf = generate_opaque_token();
        let expires_at = Utc::now() + ChronoDuration::minutes(self.refresh.refresh_token_minutes);

        let mut tx = self.repository.begin().await?;

        let revoked = self
            .repository
            .revoke_if_active(&mut *tx, old.id, "rotated", None)
            .await?
            .ok_or(Error::RefreshTokenReuse)?;
        let _ = revoked;

        let placeholder_hash = sha256_hex(&refresh_plaintext_secret);
        let row = self
            .repository
            .create_refresh_session(
                &mut *tx,
                NewRefreshSession {
                    user_id: old.user_id,
                    family_id: old.family_id,
                    token_hash: placeholder_hash,
                    anti_csrf: anti_csrf.clone(),
                    scopes: old.scopes.clone(),
                    ip: ip.clone(),
                    user_agent: user_agent.clone(),
                    expires_at,
                },
            )
            .await?;

        let refresh_plaintext = format_refresh_token(row.id, &refresh_plaintext_secret);
        let final_hash = sha256_hex(&refresh_plaintext);
        let row = self
            .repository
            .touch_refresh_session(&mut *tx, row.id, TouchRefreshSession { token_hash: Some(final_hash), ..Default::default() })
            .await?;

        self.repository.revoke_refresh_session(&mut *tx, old.id, "rotated", Some(row.id)).await?;

        self.repository
            .record_auth_event(
                &mut *tx,
                NewAuthAuditEvent::new(EventTag::RefreshRotated, old.user_id.to_string())
                    .with_user(old.user_id)
                    .with_session(row.id)
                    .with_scopes(old.scopes.clone())
                    .with_source(ip, user_agent),
            )
            .await?;

        tx.commit().await?;

        let access_token = self.mint_access_token(&old.user_id.to_string(), &old.scopes, row.id, old.family_id)?;

        Ok(TokenBundle {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.tokens.access_token_minutes * 60,
            refresh_token: refresh_plaintext,
            refresh_expires_in: self.refresh.refresh_token_minutes * 60,
            anti_csrf_token: anti_csrf,
            scopes: row.scopes.clone(),
            session_id: row.id,
        })
    }

    fn mint_access_token(&self, sub: &str, scopes: &[String], sid: Uuid, fam: Uuid) -> Result<String, Error> {
        let now = Utc::now();
        let exp = now + ChronoDuration::minutes(self.tokens.access_token_minutes);
        let claims = AccessClaims {
            sub: sub.to_string(),
            scopes: scopes.to_vec(),
            token_type: "access".to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            sid,
            fam,
            iss: self.tokens.issuer.clone(),
            aud: self.tokens.audience.clone(),
        };
        let key = EncodingKey::from_secret(self.tokens.jwt_secret.as_bytes());
        let token = encode(&Header::new(Algorithm::HS256), &claims, &key)?;
        Ok(token)
    }
}

fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_refresh_token(sid: Uuid, secret: &str) -> String {
    format!("{sid}.{secret}")
}

fn parse_refresh_token(plaintext: &str) -> Option<(Uuid, &str)> {
    let (sid_str, secret) = plaintext.split_once('.')?;
    let sid = Uuid::parse_str(sid_str).ok()?;
    Some((sid, secret))
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        write!(out, "{b:02x}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_round_trips_session_id() {
        let sid = Uuid::new_v4();
        let token = format_refresh_token(sid, "secret-part");
        let (parsed_sid, secret) = parse_refresh_token(&token).unwrap();
        assert_eq!(parsed_sid, sid);
        assert_eq!(secret, "secret-part");
    }

    #[test]
    fn malformed_refresh_token_fails_to_parse() {
        assert!(parse_refresh_token("not-a-valid-token").is_none());
        assert!(parse_refresh_token("not-a-uuid.secret").is_none());
    }

    #[test]
    fn ensure_scopes_rejects_missing_scope() {
        let claims = AccessClaims {
            sub: "u1".to_string(),
            scopes: vec!["console:read".to_string()],
            token_type: "access".to_string(),
            jti: "j".to_string(),
            iat: 0,
            exp: 0,
            sid: Uuid::new_v4(),
            fam: Uuid::new_v4(),
            iss: None,
            aud: None,
        };
        assert!(TokenService::ensure_scopes(&claims, &["console:read"]).is_ok());
        assert!(TokenService::ensure_scopes(&claims, &["console:write"]).is_err());
    }

    #[test]
    fn opaque_tokens_are_url_safe_and_high_entropy() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a, b);
        assert!(a.len() >= 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
