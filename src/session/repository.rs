//! Session Repository (C8)
//!
//! Typed access over `users` and `auth_refresh_sessions`, plus the audit
//! log, delegated to [`crate::audit::AuditRecorder`]. Methods that must
//! compose atomically with a sibling write (e.g. revoking a session and
//! recording the audit row for it) accept a generic `sqlx` executor so
//! the caller controls the transaction boundary.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditRecorder, AuthAuditEvent, NewAuthAuditEvent};
use crate::error::Error;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub superuser: bool,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub token_hash: String,
    pub anti_csrf: String,
    pub scopes: Vec<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
}

impl RefreshSession {
    /// Active iff not revoked and not yet expired relative to `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Fields required to open a new refresh session.
#[derive(Debug, Clone)]
pub struct NewRefreshSession {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub token_hash: String,
    pub anti_csrf: String,
    pub scopes: Vec<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Partial update applied to an existing refresh session row.
#[derive(Debug, Clone, Default)]
pub struct TouchRefreshSession {
    pub token_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub anti_csrf: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
    audit: AuditRecorder,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        let audit = AuditRecorder::new(pool.clone());
        Self { pool, audit }
    }

    /// Open a transaction for callers that need several writes (e.g.
    /// rotate a refresh session, revoke its predecessor, record the
    /// audit event) to commit or fail together.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, Error> {
        Ok(self.pool.begin().await?)
    }

    pub async fn create_user<'e, E>(
        &self,
        executor: E,
        email: &str,
        password_hash: &str,
        scopes: &[String],
        active: bool,
        superuser: bool,
    ) -> Result<User, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let normalized_email = email.trim().to_lowercase();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, active, superuser, scopes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING id, email, password_hash, active, superuser, scopes, created_at, updated_at
            "#,
        )
        .bind(&normalized_email)
        .bind(password_hash)
        .bind(active)
        .bind(superuser)
        .bind(scopes)
        .fetch_one(executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("a user with email {normalized_email} already exists"))
            }
            _ => Error::from(e),
        })
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let normalized_email = email.trim().to_lowercase();
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, active, superuser, scopes, created_at, updated_at
            FROM users WHERE email = $1
            "#,
        )
        .bind(&normalized_email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, active, superuser, scopes, created_at, updated_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Update a user's email (the only mutable field `PUT /auth/me`
    /// exposes; password changes go through their own endpoint).
    pub async fn update_user_email(&self, id: Uuid, email: &str) -> Result<User, Error> {
        let normalized_email = email.trim().to_lowercase();
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET email = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, email, password_hash, active, superuser, scopes, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&normalized_email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("a user with email {normalized_email} already exists"))
            }
            _ => Error::from(e),
        })?
        .ok_or_else(|| Error::Internal(format!("user {id} vanished mid-update")))
    }

    pub async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, email, password_hash, active, superuser, scopes, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::Internal(format!("user {id} vanished mid-update")))
    }

    pub async fn create_refresh_session<'e, E>(&self, executor: E, new: NewRefreshSession) -> Result<RefreshSession, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            INSERT INTO auth_refresh_sessions
                (user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                 created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now(), $8, NULL, NULL, NULL)
            RETURNING id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                      created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            "#,
        )
        .bind(new.user_id)
        .bind(new.family_id)
        .bind(&new.token_hash)
        .bind(&new.anti_csrf)
        .bind(&new.scopes)
        .bind(&new.ip)
        .bind(&new.user_agent)
        .bind(new.expires_at)
        .fetch_one(executor)
        .await
        .map_err(Error::from)
    }

    pub async fn get_refresh_session(&self, id: Uuid) -> Result<Option<RefreshSession>, Error> {
        let row = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                   created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            FROM auth_refresh_sessions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Active = not revoked and not expired, evaluated at `now`.
    pub async fn list_active_refresh_sessions(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<RefreshSession>, Error> {
        let rows = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                   created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            FROM auth_refresh_sessions
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_sessions_by_family(&self, family_id: Uuid) -> Result<Vec<RefreshSession>, Error> {
        let rows = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                   created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            FROM auth_refresh_sessions WHERE family_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Idempotent: re-revoking an already-revoked session is a no-op that
    /// returns the row as it stands.
    pub async fn revoke_refresh_session<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        reason: &str,
        replaced_by: Option<Uuid>,
    ) -> Result<RefreshSession, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE auth_refresh_sessions
            SET revoked_at = COALESCE(revoked_at, now()),
                revoked_reason = COALESCE(revoked_reason, $2),
                replaced_by = COALESCE(replaced_by, $3)
            WHERE id = $1
            RETURNING id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                      created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(replaced_by)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::Internal(format!("refresh session {id} vanished mid-revoke")))
    }

    /// Conditional revoke used by rotation: only succeeds if the session
    /// was still active, so a losing concurrent rotation observes `None`
    /// and can route into reuse handling (spec §5 ordering guarantee).
    pub async fn revoke_if_active<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        reason: &str,
        replaced_by: Option<Uuid>,
    ) -> Result<Option<RefreshSession>, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE auth_refresh_sessions
            SET revoked_at = now(), revoked_reason = $2, replaced_by = $3
            WHERE id = $1 AND revoked_at IS NULL
            RETURNING id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                      created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(replaced_by)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    pub async fn touch_refresh_session<'e, E>(&self, executor: E, id: Uuid, update: TouchRefreshSession) -> Result<RefreshSession, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE auth_refresh_sessions
            SET token_hash = COALESCE($2, token_hash),
                expires_at = COALESCE($3, expires_at),
                anti_csrf = COALESCE($4, anti_csrf),
                last_used_at = COALESCE($5, last_used_at)
            WHERE id = $1
            RETURNING id, user_id, family_id, token_hash, anti_csrf, scopes, ip, user_agent,
                      created_at, last_used_at, expires_at, revoked_at, revoked_reason, replaced_by
            "#,
        )
        .bind(id)
        .bind(update.token_hash)
        .bind(update.expires_at)
        .bind(update.anti_csrf)
        .bind(update.last_used_at)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::Internal(format!("refresh session {id} vanished mid-update")))
    }

    /// Revoke a session against the pool directly (no caller-held
    /// transaction needed) — the idempotent, standalone form of
    /// `revoke_refresh_session` for callers outside a larger unit of work.
    pub async fn revoke_refresh_session_now(&self, id: Uuid, reason: &str) -> Result<RefreshSession, Error> {
        self.revoke_refresh_session(&self.pool, id, reason, None).await
    }

    pub async fn record_auth_event<'e, E>(&self, executor: E, new_event: NewAuthAuditEvent) -> Result<AuthAuditEvent, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        self.audit.record(executor, new_event).await
    }

    pub async fn list_recent_auth_events(
        &self,
        user_id: Option<Uuid>,
        session_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuthAuditEvent>, Error> {
        self.audit.list_recent(user_id, session_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_session_is_active_requires_unrevoked_and_unexpired() {
        let now = Utc::now();
        let base = RefreshSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            token_hash: "h".to_string(),
            anti_csrf: "c".to_string(),
            scopes: vec!["console:read".to_string()],
            ip: None,
            user_agent: None,
            created_at: now,
            last_used_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            revoked_at: None,
            revoked_reason: None,
            replaced_by: None,
        };
        assert!(base.is_active(now));

        let expired = RefreshSession { expires_at: now - chrono::Duration::seconds(1), ..base.clone() };
        assert!(!expired.is_active(now));

        let revoked = RefreshSession { revoked_at: Some(now), ..base };
        assert!(!revoked.is_active(now));
    }
}
