//! Audit Recorder (C9)
//!
//! Append-only log of authentication state changes. Writes go through
//! whatever executor the caller is already holding (typically a
//! transaction opened by [`crate::session::SessionRepository`]) so an
//! audit row lands atomically with the state change it describes, never
//! as a separate, potentially-losable write.

pub mod event;

pub use event::{AuditSeverity, AuthAuditEvent, EventTag, NewAuthAuditEvent};

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Error;

/// Thin wrapper over `auth_audit_events`. Holds a pool only so it can be
/// constructed standalone (e.g. in tests); production call sites pass an
/// open transaction into `record` to get the atomicity the event log
/// requires.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: PgPool,
}

impl AuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one event using the given executor (pool, connection, or
    /// transaction) — callers that need the write to be atomic with
    /// another insert pass `&mut *tx`.
    pub async fn record<'e, E>(&self, executor: E, new_event: NewAuthAuditEvent) -> Result<AuthAuditEvent, Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, AuthAuditEventRow>(
            r#"
            INSERT INTO auth_audit_events
                (event, severity, user_id, subject, session_id, scopes, ip, user_agent, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING id, event, severity, user_id, subject, session_id, scopes, ip, user_agent, details, created_at
            "#,
        )
        .bind(new_event.event.to_string())
        .bind(new_event.severity.to_string())
        .bind(new_event.user_id)
        .bind(&new_event.subject)
        .bind(new_event.session_id)
        .bind(&new_event.scopes)
        .bind(&new_event.ip)
        .bind(&new_event.user_agent)
        .bind(&new_event.details)
        .fetch_one(executor)
        .await?;

        Ok(row.into_event())
    }

    /// Recent events for a user and/or session, newest first.
    pub async fn list_recent(
        &self,
        user_id: Option<Uuid>,
        session_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuthAuditEvent>, Error> {
        let rows = sqlx::query_as::<_, AuthAuditEventRow>(
            r#"
            SELECT id, event, severity, user_id, subject, session_id, scopes, ip, user_agent, details, created_at
            FROM auth_audit_events
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR session_id = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuthAuditEventRow::into_event).collect())
    }
}

#[derive(sqlx::FromRow)]
struct AuthAuditEventRow {
    id: Uuid,
    event: String,
    severity: String,
    user_id: Option<Uuid>,
    subject: Option<String>,
    session_id: Option<Uuid>,
    scopes: Vec<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    details: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl AuthAuditEventRow {
    fn into_event(self) -> AuthAuditEvent {
        AuthAuditEvent {
            id: self.id,
            event: self.event,
            severity: if self.severity == "warning" { AuditSeverity::Warning } else { AuditSeverity::Info },
            user_id: self.user_id,
            subject: self.subject,
            session_id: self.session_id,
            scopes: self.scopes,
            ip: self.ip,
            user_agent: self.user_agent,
            details: self.details,
            created_at: self.created_at,
        }
    }
}
