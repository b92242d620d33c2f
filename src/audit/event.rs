//! Audit event types (C9)
//!
//! `AuthAuditEvent` is the append-only row shape spec'd for the auth side:
//! an event tag, the subject it concerns, and a free-form JSON details
//! blob. Never mutated, never soft-deleted once persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag identifying what happened. `Display` gives the dotted string stored
/// in the database and returned to callers of `/auth/events`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventTag {
    LoginSuccess,
    LoginFailed,
    Logout,
    RefreshRotated,
    RefreshReuse,
    PasswordChanged,
    SessionRevoked,
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::RefreshRotated => "refresh_rotated",
            Self::RefreshReuse => "refresh_reuse",
            Self::PasswordChanged => "password_changed",
            Self::SessionRevoked => "session_revoked",
        };
        write!(f, "{s}")
    }
}

impl EventTag {
    /// Severity recorded for events of this kind, per the distinction the
    /// original event log viewer drew between failed logins and routine
    /// session bookkeeping.
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            Self::LoginFailed | Self::RefreshReuse => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        }
    }
}

/// Two-level severity, not the full syslog range — this log is read by
/// operators triaging auth anomalies, not a general-purpose event bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    Info,
    Warning,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// One row of the append-only auth audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAuditEvent {
    pub id: Uuid,
    pub event: String,
    pub severity: AuditSeverity,
    pub user_id: Option<Uuid>,
    pub subject: Option<String>,
    pub session_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to record a new event; `id`/`created_at` are assigned by
/// the repository at insert time.
#[derive(Debug, Clone)]
pub struct NewAuthAuditEvent {
    pub event: EventTag,
    pub severity: AuditSeverity,
    pub user_id: Option<Uuid>,
    pub subject: Option<String>,
    pub session_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
}

impl NewAuthAuditEvent {
    /// Build with the event tag's default severity and no extra detail.
    pub fn new(event: EventTag, subject: impl Into<String>) -> Self {
        Self {
            severity: event.default_severity(),
            event,
            user_id: None,
            subject: Some(subject.into()),
            session_id: None,
            scopes: Vec::new(),
            ip: None,
            user_agent: None,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_source(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_display_is_dotted_snake_case() {
        assert_eq!(EventTag::LoginSuccess.to_string(), "login_success");
        assert_eq!(EventTag::RefreshReuse.to_string(), "refresh_reuse");
    }

    #[test]
    fn failed_login_and_reuse_default_to_warning() {
        assert_eq!(EventTag::LoginFailed.default_severity(), AuditSeverity::Warning);
        assert_eq!(EventTag::RefreshReuse.default_severity(), AuditSeverity::Warning);
        assert_eq!(EventTag::LoginSuccess.default_severity(), AuditSeverity::Info);
    }

    #[test]
    fn new_audit_event_carries_default_severity() {
        let event = NewAuthAuditEvent::new(EventTag::Logout, "user@example.com");
        assert_eq!(event.severity, AuditSeverity::Info);
        assert_eq!(event.subject.as_deref(), Some("user@example.com"));
    }
}
