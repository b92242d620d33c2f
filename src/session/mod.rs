//! Session Repository (C8): the durable store shared by the Auth Engine —
//! users, refresh sessions, and (by delegation) the audit log.

pub mod repository;

pub use repository::{NewRefreshSession, RefreshSession, SessionRepository, TouchRefreshSession, User};
