//! # tfstate-control
//!
//! Multi-tenant control plane for Terraform state: backend-agnostic
//! ingestion, structural normalization into an addressable representation,
//! snapshot persistence with derived indexes, plan-vs-state drift
//! analysis, address-level mutation under a round-trip invariant, and
//! session-bound authentication that resists refresh-token replay.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tfstate_control::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     #[cfg(feature = "database")]
//!     {
//!         let pool = tfstate_control::database::create_pool(&config.database).await?;
//!         MigrationRunner::new(pool.clone()).run().await?;
//!         let _state = AppState::new(config, pool);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod state;

pub mod audit;
pub mod auth;
pub mod migrations;
pub mod session;
pub mod state_engine;
pub mod workspace;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "http")]
pub mod http;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, ServiceConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;
    pub use crate::state::AppState;

    pub use crate::audit::{AuditRecorder, AuditSeverity, AuthAuditEvent, EventTag, NewAuthAuditEvent};
    pub use crate::auth::{
        AuthConfig, PasswordConfig, PasswordHasher, RateLimitConfig, RateLimiter, RefreshTokenConfig,
        TokenBundle, TokenConfig, TokenService,
    };
    pub use crate::migrations::MigrationRunner;
    pub use crate::session::{RefreshSession, SessionRepository, User};
    pub use crate::state_engine::{
        analyze_drift, parse_state, BackendAdapter, BackendConfig, DriftSummary, FetchedState, Output,
        ParsedState, ResourceInstance, StateStore,
    };
    pub use crate::workspace::{
        compare, ComparisonResult, ComparisonType, Difference, Workspace, WorkspaceRepository,
        WorkspaceVariable,
    };

    #[cfg(feature = "http")]
    pub use crate::http::router;

    pub use serde::{Deserialize, Serialize};
    pub use tracing::{debug, error, info, instrument, trace, warn};
    pub use uuid::Uuid;
}
