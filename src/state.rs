//! Application state management

use std::sync::Arc;

#[cfg(feature = "database")]
use sqlx::PgPool;

use crate::auth::{PasswordHasher, RateLimiter, TokenService};
use crate::config::Config;
use crate::session::SessionRepository;
use crate::state_engine::{StateBackend, StateStore};
use crate::workspace::WorkspaceRepository;

/// Application state shared across HTTP handlers.
///
/// Holds the configuration, the database pool, and the long-lived engine
/// objects (state store, session repository, token service, rate limiter,
/// backend adapter, workspace repository) that handlers borrow to do their
/// work. Cheap to clone — everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,

    #[cfg(feature = "database")]
    db_pool: PgPool,

    state_store: Arc<StateStore>,
    sessions: Arc<SessionRepository>,
    tokens: Arc<TokenService>,
    passwords: Arc<PasswordHasher>,
    rate_limiter: Arc<RateLimiter>,
    backend: Arc<StateBackend>,
    workspaces: Arc<WorkspaceRepository>,
}

impl AppState {
    /// Assemble application state from a loaded configuration and an
    /// already-connected database pool.
    #[cfg(feature = "database")]
    pub fn new(config: Config, db_pool: PgPool) -> Self {
        let passwords = Arc::new(PasswordHasher::new(config.auth.password.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.auth.rate_limit.clone()));
        let session_repo = SessionRepository::new(db_pool.clone());
        let sessions = Arc::new(session_repo.clone());
        let tokens = Arc::new(TokenService::new(
            config.auth.tokens.clone(),
            config.auth.refresh_tokens.clone(),
            session_repo,
        ));
        let state_store = Arc::new(StateStore::new(db_pool.clone()));
        let backend = Arc::new(StateBackend::new(config.service.backend_timeout_secs));
        let workspaces = Arc::new(WorkspaceRepository::new(db_pool.clone()));

        Self {
            config: Arc::new(config),
            db_pool,
            state_store,
            sessions,
            tokens,
            passwords,
            rate_limiter,
            backend,
            workspaces,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(feature = "database")]
    pub fn db(&self) -> &PgPool {
        &self.db_pool
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state_store
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn passwords(&self) -> &PasswordHasher {
        &self.passwords
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn backend(&self) -> &StateBackend {
        &self.backend
    }

    pub fn workspaces(&self) -> &WorkspaceRepository {
        &self.workspaces
    }
}
