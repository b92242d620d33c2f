//! Authentication configuration structures
//!
//! Configuration for password hashing, token issuance, and refresh-cookie
//! transport. Every field maps to one of the environment options in the
//! external-interfaces section of the control-plane specification.

use serde::{Deserialize, Serialize};

/// Top-level auth configuration, nested under `AppConfig::auth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub refresh_tokens: RefreshTokenConfig,
    #[serde(default)]
    pub cookie: CookieConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: PasswordConfig::default(),
            tokens: TokenConfig::default(),
            refresh_tokens: RefreshTokenConfig::default(),
            cookie: CookieConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Password hashing configuration (Argon2id, OWASP defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    #[serde(default = "default_memory_cost")]
    pub memory_cost_kib: u32,
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default = "default_min_length")]
    pub min_password_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
            min_password_length: default_min_length(),
        }
    }
}

/// Access-token issuance configuration. Maps to `ACCESS_TOKEN_MINUTES`,
/// `JWT_SECRET`, `JWT_ISSUER`, `JWT_AUDIENCE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    /// Access-token signing secret. Required; no default — absence is a
    /// startup configuration error.
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_minutes: default_access_token_minutes(),
            jwt_secret: String::new(),
            issuer: None,
            audience: None,
        }
    }
}

/// Refresh-token issuance configuration. Maps to `REFRESH_TOKEN_MINUTES`,
/// `REFRESH_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenConfig {
    #[serde(default = "default_refresh_token_minutes")]
    pub refresh_token_minutes: i64,
    /// Refresh-token hashing is one-way (sha256); this secret is reserved
    /// for a future signed-refresh-envelope mode and defaults to the
    /// access secret when unset, per the environment table.
    #[serde(default)]
    pub refresh_secret: Option<String>,
}

impl Default for RefreshTokenConfig {
    fn default() -> Self {
        Self {
            refresh_token_minutes: default_refresh_token_minutes(),
            refresh_secret: None,
        }
    }
}

/// Refresh-cookie transport configuration. Maps to `AUTH_REFRESH_COOKIE`,
/// `COOKIE_SECURE`, `COOKIE_DOMAIN`, `COOKIE_SAMESITE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_samesite")]
    pub samesite: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secure: default_true(),
            domain: None,
            samesite: default_samesite(),
        }
    }
}

/// Rate limiter configuration (C7 defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            block_secs: default_block_secs(),
        }
    }
}

fn default_memory_cost() -> u32 {
    65536
}
fn default_time_cost() -> u32 {
    3
}
fn default_parallelism() -> u32 {
    4
}
fn default_min_length() -> usize {
    8
}
fn default_access_token_minutes() -> i64 {
    30
}
fn default_refresh_token_minutes() -> i64 {
    10080
}
fn default_cookie_name() -> String {
    "refresh_token".to_string()
}
fn default_samesite() -> String {
    "lax".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    5
}
fn default_window_secs() -> u64 {
    60
}
fn default_block_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_config_defaults() {
        let c = PasswordConfig::default();
        assert_eq!(c.memory_cost_kib, 65536);
        assert_eq!(c.time_cost, 3);
        assert_eq!(c.parallelism, 4);
        assert_eq!(c.min_password_length, 8);
    }

    #[test]
    fn token_config_defaults() {
        let c = TokenConfig::default();
        assert_eq!(c.access_token_minutes, 30);
    }

    #[test]
    fn refresh_config_defaults() {
        let c = RefreshTokenConfig::default();
        assert_eq!(c.refresh_token_minutes, 10080);
    }

    #[test]
    fn rate_limit_defaults() {
        let c = RateLimitConfig::default();
        assert_eq!(c.max_attempts, 5);
        assert_eq!(c.window_secs, 60);
        assert_eq!(c.block_secs, 300);
    }
}
