//! Auth Engine: password hashing (C5), token issuance/rotation (C6), and
//! the in-process rate limiter (C7).

pub mod config;
pub mod password;
pub mod rate_limit;
pub mod tokens;

pub use config::{AuthConfig, CookieConfig, PasswordConfig, RateLimitConfig, RefreshTokenConfig, TokenConfig};
pub use password::PasswordHasher;
pub use rate_limit::RateLimiter;
pub use tokens::{AccessClaims, TokenBundle, TokenService};
