//! Authentication Service Library
//!
//! Validates bearer tokens from several trust origins and maps them to
//! persisted users:
//!
//! - Internal identity provider (`keycloak`)
//! - Legacy gateway (`kas`), refreshed through the profile-sync workflow
//! - Partner service tokens (`ssa`) acting for a named user
//! - Third-party OIDC issuers (`custom`)
//!
//! # Architecture
//!
//! ```text
//! middleware/auth.rs -> auth/registry.rs -> auth/processors/*.rs
//!                                         -> auth/keyset_config.rs -> auth/resolver.rs
//!                                         -> repositories/users.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Key sets, key resolution, origin registry, claim processors
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Bearer token authentication
//! - `models` - User record and update types
//! - `observability` - Prometheus metrics
//! - `repositories` - User persistence
//! - `routes` - Axum router setup
//! - `services` - Profile-sync workflow client

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
