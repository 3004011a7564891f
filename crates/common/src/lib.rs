//! Common utilities shared across control-plane services.

#![warn(clippy::pedantic)]

/// Module for token-format utilities (size limit, unverified header/issuer, iat)
pub mod jwt;

/// Module for secret types that prevent accidental logging
pub mod secret;
