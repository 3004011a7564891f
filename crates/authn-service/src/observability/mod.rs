//! Observability for the authentication service.

pub mod metrics;
