//! Repository layer for the authentication service.
//!
//! Claim processors depend on the [`UserStore`] trait, not on Postgres.

pub mod users;

pub use users::{PgUserStore, UserStore};
