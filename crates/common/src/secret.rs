//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] types. Use them for the database connection string,
//! the workflow-engine bearer token and anything else that grants access.
//! `SecretString` implements `Debug` with redaction, so structs that derive
//! `Debug` stay safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct WorkflowCredentials {
//!     endpoint: String,
//!     token: SecretString,
//! }
//!
//! let creds = WorkflowCredentials {
//!     endpoint: "https://workflows.internal".to_string(),
//!     token: SecretString::from("wf-token"),
//! };
//! assert!(!format!("{creds:?}").contains("wf-token"));
//! assert_eq!(creds.token.expose_secret(), "wf-token");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("postgresql://user:pw@db/authn");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("pw@db"));
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct SyncCredentials {
            endpoint: String,
            token: SecretString,
        }

        let json = r#"{"endpoint": "https://wf", "token": "bearer-value"}"#;
        let creds: SyncCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.token.expose_secret(), "bearer-value");
        assert!(!format!("{creds:?}").contains("bearer-value"));
    }
}
