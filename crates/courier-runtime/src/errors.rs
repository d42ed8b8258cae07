//! Runtime error types.

use std::io;

use thiserror::Error;

/// Errors from registry persistence and session reaping.
///
/// The registry itself never surfaces these to callers: they are logged and
/// the in-memory state stays authoritative.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Reading or writing the registry file failed.
    #[error("registry io error: {0}")]
    Io(#[from] io::Error),

    /// The registry file is not valid JSON for the expected shape.
    #[error("registry parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A [`SessionReaper`](crate::SessionReaper) failed to remove a session.
    #[error("failed to reap session {session_key}: {message}")]
    Reap {
        /// Session that could not be removed.
        session_key: String,
        /// Why.
        message: String,
    },
}

/// Errors from delivering one announcement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Nobody is listening for the target session.
    #[error("no route to session {session_key}")]
    NoRoute {
        /// Session the item was for.
        session_key: String,
    },

    /// The transport failed.
    #[error("delivery failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_display() {
        let err = RegistryError::Reap {
            session_key: "child-1".into(),
            message: "gone".into(),
        };
        assert_eq!(err.to_string(), "failed to reap session child-1: gone");
    }

    #[test]
    fn no_route_display() {
        let err = DeliveryError::NoRoute {
            session_key: "main".into(),
        };
        assert_eq!(err.to_string(), "no route to session main");
    }
}
