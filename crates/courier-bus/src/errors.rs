//! Bus error types.

use courier_core::MessageType;
use thiserror::Error;

/// Errors surfaced by correlated requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The caller's cancellation fired before a matching response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// A request was published without a correlation ID.
    #[error("message type {message_type} carries no correlation id")]
    MissingCorrelationId {
        /// Type of the offending message.
        message_type: MessageType,
    },

    /// The response channel closed without a value.
    #[error("response channel closed")]
    Closed,
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_message_type() {
        let err = BusError::MissingCorrelationId {
            message_type: MessageType::UpdatePolicy,
        };
        assert_eq!(err.to_string(), "message type update-policy carries no correlation id");
        assert_eq!(BusError::Cancelled.to_string(), "request cancelled");
    }
}
