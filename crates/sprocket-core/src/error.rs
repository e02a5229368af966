//! Error types shared by every Sprocket crate.
//!
//! Storage, HTTP and plugin errors live next to the components that produce
//! them; this module only holds what the core itself raises.

use thiserror::Error;

/// Type-erased error returned by handler bodies and plugin lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a [`Transport`](crate::Transport) when sending.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The chat connection is not established.
    #[error("transport is not connected")]
    NotConnected,

    /// The connection was closed while sending.
    #[error("connection closed: {reason}")]
    Closed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message to '{target}': {reason}")]
    SendFailed {
        /// Channel or nick the message was addressed to.
        target: String,
        /// Reason for failure.
        reason: String,
    },
}

impl TransportError {
    /// Creates a send failure for the given target.
    pub fn send_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Dispatch Faults
// =============================================================================

/// A failure caught at a task boundary.
///
/// Faults are logged with the owning plugin and the triggering event, then
/// dropped. They never reach the router or other tasks.
#[derive(Debug, Error)]
pub enum DispatchFault {
    /// The handler body returned an error.
    #[error("handler returned an error: {0}")]
    Error(#[source] BoxError),

    /// The handler body panicked.
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl DispatchFault {
    /// Builds a fault from a panic payload captured by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic(message)
    }

    /// Returns `true` if the fault came from a panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_rendered() {
        let fault = DispatchFault::from_panic(Box::new("boom"));
        assert!(fault.is_panic());
        assert_eq!(fault.to_string(), "handler panicked: boom");

        let fault = DispatchFault::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(fault.to_string(), "handler panicked: owned boom");

        let fault = DispatchFault::from_panic(Box::new(42_u32));
        assert_eq!(fault.to_string(), "handler panicked: non-string panic payload");
    }

    #[test]
    fn send_failure_names_target() {
        let err = TransportError::send_failed("#rust", "socket reset");
        assert_eq!(
            err.to_string(),
            "failed to send message to '#rust': socket reset"
        );
    }
}
