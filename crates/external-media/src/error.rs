//! Error types for external media orchestration

use thiserror::Error;

/// Result type for external media operations
pub type Result<T> = std::result::Result<T, ExternalMediaError>;

/// Result type for switch control-plane calls
pub type SwitchResult<T> = std::result::Result<T, SwitchError>;

/// Errors surfaced by the planner, the establisher and the session store
#[derive(Debug, Error)]
pub enum ExternalMediaError {
    /// Session, call, conference or switch resource is absent
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Reference type this component cannot tap
    #[error("Unsupported reference type: {0}")]
    UnsupportedReferenceType(String),

    /// Encapsulation value with no implementation behind it
    #[error("Unsupported encapsulation: {0}")]
    UnsupportedEncapsulation(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Malformed input (bad port, unparsable id, ...)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The switch control-plane call itself failed
    #[error("Switch call '{operation}' failed: {source}")]
    Switch {
        operation: &'static str,
        #[source]
        source: SwitchError,
    },

    /// Reference lookup failed for a reason other than absence
    #[error("Reference lookup failed: {message}")]
    Reference { message: String },
}

impl ExternalMediaError {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wrap a failed switch call with the operation that issued it
    pub fn switch(operation: &'static str, source: SwitchError) -> Self {
        Self::Switch { operation, source }
    }

    /// True for every flavour of "the thing is not there", including a
    /// 404 coming back from the switch
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Switch {
                    source: SwitchError::NotFound { .. },
                    ..
                }
        )
    }
}

/// Errors returned by a [`crate::switch::SwitchClient`]
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("unexpected response status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("unknown switch node: {0}")]
    UnknownNode(String),
}

impl From<reqwest::Error> for SwitchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SwitchError::Decode(err.to_string())
        } else {
            SwitchError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExternalMediaError::not_found("external media", "abc");
        assert_eq!(err.to_string(), "external media not found: abc");

        let err = ExternalMediaError::switch(
            "create bridge",
            SwitchError::Status { code: 500, body: "boom".to_string() },
        );
        assert_eq!(
            err.to_string(),
            "Switch call 'create bridge' failed: unexpected response status 500: boom"
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(ExternalMediaError::not_found("call", "x").is_not_found());
        assert!(ExternalMediaError::switch(
            "hangup channel",
            SwitchError::NotFound { resource: "channel".to_string() }
        )
        .is_not_found());
        assert!(!ExternalMediaError::invalid_state("nope").is_not_found());
    }
}
