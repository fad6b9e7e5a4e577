//! Result and error types for settle.

use thiserror::Error;

/// Result type for settle operations
pub type SettleResult<T> = Result<T, SettleError>;

/// Errors that can occur while querying or waiting on a live page
#[derive(Debug, Error)]
pub enum SettleError {
    /// A wait did not converge before its timeout
    #[error("{message} (timed out after {ms}ms)")]
    Timeout {
        /// Caller-supplied failure message
        message: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// The element (or its document) is no longer attached
    #[error("Element detached from the DOM: {message}")]
    Detached {
        /// Error message
        message: String,
    },

    /// Selector string rejected before reaching the driver
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The offending selector
        selector: String,
        /// Why it was rejected
        reason: String,
    },

    /// Invalid state error (e.g. a reconstructed locator without a root query)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// The driver has no page to run against
    #[error("Cannot {action} '{selector}' because no browser has been launched")]
    NoPage {
        /// What was attempted
        action: String,
        /// Chaining history of the locator involved
        selector: String,
    },

    /// Any other driver failure
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SettleError {
    /// Shorthand for a detachment error
    pub fn detached(message: impl Into<String>) -> Self {
        Self::Detached {
            message: message.into(),
        }
    }

    /// Shorthand for a generic driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// True for caller mistakes that no amount of retrying can fix.
    ///
    /// The poller propagates these immediately even when it is told to
    /// swallow predicate errors.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidSelector { .. } | Self::InvalidState { .. } | Self::NoPage { .. }
        )
    }

    /// True when the failure only means the element went away
    #[must_use]
    pub const fn is_detachment(&self) -> bool {
        matches!(self, Self::Detached { .. })
    }

    /// True for poller timeouts
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_keeps_failure_text() {
        let err = SettleError::Timeout {
            message: "Cannot find 'selector(#foo)'".to_string(),
            ms: 500,
        };
        let text = err.to_string();
        assert!(text.contains("selector(#foo)"));
        assert!(text.contains("500ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_no_page_message() {
        let err = SettleError::NoPage {
            action: "query selector".to_string(),
            selector: "foobar".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot query selector 'foobar' because no browser has been launched"
        );
    }

    #[test]
    fn test_classification() {
        assert!(SettleError::detached("gone").is_detachment());
        assert!(!SettleError::detached("gone").is_configuration());
        assert!(SettleError::InvalidSelector {
            selector: String::new(),
            reason: "empty".to_string(),
        }
        .is_configuration());
        assert!(SettleError::InvalidState {
            message: "no root".to_string(),
        }
        .is_configuration());
        assert!(!SettleError::driver("boom").is_configuration());
        assert!(!SettleError::driver("boom").is_detachment());
    }

    #[test]
    fn test_json_error_converts() {
        let err: SettleError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SettleError::Json(_)));
    }
}
