//! Error types.

use std::io;

use thiserror::Error;

use crate::flags::Capability;

/// An attempted operation lacked a required capability.
///
/// This is the only error the decision core produces. It is never retried
/// or downgraded by the guard and should abort the surrounding unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Access Denied: '{capability}' required for {path}")]
pub struct PolicyViolation {
    /// The capability the operation needed.
    pub capability: Capability,
    /// The path as the caller supplied it.
    pub path: String,
}

impl PolicyViolation {
    /// Create a violation for `capability` at `path`.
    pub fn new(capability: Capability, path: impl Into<String>) -> Self {
        Self {
            capability,
            path: path.into(),
        }
    }
}

impl From<PolicyViolation> for io::Error {
    fn from(violation: PolicyViolation) -> Self {
        io::Error::new(io::ErrorKind::PermissionDenied, violation)
    }
}

/// Errors from guarded filesystem and process operations.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The current policy does not allow the operation.
    #[error(transparent)]
    Denied(#[from] PolicyViolation),
    /// The operation was allowed but failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl GuardError {
    /// Returns true if the operation was stopped by the policy.
    pub fn is_denied(&self) -> bool {
        matches!(self, GuardError::Denied(_))
    }

    /// The violation, if the operation was denied.
    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            GuardError::Denied(violation) => Some(violation),
            GuardError::Io(_) => None,
        }
    }
}

/// Result type for guarded operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors from loading policy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to load.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The requested preset does not exist.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
    /// A session id that would escape the session directory.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_message() {
        let violation = PolicyViolation::new(Capability::Write, "logs/app.log");
        assert_eq!(
            violation.to_string(),
            "Access Denied: 'w' required for logs/app.log"
        );
    }

    #[test]
    fn test_violation_into_io_error() {
        let err: io::Error = PolicyViolation::new(Capability::Delete, "a").into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<PolicyViolation>())
            .unwrap();
        assert_eq!(inner.capability, Capability::Delete);
    }

    #[test]
    fn test_guard_error_classification() {
        let denied = GuardError::from(PolicyViolation::new(Capability::Read, "x"));
        assert!(denied.is_denied());
        assert_eq!(denied.violation().map(|v| v.capability), Some(Capability::Read));

        let io = GuardError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(!io.is_denied());
        assert!(io.violation().is_none());
    }
}
