//! Domain-specific error types for container operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Errors that can occur when talking to the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The container runtime is not responding. Fatal to the pipeline:
    /// no further steps are attempted once this is seen.
    #[error("container runtime is not reachable: {message}")]
    Unreachable { message: String },

    /// The named container does not exist.
    #[error("container not found: {name}")]
    NotFound { name: String },

    /// A command could not be run or completed abnormally.
    #[error("command failed inside the container: {message}")]
    ExecFailed { message: String },
}

impl ContainerError {
    /// Creates an `Unreachable` error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an `ExecFailed` error.
    pub fn exec_failed(message: impl Into<String>) -> Self {
        Self::ExecFailed {
            message: message.into(),
        }
    }

    /// Returns true if the runtime itself is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Returns true if the container was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_error() {
        let err = ContainerError::unreachable("daemon not running");
        assert!(err.is_unreachable());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "container runtime is not reachable: daemon not running"
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = ContainerError::not_found("sandbox");
        assert!(err.is_not_found());
        assert!(!err.is_unreachable());
        assert_eq!(err.to_string(), "container not found: sandbox");
    }

    #[test]
    fn test_exec_failed_error() {
        let err = ContainerError::exec_failed("exec create failed");
        assert!(!err.is_unreachable());
        assert_eq!(
            err.to_string(),
            "command failed inside the container: exec create failed"
        );
    }
}
