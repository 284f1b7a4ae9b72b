//! Typed error hierarchy for the denoiser.
//!
//! Every failure a run can hit falls into one of three kinds:
//!
//! - **Configuration**: detected before (or independent of) accelerator
//!   resource creation: unknown backend token, unreadable input, output that
//!   cannot be created, malformed run configuration.
//! - **Accelerator**: an accelerator operation failed to be created,
//!   submitted or completed.  Carries a stable [`Status`] identifier.
//! - **Media**: the frame source or sink failed after the run started.
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry without string parsing.

use std::fmt;

/// Stable status identifier attached to accelerator failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// An argument was out of range, mismatched or aliased.
    InvalidArgument,
    /// The image format (or format pair) is not supported by the operation.
    InvalidImageFormat,
    /// The object is in a state that does not allow the operation.
    InvalidOperation,
    /// The requested backend is not available for this operation or device.
    NotImplemented,
    /// An allocation could not be satisfied.
    OutOfMemory,
    /// Unexpected failure inside the runtime.
    InternalError,
}

impl Status {
    /// Machine-readable name printed in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidImageFormat => "invalid_image_format",
            Self::InvalidOperation => "invalid_operation",
            Self::NotImplemented => "not_implemented",
            Self::OutOfMemory => "out_of_memory",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All errors originating from the denoiser.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("accelerator error: {status}: {message}")]
    Accelerator { status: Status, message: String },

    #[error("media error: {0}")]
    Media(String),
}

impl EngineError {
    /// Shorthand for building an [`EngineError::Accelerator`].
    pub fn accelerator(status: Status, message: impl Into<String>) -> Self {
        Self::Accelerator {
            status,
            message: message.into(),
        }
    }

    /// Stable integer error code for structured telemetry.
    ///
    /// - 1xx: configuration
    /// - 2xx: accelerator, one code per [`Status`]
    /// - 3xx: media
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Configuration(_) => 100,
            Self::Accelerator { status, .. } => match status {
                Status::InvalidArgument => 200,
                Status::InvalidImageFormat => 201,
                Status::InvalidOperation => 202,
                Status::NotImplemented => 203,
                Status::OutOfMemory => 204,
                Status::InternalError => 205,
            },
            Self::Media(_) => 300,
        }
    }

    /// Failure kind name used on the error channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Accelerator { .. } => "AcceleratorError",
            Self::Media(_) => "MediaError",
        }
    }

    /// Accelerator status, if this is an accelerator failure.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Accelerator { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerator_message_names_status() {
        let err = EngineError::accelerator(Status::InvalidOperation, "stream is in an error state");
        assert_eq!(
            err.to_string(),
            "accelerator error: invalid_operation: stream is in an error state"
        );
        assert_eq!(err.kind(), "AcceleratorError");
        assert_eq!(err.status(), Some(Status::InvalidOperation));
    }

    #[test]
    fn error_codes_are_grouped_by_kind() {
        assert_eq!(EngineError::Configuration("x".into()).error_code(), 100);
        assert_eq!(
            EngineError::accelerator(Status::InvalidImageFormat, "x").error_code(),
            201
        );
        assert_eq!(EngineError::Media("x".into()).error_code(), 300);
        assert_eq!(EngineError::Media("x".into()).status(), None);
    }
}
