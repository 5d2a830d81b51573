use serde::Serialize;
use thiserror::Error;

/// Errors raised at the model service boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Accelerator out of memory: {detail}")]
    ResourceExhausted { detail: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model service error: {0}")]
    Backend(String),

    #[error("Model service unreachable: {0}")]
    Transport(String),
}

impl ServiceError {
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Every failure a generation run can end with, already classified.
#[derive(Error, Debug)]
pub enum GenError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A generation is already in progress")]
    Busy,

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Texture stage failed: {0}")]
    TextureStage(String),

    #[error("Generation failed: {0}")]
    Unrecoverable(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Busy,
    Cancelled,
    Resource,
    TextureStage,
    Unrecoverable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
            Self::Resource => "resource",
            Self::TextureStage => "texture_stage",
            Self::Unrecoverable => "unrecoverable",
        }
    }
}

impl GenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Busy => ErrorKind::Busy,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Resource(_) => ErrorKind::Resource,
            Self::TextureStage(_) => ErrorKind::TextureStage,
            Self::Unrecoverable(_) | Self::Io(_) => ErrorKind::Unrecoverable,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ServiceError> for GenError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ResourceExhausted { detail } => Self::Resource(detail),
            ServiceError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::Unrecoverable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_classification() {
        let oom = ServiceError::ResourceExhausted { detail: "decode".into() };
        assert_eq!(GenError::from(oom).kind(), ErrorKind::Resource);

        let bad = ServiceError::InvalidInput("not an image".into());
        assert_eq!(GenError::from(bad).kind(), ErrorKind::Validation);

        let down = ServiceError::Transport("connection refused".into());
        assert_eq!(GenError::from(down).kind(), ErrorKind::Unrecoverable);
    }

    #[test]
    fn test_cancelled_message_is_fixed() {
        assert_eq!(GenError::Cancelled.to_string(), "Cancelled by user");
        assert!(GenError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_io_errors_are_unrecoverable() {
        let err = GenError::from(std::io::Error::other("disk full"));
        assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    }
}
