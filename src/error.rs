use thiserror::Error;

/// Main error type for fingerdb operations
#[derive(Error, Debug)]
pub enum FingerdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for fingerdb operations
pub type Result<T> = std::result::Result<T, FingerdbError>;

impl FingerdbError {
    /// Missing key/list/block/FID. Several read paths treat this as an empty result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FingerdbError::NotFound(_))
    }

    /// Failures of the backing store itself (open/close/get/put).
    pub fn is_io(&self) -> bool {
        matches!(self, FingerdbError::Io(_) | FingerdbError::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FingerdbError::NotFound("block 3 of list 7".to_string());
        assert_eq!(err.to_string(), "Not found: block 3 of list 7");
    }

    #[test]
    fn test_error_classes() {
        assert!(FingerdbError::NotFound("x".into()).is_not_found());
        assert!(FingerdbError::Backend("x".into()).is_io());
        assert!(!FingerdbError::State("closed".into()).is_io());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FingerdbError = io.into();
        assert!(err.is_io());
    }
}
