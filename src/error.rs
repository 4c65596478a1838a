use thiserror::Error;

/// Main error type for lucent operations
#[derive(Error, Debug)]
pub enum LucentError {
    #[error("Buffer underflow: need {needed} bytes at {position}, limit is {limit}")]
    Underflow {
        position: usize,
        needed: usize,
        limit: usize,
    },

    #[error("Buffer overflow: need {needed} bytes at {position}, limit is {limit}")]
    Overflow {
        position: usize,
        needed: usize,
        limit: usize,
    },

    #[error("Buffer is read-only")]
    ReadOnly,

    #[error("Corrupt segment {segment}: {reason}")]
    CorruptSegment { segment: String, reason: String },

    #[error("Capacity exceeded: {attempted} bytes, limit is {limit}")]
    CapacityExceeded { limit: u64, attempted: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Merge cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Manifest error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for lucent operations
pub type Result<T> = std::result::Result<T, LucentError>;

impl LucentError {
    pub(crate) fn corrupt(segment: impl ToString, reason: impl Into<String>) -> Self {
        LucentError::CorruptSegment {
            segment: segment.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a transient failure that could be retried
    ///
    /// Only I/O failures qualify; the caller decides on backoff since retrying
    /// may require freeing disk space first.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LucentError::Io(_))
    }

    /// Check if this error means stored bytes cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(self, LucentError::CorruptSegment { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LucentError::corrupt("segment_7", "checksum mismatch");
        assert_eq!(err.to_string(), "Corrupt segment segment_7: checksum mismatch");

        let err = LucentError::CapacityExceeded {
            limit: 10,
            attempted: 12,
        };
        assert_eq!(err.to_string(), "Capacity exceeded: 12 bytes, limit is 10");
    }

    #[test]
    fn test_retriable_errors() {
        let io = LucentError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_retriable());
        assert!(!LucentError::Cancelled.is_retriable());
        assert!(!LucentError::corrupt("s", "bad").is_retriable());
        assert!(LucentError::corrupt("s", "bad").is_corruption());
    }
}
