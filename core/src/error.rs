//! Error type shared by the core algorithms.

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A name or address could not be turned into a usable host. Callers skip the item.
    #[error("unusable input: {0}")]
    UnusableInput(String),

    /// Marker block missing/malformed, or a persisted target line has the wrong shape.
    #[error("format error: {0}")]
    Format(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_display() {
        let err = Error::format("markers are missing");
        assert_eq!(err.to_string(), "format error: markers are missing");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(io);
        assert!(err.to_string().contains("gone"));
    }
}
