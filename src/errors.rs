use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("TRANSPORT_FAILURE: {0}")]
    Transport(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID_INPUT: {0}")]
    Invalid(String),
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Kind name recorded as `errorType` when the error is logged to the event store.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::Io(_) => "IoError",
            Self::NotFound(_) => "NotFoundError",
            Self::Invalid(_) => "InvalidInputError",
            Self::Timeout(_) => "TimeoutError",
            Self::Internal(_) => "InternalError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport(message)
            | Self::Io(message)
            | Self::NotFound(message)
            | Self::Invalid(message)
            | Self::Timeout(message)
            | Self::Internal(message) => message,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Invalid(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_carries_error_code() {
        let error = AppError::Transport("connection refused".to_string());
        assert_eq!(error.to_string(), "TRANSPORT_FAILURE: connection refused");
        assert_eq!(error.kind(), "TransportError");
        assert_eq!(error.message(), "connection refused");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.nblr");
        let error: AppError = io.into();
        assert!(matches!(error, AppError::Io(_)));
        assert!(error.to_string().starts_with("IO_FAILURE"));
    }
}
