use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_CONNECTED: {0}")]
    NotConnected(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CONFLICT: {0}")]
    Conflict(String),
    #[error("REMOTE_TRANSIENT: {0}")]
    RemoteTransient(String),
    #[error("REMOTE_POLICY: {0}")]
    RemotePolicy(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Only transient remote failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteTransient(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Validation(format!("invalid config file: {}", value))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            return Self::RemotePolicy(format!("unexpected response shape: {}", value));
        }
        if value.is_timeout() || value.is_connect() || value.is_request() {
            return Self::RemoteTransient(value.to_string());
        }
        match value.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 => {
                Self::RemotePolicy(value.to_string())
            }
            _ => Self::RemoteTransient(value.to_string()),
        }
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
    fn only_transient_errors_are_retryable() {
        assert!(AppError::RemoteTransient("503".to_string()).is_retryable());
        assert!(!AppError::RemotePolicy("rejected".to_string()).is_retryable());
        assert!(!AppError::Validation("too few variants".to_string()).is_retryable());
    }

    #[test]
    fn messages_carry_the_error_code() {
        let error = AppError::NotConnected("no ad account".to_string());
        assert_eq!(error.to_string(), "NOT_CONNECTED: no ad account");
    }
}
