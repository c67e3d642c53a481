//! Error types for container providers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect to container runtime: {0}")]
    ConnectionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Not modified: {0}")]
    NotModified(String),

    #[error("Exec failed: {0}")]
    ExecError(String),

    #[error("Container runtime error: {0}")]
    RuntimeError(String),

    #[error("Timeout waiting for operation")]
    Timeout,
}

impl ProviderError {
    /// Whether the daemon itself could not be reached
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Timeout)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<bollard::errors::Error> for ProviderError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as E;
        match err {
            E::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            E::DockerResponseServerError {
                status_code: 409,
                message,
            } => Self::Conflict(message),
            E::DockerResponseServerError {
                status_code: 304,
                message,
            } => Self::NotModified(message),
            E::DockerResponseServerError {
                status_code,
                message,
            } => Self::RuntimeError(format!("{} (status {})", message, status_code)),
            E::IOError { err } => Self::ConnectionError(err.to_string()),
            E::RequestTimeoutError => Self::Timeout,
            other => {
                let msg = other.to_string();
                if looks_like_connection_failure(&msg) {
                    Self::ConnectionError(msg)
                } else {
                    Self::RuntimeError(msg)
                }
            }
        }
    }
}

fn looks_like_connection_failure(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("connection refused")
        || msg.contains("socket not found")
        || msg.contains("no such file or directory")
        || msg.contains("error trying to connect")
        || msg.contains("broken pipe")
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_status_codes_map_to_variants() {
        assert!(matches!(ProviderError::from(server_error(404)), ProviderError::NotFound(_)));
        assert!(matches!(ProviderError::from(server_error(409)), ProviderError::Conflict(_)));
        assert!(matches!(ProviderError::from(server_error(304)), ProviderError::NotModified(_)));
        assert!(matches!(ProviderError::from(server_error(500)), ProviderError::RuntimeError(_)));
    }

    #[test]
    fn test_io_error_is_connection() {
        let err = bollard::errors::Error::IOError {
            err: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(ProviderError::from(err).is_connection());
    }
}
