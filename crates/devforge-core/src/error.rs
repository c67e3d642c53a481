//! Error types for devforge-core

use devforge_provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] devforge_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("No {range} ports available in {start}-{end}")]
    PortsExhausted { range: String, start: u16, end: u16 },

    #[error("Port reservation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Failed to pull Docker image {image}. Please ensure Docker is running and you have internet connectivity. ({reason})")]
    ImageUnavailable { image: String, reason: String },

    #[error("Bootstrap step '{step}' failed with exit code {exit_code}: {output}")]
    BootstrapFailed {
        step: String,
        exit_code: i64,
        output: String,
    },

    #[error("Lost connection to container {container}: {reason}")]
    Transport { container: String, reason: String },

    #[error("Preview not available for {0} projects")]
    PreviewUnsupported(String),

    #[error("Dev server did not come up within {0}s, check /app/frontend.log")]
    DevServerTimeout(u64),

    #[error("Failed to start dev server. Check frontend.log for errors. {0}")]
    DevServerFailed(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Failed to write project files: {0}")]
    Scaffold(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        if err.is_connection() {
            Self::EngineUnavailable(err.to_string())
        } else {
            Self::Provider(err)
        }
    }
}

impl CoreError {
    /// Operator-facing hint for the failures people hit most
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::EngineUnavailable(_) => Some(
                "Start the Docker daemon (sudo systemctl enable --now docker) or check DOCKER_HOST",
            ),
            Self::PortsExhausted { .. } => Some(
                "Destroy unused project containers or widen FRONTEND_PORT_*/BACKEND_PORT_* ranges",
            ),
            Self::StoreUnavailable(_) => Some("Check that Redis is reachable at REDIS_URL"),
            Self::ImageUnavailable { .. } => {
                Some("Check network access to the registry or set DOCKER_BASE_IMAGE")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_become_engine_unavailable() {
        let err: CoreError = ProviderError::ConnectionError("refused".into()).into();
        assert!(matches!(err, CoreError::EngineUnavailable(_)));
        assert!(err.remediation().unwrap().contains("Docker daemon"));

        let err: CoreError = ProviderError::NotFound("abc".into()).into();
        assert!(matches!(err, CoreError::Provider(_)));
        assert!(err.remediation().is_none());
    }

    #[test]
    fn test_engine_and_ports_are_distinguishable() {
        let exhausted = CoreError::PortsExhausted {
            range: "frontend".into(),
            start: 50000,
            end: 50001,
        };
        assert_eq!(
            exhausted.to_string(),
            "No frontend ports available in 50000-50001"
        );
        assert_ne!(
            exhausted.remediation(),
            CoreError::EngineUnavailable(String::new()).remediation()
        );
    }
}
