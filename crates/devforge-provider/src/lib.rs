//! Container runtime client for devforge
//!
//! This crate wraps the container engine's remote API behind a
//! [`ContainerProvider`] trait so the lifecycle manager and the virtual shell
//! can be exercised against a mock in tests.

mod docker;
mod error;
mod types;

pub use docker::DockerProvider;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for container providers
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Check if the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Get provider information
    fn info(&self) -> ProviderInfo;

    /// Make sure a bridge network named `name` exists.
    /// Returns true if it was created by this call.
    async fn ensure_network(&self, name: &str) -> Result<bool>;

    /// Check whether an image is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image from a registry.
    /// Progress lines are sent to `progress` when provided.
    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stop a container, killing it after `timeout` seconds
    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()>;

    /// Restart a container
    async fn restart(&self, id: &ContainerId) -> Result<()>;

    /// Remove a container, optionally with its anonymous volumes
    async fn remove(&self, id: &ContainerId, force: bool, volumes: bool) -> Result<()>;

    /// Execute a command in a running container and wait for it to finish
    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult>;

    /// Get detailed information about a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Get the last lines of a container's output
    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<Vec<String>>;

    /// Take a single resource usage snapshot
    async fn stats(&self, id: &ContainerId) -> Result<ContainerStats>;

    /// List containers carrying `label` (`key=value`)
    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>>;
}

/// Connect to the engine described by `config`, with a remediation message
/// on failure.
pub async fn create_provider(
    config: &devforge_config::DockerConfig,
) -> Result<Box<dyn ContainerProvider>> {
    match DockerProvider::new(&config.socket).await {
        Ok(provider) => Ok(Box::new(provider)),
        Err(e) => {
            let socket_path = config.socket.trim_start_matches("unix://");
            let socket_exists = !is_local_socket(&config.socket)
                || std::path::Path::new(socket_path).exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                &config.socket,
                socket_exists,
                &e,
            )))
        }
    }
}

fn is_local_socket(socket: &str) -> bool {
    socket.starts_with("unix://") || socket.starts_with('/')
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(socket: &str, socket_exists: bool, underlying: &ProviderError) -> String {
    let mut msg = String::from("Docker is not running or cannot be reached\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket
        ));
        msg.push_str("To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
        msg.push_str("or start Docker Desktop and try again.\n");
    } else {
        msg.push_str(&format!(
            "The endpoint {} exists but the daemon is not responding.\n\n",
            socket
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}
