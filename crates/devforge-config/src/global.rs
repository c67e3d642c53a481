//! Global configuration for devforge
//!
//! Located at `~/.config/devforge/config.toml`. Every field can also be set
//! through the environment variables the web backend is deployed with
//! (`DOCKER_BASE_IMAGE`, `REDIS_URL`, ...), which take precedence over the file.

use crate::{parse_cpu_limit, parse_memory_limit, ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global devforge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub docker: DockerConfig,
    pub container: ContainerConfig,
    pub ports: PortsConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub preview: PreviewConfig,
}

/// Container engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path or http(s) URL
    pub socket: String,
    /// Shared bridge network every project container joins
    pub network: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".to_string(),
            network: "devforge-network".to_string(),
        }
    }
}

/// Per-project container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Base image every project container runs
    pub image: String,
    /// Host directory holding `<user>/<project>` workspaces
    pub projects_root: String,
    /// Memory limit, e.g. "512m"
    pub memory: String,
    /// CPU limit as a fraction of one CPU, e.g. "0.5"
    pub cpus: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "node:18-alpine".to_string(),
            projects_root: "/docker-projects".to_string(),
            memory: "512m".to_string(),
            cpus: "0.5".to_string(),
        }
    }
}

impl ContainerConfig {
    /// Projects root with `~` and `$VAR` expanded
    pub fn projects_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.projects_root)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.projects_root.clone()))
    }

    /// Memory limit in bytes
    pub fn memory_bytes(&self) -> i64 {
        parse_memory_limit(&self.memory)
    }

    /// CPU limit in nano-CPU units
    pub fn nano_cpus(&self) -> Result<i64> {
        parse_cpu_limit(&self.cpus)
    }
}

/// Inclusive port span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRangeConfig {
    pub start: u32,
    pub end: u32,
}

impl PortRangeConfig {
    /// Bounds as TCP ports. The end is clamped to 65535 so the historical
    /// backend default of 70000 still yields a usable range.
    pub fn bounds(&self) -> Result<(u16, u16)> {
        let end = self.end.min(u16::MAX as u32);
        if self.start == 0 || self.start > end {
            return Err(ConfigError::Invalid(format!(
                "port range {}-{} is empty",
                self.start, self.end
            )));
        }
        Ok((self.start as u16, end as u16))
    }
}

/// Port ranges for the two host ports each container gets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub frontend: PortRangeConfig,
    pub backend: PortRangeConfig,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            frontend: PortRangeConfig {
                start: 50000,
                end: 60000,
            },
            backend: PortRangeConfig {
                start: 60001,
                end: 70000,
            },
        }
    }
}

/// Shared key-value store used for port reservations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `redis://host:port` or `memory://` for a process-local store
    pub url: String,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            password: None,
        }
    }
}

impl StoreConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

/// Virtual shell session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session resets to the entry directory
    pub timeout_secs: u64,
    /// Interval of the expired-session sweep
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Dev-server readiness probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub ready_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 30,
            poll_interval_ms: 1000,
        }
    }
}

impl PreviewConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ForgeConfig {
    /// Load the config file (if any) and apply process environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path, without environment overrides
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.clone(),
            source: e,
        })?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Takes a lookup function instead of reading the process environment
    /// directly so tests can supply their own variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCKER_HOST") {
            self.docker.socket = v;
        }
        if let Some(v) = lookup("DOCKER_NETWORK_NAME") {
            self.docker.network = v;
        }
        if let Some(v) = lookup("DOCKER_BASE_IMAGE") {
            self.container.image = v;
        }
        if let Some(v) = lookup("DOCKER_PROJECTS_PATH") {
            self.container.projects_root = v;
        }
        if let Some(v) = lookup("CONTAINER_MEMORY_LIMIT") {
            self.container.memory = v;
        }
        if let Some(v) = lookup("CONTAINER_CPU_LIMIT") {
            self.container.cpus = v;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("REDIS_PASSWORD") {
            self.store.password = if v.is_empty() { None } else { Some(v) };
        }

        let port_vars: [(&str, &mut u32); 4] = [
            ("FRONTEND_PORT_START", &mut self.ports.frontend.start),
            ("FRONTEND_PORT_END", &mut self.ports.frontend.end),
            ("BACKEND_PORT_START", &mut self.ports.backend.start),
            ("BACKEND_PORT_END", &mut self.ports.backend.end),
        ];
        for (key, slot) in port_vars {
            if let Some(v) = lookup(key) {
                *slot = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.clone(),
                })?;
            }
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let (fs, fe) = self.ports.frontend.bounds()?;
        let (bs, be) = self.ports.backend.bounds()?;
        if fs <= be && bs <= fe {
            return Err(ConfigError::Invalid(format!(
                "frontend ports {}-{} overlap backend ports {}-{}",
                fs, fe, bs, be
            )));
        }
        self.container.nano_cpus()?;
        if self.session.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy safe to print: secrets are masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.store.password.is_some() {
            config.store.password = Some("********".to_string());
        }
        config
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("DEVFORGE_CONFIG_DIR") {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        let dirs = ProjectDirs::from("", "", "devforge").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("DEVFORGE_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let dirs = ProjectDirs::from("", "", "devforge").ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}
