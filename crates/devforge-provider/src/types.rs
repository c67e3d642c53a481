//! Common types for container providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First 12 bytes, or the whole ID when that would split a character
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container status as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Restart policy applied by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    /// Survives daemon restarts, but not an explicit stop
    UnlessStopped,
    OnFailure,
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerConfig {
    /// Image to use
    pub image: String,
    /// Container name
    pub name: Option<String>,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Volume mounts
    pub mounts: Vec<MountConfig>,
    /// Port mappings
    pub ports: Vec<PortConfig>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Network mode
    pub network_mode: Option<String>,
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
    /// CPU limit in units of 1e-9 CPUs
    pub nano_cpus: Option<i64>,
    pub restart_policy: RestartPolicy,
}

/// Mount configuration
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub mount_type: MountType,
    /// Source path or volume name
    pub source: String,
    /// Target path in container
    pub target: String,
    pub read_only: bool,
}

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Volume,
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Host port (None for auto-assign)
    pub host_port: Option<u16>,
    pub container_port: u16,
    /// Protocol (tcp/udp)
    pub protocol: String,
    pub host_ip: Option<String>,
}

impl PortConfig {
    /// TCP mapping of `container_port` onto a fixed host port
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            host_port: Some(host_port),
            container_port,
            protocol: "tcp".to_string(),
            host_ip: None,
        }
    }
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute
    pub cmd: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
}

impl ExecConfig {
    /// Run `script` through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            cmd: vec!["sh".to_string(), "-c".to_string(), script.into()],
            ..Default::default()
        }
    }
}

/// Result of exec command
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

/// Basic container info for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub created: i64,
    pub labels: HashMap<String, String>,
}

/// Detailed container information
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub status: ContainerStatus,
    pub running: bool,
    pub created: i64,
    pub started_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortInfo>,
}

/// Port information
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// Log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Number of lines from end to show
    pub tail: Option<u64>,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            tail: Some(100),
            timestamps: false,
        }
    }
}

/// One resource usage snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// CPU usage in percent of one CPU (can exceed 100 on multi-core)
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx: u64,
    pub network_tx: u64,
}

/// Raw counters needed to derive [`ContainerStats`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
}

impl ContainerStats {
    /// Derive percentages from two consecutive CPU samples
    pub fn from_sample(s: &StatsSample) -> Self {
        let cpu_delta = s.cpu_total.saturating_sub(s.precpu_total) as f64;
        let system_delta = s.system_cpu.saturating_sub(s.presystem_cpu) as f64;
        let cpu_percent = if system_delta > 0.0 {
            cpu_delta / system_delta * s.online_cpus.max(1) as f64 * 100.0
        } else {
            0.0
        };
        let memory_percent = if s.memory_limit > 0 {
            s.memory_usage as f64 / s.memory_limit as f64 * 100.0
        } else {
            0.0
        };

        Self {
            cpu_percent: round2(cpu_percent),
            memory_bytes: s.memory_usage,
            memory_limit: s.memory_limit,
            memory_percent: round2(memory_percent),
            network_rx: s.network_rx,
            network_tx: s.network_tx,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Provider information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_short_id_multibyte() {
        // byte 12 falls inside the last 'é'
        let id = ContainerId::new("aéééééé");
        assert_eq!(id.short(), "aéééééé");
        assert_eq!(ContainerId::new("ééééééé").short(), "éééééé");
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(ContainerStatus::from("Running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from("exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from("weird"), ContainerStatus::Unknown);
    }

    #[test]
    fn test_stats_percentages() {
        let stats = ContainerStats::from_sample(&StatsSample {
            cpu_total: 2_000,
            precpu_total: 1_000,
            system_cpu: 20_000,
            presystem_cpu: 10_000,
            online_cpus: 2,
            memory_usage: 256,
            memory_limit: 1024,
            network_rx: 10,
            network_tx: 20,
        });
        assert_eq!(stats.cpu_percent, 20.0);
        assert_eq!(stats.memory_percent, 25.0);
        assert_eq!(stats.network_tx, 20);
    }

    #[test]
    fn test_stats_zero_deltas() {
        let stats = ContainerStats::from_sample(&StatsSample::default());
        assert_eq!(stats.cpu_percent, 0.0);
        assert_eq!(stats.memory_percent, 0.0);
    }

    #[test]
    fn test_exec_shell_wraps_sh() {
        let cfg = ExecConfig::shell("echo hi");
        assert_eq!(cfg.cmd, vec!["sh", "-c", "echo hi"]);
    }
}
