//! Docker provider implementation using bollard

use crate::{
    ContainerDetails, ContainerId, ContainerInfo, ContainerProvider, ContainerStats,
    ContainerStatus, CreateContainerConfig, ExecConfig, ExecResult, ImageId, LogConfig,
    MountType, PortInfo, ProviderError, ProviderInfo, Result, RestartPolicy, StatsSample,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Docker provider using bollard crate
pub struct DockerProvider {
    client: Docker,
}

impl DockerProvider {
    /// Create a new Docker provider and verify the daemon answers
    pub async fn new(socket_path: &str) -> Result<Self> {
        let client = if socket_path.starts_with("http://") || socket_path.starts_with("https://")
        {
            Docker::connect_with_http(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            version: "unknown".to_string(),
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<bool> {
        let options = ListNetworksOptions {
            filters: HashMap::from([("name", vec![name])]),
        };
        let networks = self.client.list_networks(Some(options)).await?;

        // The name filter matches substrings, so compare exactly
        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(false);
        }

        let options = CreateNetworkOptions {
            name,
            driver: "bridge",
            check_duplicate: true,
            ..Default::default()
        };

        match self.client.create_network(options).await {
            Ok(_) => {
                tracing::info!("Created Docker network: {}", name);
                Ok(true)
            }
            Err(e) => match ProviderError::from(e) {
                // Another instance created it between our list and create
                ProviderError::Conflict(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match ProviderError::from(e) {
                ProviderError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(ProviderError::ImageNotFound(error));
                    }
                    if let Some(status) = info.status {
                        let line = match info.progress {
                            Some(p) => format!("{} {}", status, p),
                            None => status,
                        };
                        tracing::debug!("{}", line);
                        if let Some(tx) = progress {
                            let _ = tx.send(line);
                        }
                    }
                }
                Err(e) => {
                    return Err(match ProviderError::from(e) {
                        ProviderError::NotFound(msg) => ProviderError::ImageNotFound(msg),
                        other => other,
                    })
                }
            }
        }

        let inspect = self
            .client
            .inspect_image(image)
            .await
            .map_err(|e| ProviderError::ImageNotFound(e.to_string()))?;

        Ok(ImageId::new(inspect.id.unwrap_or_else(|| image.to_string())))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            let container_port = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings.insert(container_port, Some(vec![binding]));
        }

        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(match m.mount_type {
                    MountType::Bind => MountTypeEnum::BIND,
                    MountType::Volume => MountTypeEnum::VOLUME,
                }),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let restart_policy = bollard::service::RestartPolicy {
            name: Some(match config.restart_policy {
                RestartPolicy::No => RestartPolicyNameEnum::NO,
                RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
                RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
                RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
            }),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            network_mode: config.network_mode.clone(),
            memory: config.memory_bytes,
            nano_cpus: config.nano_cpus,
            restart_policy: Some(restart_policy),
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: config.working_dir.clone(),
            hostname: config.hostname.clone(),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("Container create warning: {}", warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.unwrap_or(10) as i64,
        };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn restart(&self, id: &ContainerId) -> Result<()> {
        self.client.restart_container(&id.0, None).await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool, volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: volumes,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&id.0, options).await?;

        let start_options = StartExecOptions {
            detach: false,
            tty: false,
            ..Default::default()
        };

        let result = self.client.start_exec(&exec.id, Some(start_options)).await?;

        let mut output_str = String::new();

        if let StartExecResults::Attached { mut output, .. } = result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                        output_str.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ProviderError::ExecError(format!(
                            "output stream for {} failed: {}",
                            id.short(),
                            e
                        )))
                    }
                }
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        Ok(ExecResult {
            exit_code,
            output: output_str,
        })
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let config = info.config.as_ref();

        let mut ports = Vec::new();
        if let Some(network) = &info.network_settings {
            if let Some(port_map) = &network.ports {
                for (container_port, bindings) in port_map {
                    let mut parts = container_port.split('/');
                    let port_num: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                    let protocol = parts.next().unwrap_or("tcp").to_string();

                    match bindings {
                        Some(bindings) => {
                            for binding in bindings {
                                ports.push(PortInfo {
                                    container_port: port_num,
                                    host_port: binding
                                        .host_port
                                        .as_ref()
                                        .and_then(|p| p.parse().ok()),
                                    protocol: protocol.clone(),
                                    host_ip: binding.host_ip.clone(),
                                });
                            }
                        }
                        None => ports.push(PortInfo {
                            container_port: port_num,
                            host_port: None,
                            protocol,
                            host_ip: None,
                        }),
                    }
                }
            }
        }

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: id.clone(),
            name: info
                .name
                .clone()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            image_id: info.image.clone().unwrap_or_default(),
            status,
            running: state.and_then(|s| s.running).unwrap_or(false),
            created: info
                .created
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(0),
            started_at,
            exit_code: state.and_then(|s| s.exit_code),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            ports,
        })
    }

    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<Vec<String>> {
        let options = LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            tail: config
                .tail
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string()),
            timestamps: config.timestamps,
            since: 0,
            until: 0,
        };

        let mut stream = self.client.logs(&id.0, Some(options));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let data = match chunk? {
                LogOutput::StdOut { message } => message,
                LogOutput::StdErr { message } => message,
                LogOutput::StdIn { message } => message,
                LogOutput::Console { message } => message,
            };
            text.push_str(&String::from_utf8_lossy(&data));
        }

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.to_string())
            .collect())
    }

    async fn stats(&self, id: &ContainerId) -> Result<ContainerStats> {
        // one_shot would skip the precpu sample needed for the CPU delta
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.client.stats(&id.0, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| ProviderError::NotFound(format!("no stats for {}", id.short())))??;

        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .and_then(|n| n.get("eth0"))
            .map(|n| (n.rx_bytes, n.tx_bytes))
            .unwrap_or((0, 0));

        Ok(ContainerStats::from_sample(&StatsSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(1),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            network_rx,
            network_tx,
        }))
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![label.to_string()])]),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: ContainerId::new(c.id.unwrap_or_default()),
                name: c
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                status: c
                    .state
                    .as_deref()
                    .map(ContainerStatus::from)
                    .unwrap_or(ContainerStatus::Unknown),
                created: c.created.unwrap_or(0),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }
}
