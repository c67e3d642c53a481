//! Project container lifecycle: create with rollback, teardown, power state

use super::ContainerManager;
use crate::bootstrap::{bootstrap_steps, WORKSPACE_DIR};
use crate::{
    scaffold, ContainerRecord, CoreError, PortPair, PortRange, Project, ProjectType,
    RecordStatus, Result,
};
use chrono::Utc;
use devforge_provider::{
    ContainerId, CreateContainerConfig, ExecConfig, MountConfig, MountType, PortConfig,
    ProviderError, RestartPolicy,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Container-side port of the Vite dev server
pub const FRONTEND_CONTAINER_PORT: u16 = 5173;
/// Container-side port of the backend API
pub const BACKEND_CONTAINER_PORT: u16 = 3001;

const STOP_TIMEOUT_SECS: u32 = 10;

/// Deterministic container name for a project
pub fn container_name(user_id: &str, project_id: &str) -> String {
    format!("devforge-{}-{}", user_id, project_id)
}

impl ContainerManager {
    /// Host directory holding a project's files
    pub fn project_root(&self, user_id: &str, project_id: &str) -> PathBuf {
        self.config
            .container
            .projects_root_path()
            .join(user_id)
            .join(project_id)
    }

    /// Create, start and bootstrap the container for a project.
    ///
    /// Ports are reserved until the container is fully bootstrapped. Any
    /// failure after allocation releases them and removes the container if
    /// it was already created. The project directory is left in place.
    pub async fn create(
        &self,
        user_id: &str,
        project_id: &str,
        project_name: &str,
        project_type: ProjectType,
    ) -> Result<ContainerRecord> {
        let network = &self.config.docker.network;
        if self.provider.ensure_network(network).await? {
            tracing::info!("Created network {}", network);
        }

        let frontend = self.ports.acquire(PortRange::Frontend).await?;
        let backend = match self.ports.acquire(PortRange::Backend).await {
            Ok(port) => port,
            Err(e) => {
                self.release_quietly(PortRange::Frontend, frontend).await;
                return Err(e);
            }
        };
        let ports = PortPair { frontend, backend };

        let mut created = None;
        match self
            .provision(
                user_id,
                project_id,
                project_name,
                project_type,
                ports,
                &mut created,
            )
            .await
        {
            Ok(record) => {
                tracing::info!(
                    "Container {} ready (frontend {}, backend {})",
                    record.container_name,
                    ports.frontend,
                    ports.backend
                );
                Ok(record)
            }
            Err(e) => {
                tracing::error!("Creating container for {} failed: {}", project_id, e);
                self.rollback(created.as_ref(), ports).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        user_id: &str,
        project_id: &str,
        project_name: &str,
        project_type: ProjectType,
        ports: PortPair,
        created: &mut Option<ContainerId>,
    ) -> Result<ContainerRecord> {
        let root = self.project_root(user_id, project_id);
        tokio::fs::create_dir_all(&root).await?;
        scaffold::write_scaffold(&root, project_type, project_name)?;

        let image = self.config.container.image.clone();
        self.ensure_image(&image).await?;

        let config = self.container_config(
            user_id,
            project_id,
            project_name,
            project_type,
            &root,
            ports,
        )?;
        let id = self.provider.create(&config).await?;
        *created = Some(id.clone());
        tracing::debug!("Created container {}", id.short());

        self.provider.start(&id).await?;
        self.run_bootstrap(&id, project_type).await?;

        let details = self.provider.inspect(&id).await?;
        Ok(ContainerRecord {
            container_id: id.0,
            container_name: container_name(user_id, project_id),
            image,
            image_id: details.image_id,
            status: RecordStatus::Running,
            ports,
            memory_bytes: config.memory_bytes.unwrap_or_default(),
            nano_cpus: config.nano_cpus.unwrap_or_default(),
            created_at: Utc::now(),
            last_health_check_at: None,
        })
    }

    /// Pull `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.provider.image_exists(image).await? {
            return Ok(());
        }

        tracing::info!("Pulling image {}", image);
        self.provider
            .pull(image, None)
            .await
            .map_err(|e| CoreError::ImageUnavailable {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn container_config(
        &self,
        user_id: &str,
        project_id: &str,
        project_name: &str,
        project_type: ProjectType,
        root: &Path,
        ports: PortPair,
    ) -> Result<CreateContainerConfig> {
        let env = HashMap::from([
            ("USER_ID".to_string(), user_id.to_string()),
            ("PROJECT_ID".to_string(), project_id.to_string()),
            ("PROJECT_NAME".to_string(), project_name.to_string()),
            (
                "FRONTEND_PORT".to_string(),
                FRONTEND_CONTAINER_PORT.to_string(),
            ),
            (
                "BACKEND_PORT".to_string(),
                BACKEND_CONTAINER_PORT.to_string(),
            ),
            ("NODE_ENV".to_string(), "development".to_string()),
        ]);

        let labels = HashMap::from([
            ("app".to_string(), "devforge".to_string()),
            ("userId".to_string(), user_id.to_string()),
            ("projectId".to_string(), project_id.to_string()),
            ("projectName".to_string(), project_name.to_string()),
            ("projectType".to_string(), project_type.as_str().to_string()),
        ]);

        Ok(CreateContainerConfig {
            image: self.config.container.image.clone(),
            name: Some(container_name(user_id, project_id)),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "tail -f /dev/null".to_string(),
            ]),
            env,
            working_dir: Some(WORKSPACE_DIR.to_string()),
            mounts: vec![MountConfig {
                mount_type: MountType::Bind,
                source: root.display().to_string(),
                target: WORKSPACE_DIR.to_string(),
                read_only: false,
            }],
            ports: vec![
                PortConfig::tcp(FRONTEND_CONTAINER_PORT, ports.frontend),
                PortConfig::tcp(BACKEND_CONTAINER_PORT, ports.backend),
            ],
            labels,
            hostname: None,
            network_mode: Some(self.config.docker.network.clone()),
            memory_bytes: Some(self.config.container.memory_bytes()),
            nano_cpus: Some(self.config.container.nano_cpus()?),
            restart_policy: RestartPolicy::UnlessStopped,
        })
    }

    /// Run each bootstrap step to completion, stopping at the first failure
    async fn run_bootstrap(&self, id: &ContainerId, project_type: ProjectType) -> Result<()> {
        for step in bootstrap_steps(project_type) {
            tracing::info!("Bootstrap {}: {}", id.short(), step.name);
            let config = ExecConfig {
                working_dir: Some(WORKSPACE_DIR.to_string()),
                ..ExecConfig::shell(step.script)
            };
            let result = self.provider.exec(id, &config).await?;
            if result.exit_code != 0 {
                return Err(CoreError::BootstrapFailed {
                    step: step.name.to_string(),
                    exit_code: result.exit_code,
                    output: result.output,
                });
            }
        }
        Ok(())
    }

    async fn rollback(&self, created: Option<&ContainerId>, ports: PortPair) {
        if let Some(id) = created {
            if let Err(e) = self.provider.remove(id, true, true).await {
                tracing::error!("Rollback could not remove container {}: {}", id.short(), e);
            }
        }
        self.release_quietly(PortRange::Frontend, ports.frontend).await;
        self.release_quietly(PortRange::Backend, ports.backend).await;
    }

    async fn release_quietly(&self, range: PortRange, port: u16) {
        if let Err(e) = self.ports.release(range, port).await {
            tracing::warn!("Failed to release {} port {}: {}", range, port, e);
        }
    }

    /// Stop and remove a container, then release its ports.
    ///
    /// Ports are only released once the container is gone. A container that
    /// is already stopped or already removed is not an error.
    pub async fn destroy(&self, container_id: &str, ports: PortPair) -> Result<()> {
        let id = ContainerId::new(container_id);

        match self.provider.stop(&id, Some(STOP_TIMEOUT_SECS)).await {
            Ok(()) => {}
            Err(ProviderError::NotModified(_)) => {
                tracing::debug!("Container {} already stopped", id.short());
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} already gone", id.short());
            }
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Stopping {} failed, forcing removal: {}", id.short(), e);
            }
        }

        match self.provider.remove(&id, true, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} already removed", id.short());
            }
            Err(e) => return Err(e.into()),
        }

        self.ports.release(PortRange::Frontend, ports.frontend).await?;
        self.ports.release(PortRange::Backend, ports.backend).await?;
        tracing::info!("Destroyed container {}", id.short());
        Ok(())
    }

    /// Create a project with a fresh ID and its container, and persist it
    pub async fn create_project(
        &self,
        user_id: &str,
        name: &str,
        project_type: ProjectType,
    ) -> Result<Project> {
        let id = uuid::Uuid::new_v4().to_string();
        let container = self.create(user_id, &id, name, project_type).await?;

        let now = Utc::now();
        let project = Project {
            id: id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            project_type,
            root_path: self.project_root(user_id, &id),
            container,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        };

        self.projects.write().await.upsert(project.clone());
        if let Err(e) = self.save_projects().await {
            tracing::error!("Failed to persist project {}: {}", id, e);
            self.projects.write().await.remove(&id);
            if let Err(destroy_err) = self
                .destroy(&project.container.container_id, project.container.ports)
                .await
            {
                tracing::error!("Cleanup of {} failed: {}", id, destroy_err);
            }
            return Err(e);
        }

        tracing::info!("Created {} project {} for {}", project_type, id, user_id);
        Ok(project)
    }

    /// Destroy a project's container, forget its session and drop its record
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id).await?;
        self.destroy(&project.container.container_id, project.container.ports)
            .await?;
        self.sessions().clear(&project.user_id, &project.id);

        self.projects.write().await.remove(project_id);
        self.save_projects().await?;
        tracing::info!("Deleted project {}", project_id);
        Ok(())
    }

    /// Restart a project's container
    pub async fn restart(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id).await?;
        self.provider
            .restart(&ContainerId::new(project.container.container_id))
            .await?;
        self.set_status(project_id, RecordStatus::Running).await
    }

    /// Stop a project's container without releasing its ports
    pub async fn stop(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id).await?;
        let id = ContainerId::new(project.container.container_id);
        match self.provider.stop(&id, Some(STOP_TIMEOUT_SECS)).await {
            Ok(()) | Err(ProviderError::NotModified(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.set_status(project_id, RecordStatus::Stopped).await
    }

    /// Start a stopped project container
    pub async fn start(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id).await?;
        let id = ContainerId::new(project.container.container_id);
        match self.provider.start(&id).await {
            Ok(()) | Err(ProviderError::NotModified(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.set_status(project_id, RecordStatus::Running).await
    }

    async fn set_status(&self, project_id: &str, status: RecordStatus) -> Result<()> {
        self.update_project(project_id, |p| p.container.status = status)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{harness, harness_with};
    use crate::test_support::{FakeContainer, MockCall};
    use devforge_provider::ExecResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_react_container() {
        let h = harness();
        let record = h
            .manager
            .create("u1", "p1", "demo", ProjectType::React)
            .await
            .unwrap();

        assert_eq!(record.container_id, "mock_container_id");
        assert_eq!(record.container_name, "devforge-u1-p1");
        assert_eq!(record.status, RecordStatus::Running);
        assert_eq!(record.image_id, "sha256:mock_image_id");
        assert_eq!(
            record.ports,
            PortPair {
                frontend: 50000,
                backend: 60000
            }
        );
        assert_eq!(h.store.live_keys(), 2);
        assert_eq!(h.mock.exec_scripts().len(), 5);

        let root = h.tmp.path().join("projects").join("u1").join("p1");
        assert!(root.is_dir());

        let configs = h.mock.created_configs();
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.name.as_deref(), Some("devforge-u1-p1"));
        assert_eq!(config.working_dir.as_deref(), Some("/app"));
        assert_eq!(
            config.cmd.as_deref().unwrap().last().map(String::as_str),
            Some("tail -f /dev/null")
        );
        assert_eq!(config.mounts[0].source, root.display().to_string());
        assert_eq!(config.mounts[0].target, "/app");
        assert_eq!(
            config.ports,
            vec![PortConfig::tcp(5173, 50000), PortConfig::tcp(3001, 60000)]
        );
        assert_eq!(config.memory_bytes, Some(512 * 1024 * 1024));
        assert_eq!(config.nano_cpus, Some(500_000_000));
        assert_eq!(config.restart_policy, RestartPolicy::UnlessStopped);
        assert_eq!(config.labels["app"], "devforge");
        assert_eq!(config.labels["projectType"], "react");
        assert_eq!(config.env["PROJECT_ID"], "p1");
        assert_eq!(config.env["NODE_ENV"], "development");
    }

    #[tokio::test]
    async fn test_bootstrap_failure_rolls_back() {
        let h = harness();
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();
        h.mock.set_exec_handler(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(if n == 2 {
                ExecResult {
                    exit_code: 1,
                    output: "cat: can't create /app/frontend/src/App.tsx".to_string(),
                }
            } else {
                ExecResult {
                    exit_code: 0,
                    output: String::new(),
                }
            })
        });

        let err = h
            .manager
            .create("u1", "p1", "demo", ProjectType::React)
            .await
            .unwrap_err();

        match err {
            CoreError::BootstrapFailed {
                step, exit_code, ..
            } => {
                assert_eq!(step, "write starter files");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(steps.load(Ordering::SeqCst), 3);
        assert!(h.mock.was_called(&MockCall::Remove {
            id: "mock_container_id".to_string(),
            force: true,
            volumes: true,
        }));
        assert_eq!(h.store.live_keys(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled() {
        let h = harness();
        *h.mock.image_exists_result.lock().unwrap() = Ok(false);

        h.manager
            .create("u1", "p1", "demo", ProjectType::Node)
            .await
            .unwrap();
        assert!(h.mock.was_called(&MockCall::Pull {
            image: "node:18-alpine".to_string()
        }));
    }

    #[tokio::test]
    async fn test_pull_failure_releases_ports() {
        let h = harness();
        *h.mock.image_exists_result.lock().unwrap() = Ok(false);
        *h.mock.pull_result.lock().unwrap() =
            Err(ProviderError::ImageNotFound("node:18-alpine".into()));

        let err = h
            .manager
            .create("u1", "p1", "demo", ProjectType::Node)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ImageUnavailable { .. }));
        assert!(err.to_string().starts_with("Failed to pull Docker image node:18-alpine"));
        assert!(h.mock.created_configs().is_empty());
        assert_eq!(h.store.live_keys(), 0);
    }

    #[tokio::test]
    async fn test_backend_exhaustion_releases_frontend() {
        let h = harness_with((50000, 50009), (60000, 60000));
        h.manager.ports().acquire(PortRange::Backend).await.unwrap();

        let err = h
            .manager
            .create("u1", "p1", "demo", ProjectType::Node)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PortsExhausted { .. }));
        assert!(err.remediation().is_some());
        assert_eq!(h.store.live_keys(), 1);
        assert!(h.mock.created_configs().is_empty());
    }

    #[tokio::test]
    async fn test_engine_down_allocates_nothing() {
        let h = harness();
        *h.mock.ensure_network_result.lock().unwrap() =
            Err(ProviderError::ConnectionError("connection refused".into()));

        let err = h
            .manager
            .create("u1", "p1", "demo", ProjectType::React)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EngineUnavailable(_)));
        assert_eq!(h.store.live_keys(), 0);
    }

    #[tokio::test]
    async fn test_destroy_stops_removes_then_releases() {
        let h = harness();
        let record = h
            .manager
            .create("u1", "p1", "demo", ProjectType::Node)
            .await
            .unwrap();

        h.manager
            .destroy(&record.container_id, record.ports)
            .await
            .unwrap();

        let calls = h.mock.get_calls();
        let stop = calls
            .iter()
            .position(|c| matches!(c, MockCall::Stop { timeout: Some(10), .. }))
            .unwrap();
        let remove = calls
            .iter()
            .position(|c| {
                matches!(
                    c,
                    MockCall::Remove {
                        force: true,
                        volumes: true,
                        ..
                    }
                )
            })
            .unwrap();
        assert!(stop < remove);
        assert_eq!(h.store.live_keys(), 0);
    }

    #[tokio::test]
    async fn test_destroy_keeps_ports_when_remove_fails() {
        let h = harness();
        let record = h
            .manager
            .create("u1", "p1", "demo", ProjectType::Node)
            .await
            .unwrap();
        *h.mock.remove_result.lock().unwrap() =
            Err(ProviderError::RuntimeError("device busy".into()));

        assert!(h
            .manager
            .destroy(&record.container_id, record.ports)
            .await
            .is_err());
        assert_eq!(h.store.live_keys(), 2);
    }

    #[tokio::test]
    async fn test_destroy_tolerates_stopped_container() {
        let h = harness();
        *h.mock.stop_result.lock().unwrap() =
            Err(ProviderError::NotModified("already stopped".into()));

        h.manager
            .destroy(
                "mock_container_id",
                PortPair {
                    frontend: 50000,
                    backend: 60000,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_react_project_end_to_end() {
        let h = harness();
        h.mock.set_fake_container(FakeContainer::new(&["/app"]));

        let project = h
            .manager
            .create_project("u1", "demo", ProjectType::React)
            .await
            .unwrap();
        assert!(h.tmp.path().join("state").join("projects.json").exists());

        let out = h.manager.exec(&project.id, "pwd", false).await.unwrap();
        assert_eq!(out.output.trim(), "/app");
        assert_eq!(out.exit_code, 0);

        let out = h
            .manager
            .exec(&project.id, "cd frontend", false)
            .await
            .unwrap();
        assert_eq!(out.current_dir, "/app/frontend");
        assert_eq!(out.output, "");

        let out = h.manager.exec(&project.id, "pwd", false).await.unwrap();
        assert_eq!(out.output.trim(), "/app/frontend");

        let session = h.manager.session(&project.id).await.unwrap();
        assert_eq!(session.current_dir, "/app/frontend");
    }

    #[tokio::test]
    async fn test_delete_project_releases_everything() {
        let h = harness();
        h.mock.set_fake_container(FakeContainer::new(&["/app", "/app/src"]));
        let project = h
            .manager
            .create_project("u1", "demo", ProjectType::Node)
            .await
            .unwrap();
        h.manager.exec(&project.id, "cd src", false).await.unwrap();
        assert_eq!(h.manager.sessions().len(), 1);

        h.manager.delete_project(&project.id).await.unwrap();

        assert!(matches!(
            h.manager.get_project(&project.id).await,
            Err(CoreError::ProjectNotFound(_))
        ));
        assert!(h.manager.sessions().is_empty());
        assert_eq!(h.store.live_keys(), 0);
        assert!(h.manager.projects_for_user("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_start_update_status() {
        let h = harness();
        let project = h
            .manager
            .create_project("u1", "demo", ProjectType::Python)
            .await
            .unwrap();

        *h.mock.stop_result.lock().unwrap() =
            Err(ProviderError::NotModified("already stopped".into()));
        h.manager.stop(&project.id).await.unwrap();
        assert_eq!(
            h.manager.get_project(&project.id).await.unwrap().container.status,
            RecordStatus::Stopped
        );

        h.manager.start(&project.id).await.unwrap();
        assert_eq!(
            h.manager.get_project(&project.id).await.unwrap().container.status,
            RecordStatus::Running
        );

        h.manager.restart(&project.id).await.unwrap();
        assert!(h.mock.was_called(&MockCall::Restart {
            id: "mock_container_id".to_string()
        }));
    }

    #[tokio::test]
    async fn test_health_check_persists_status() {
        let h = harness();
        let project = h
            .manager
            .create_project("u1", "demo", ProjectType::Node)
            .await
            .unwrap();
        h.mock
            .set_inspect_status(devforge_provider::ContainerStatus::Exited);

        assert_eq!(
            h.manager.health_check(&project.id).await.unwrap(),
            RecordStatus::Stopped
        );
        let stored = h.manager.get_project(&project.id).await.unwrap();
        assert_eq!(stored.container.status, RecordStatus::Stopped);
        assert!(stored.container.last_health_check_at.is_some());

        let all = h.manager.health_check_all().await.unwrap();
        assert_eq!(all, vec![(project.id.clone(), RecordStatus::Stopped)]);
    }

    #[tokio::test]
    async fn test_health_check_all_records_inspect_failure() {
        let h = harness();
        let a = h
            .manager
            .create_project("u1", "a", ProjectType::Node)
            .await
            .unwrap();
        let b = h
            .manager
            .create_project("u2", "b", ProjectType::Node)
            .await
            .unwrap();
        *h.mock.inspect_result.lock().unwrap() =
            Err(ProviderError::RuntimeError("daemon hiccup".into()));

        let mut expected = vec![
            (a.id.clone(), RecordStatus::Error),
            (b.id.clone(), RecordStatus::Error),
        ];
        expected.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(h.manager.health_check_all().await.unwrap(), expected);

        let saved =
            crate::ProjectStore::load_from(&h.tmp.path().join("state").join("projects.json"))
                .unwrap();
        for id in [&a.id, &b.id] {
            let stored = saved.get(id).unwrap();
            assert_eq!(stored.container.status, RecordStatus::Error);
            assert!(stored.container.last_health_check_at.is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_all_persisted() {
        let h = harness();
        let manager = Arc::new(h.manager);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .create_project(&format!("u{i}"), "demo", ProjectType::Node)
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        let saved =
            crate::ProjectStore::load_from(&h.tmp.path().join("state").join("projects.json"))
                .unwrap();
        assert_eq!(saved.list().len(), 8);
        for id in &ids {
            assert!(saved.get(id).is_some(), "{id} missing from projects.json");
        }
    }
}
