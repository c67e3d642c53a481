//! Container manager - coordinates project containers, ports and shells

mod lifecycle;

pub use lifecycle::*;

use crate::{
    connect_store, CoreError, DevServerSupervisor, PortRegistry, Project, ProjectStore,
    RecordStatus, Result, SessionInfo, SessionManager, ShellOutput, VirtualShell,
};
use chrono::Utc;
use devforge_config::ForgeConfig;
use devforge_provider::{
    ContainerId, ContainerInfo, ContainerProvider, ContainerStats, ContainerStatus, LogConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Label every managed container carries
pub const MANAGED_LABEL: &str = "app=devforge";

/// Main container manager
pub struct ContainerManager {
    provider: Arc<dyn ContainerProvider>,
    ports: Arc<PortRegistry>,
    shell: VirtualShell,
    devserver: DevServerSupervisor,
    projects: Arc<RwLock<ProjectStore>>,
    /// Where `projects` is persisted
    store_path: PathBuf,
    /// Held from snapshot to rename so files land in snapshot order
    save_lock: Mutex<()>,
    config: ForgeConfig,
}

impl ContainerManager {
    /// Connect to the engine and reservation store described by `config`
    pub async fn new(config: ForgeConfig) -> Result<Self> {
        let provider: Arc<dyn ContainerProvider> =
            Arc::from(devforge_provider::create_provider(&config.docker).await?);
        let store = connect_store(&config.store).await?;
        let ports = PortRegistry::new(store, &config.ports)?;
        let store_path = ProjectStore::store_path()?;
        let projects = ProjectStore::load_from(&store_path)?;

        Ok(Self::from_parts(provider, ports, config, projects, store_path))
    }

    fn from_parts(
        provider: Arc<dyn ContainerProvider>,
        ports: PortRegistry,
        config: ForgeConfig,
        projects: ProjectStore,
        store_path: PathBuf,
    ) -> Self {
        let sessions = Arc::new(SessionManager::from_config(&config.session));
        Self {
            shell: VirtualShell::new(provider.clone(), sessions),
            devserver: DevServerSupervisor::new(provider.clone()),
            provider,
            ports: Arc::new(ports),
            projects: Arc::new(RwLock::new(projects)),
            store_path,
            save_lock: Mutex::new(()),
            config,
        }
    }

    /// Create a manager for testing with injectable dependencies
    #[cfg(any(test, feature = "test-support"))]
    pub fn new_for_testing(
        provider: Arc<dyn ContainerProvider>,
        ports: PortRegistry,
        config: ForgeConfig,
        store_path: PathBuf,
    ) -> Self {
        let mut manager =
            Self::from_parts(provider, ports, config, ProjectStore::new(), store_path);
        manager.devserver = DevServerSupervisor::new(manager.provider.clone())
            .with_settle_times(std::time::Duration::ZERO, std::time::Duration::ZERO);
        manager
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.shell.sessions()
    }

    pub fn shell(&self) -> &VirtualShell {
        &self.shell
    }

    /// Check that the container engine answers
    pub async fn verify_connection(&self) -> Result<()> {
        self.provider.ping().await?;
        Ok(())
    }

    /// Get a project by ID
    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()))
    }

    /// All projects owned by `user_id`
    pub async fn projects_for_user(&self, user_id: &str) -> Vec<Project> {
        self.projects
            .read()
            .await
            .find_by_owner(user_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> =
            self.projects.read().await.list().into_iter().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    /// Write the project store to disk
    async fn save_projects(&self) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        let snapshot = self.projects.read().await.clone();
        snapshot.save_to(&self.store_path)
    }

    /// Apply `f` to a stored project and persist the result
    async fn update_project<F>(&self, project_id: &str, f: F) -> Result<Project>
    where
        F: FnOnce(&mut Project),
    {
        let updated = {
            let mut store = self.projects.write().await;
            let mut project = store
                .get(project_id)
                .cloned()
                .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()))?;
            f(&mut project);
            store.upsert(project.clone());
            project
        };
        self.save_projects().await?;
        Ok(updated)
    }

    /// Run a command in the project's virtual shell
    pub async fn exec(
        &self,
        project_id: &str,
        command: &str,
        background: bool,
    ) -> Result<ShellOutput> {
        let project = self.get_project(project_id).await?;
        let id = ContainerId::new(project.container.container_id.clone());
        let output = self
            .shell
            .exec(&project.user_id, &project.id, &id, command, background)
            .await?;

        self.projects.write().await.touch(project_id);
        if let Err(e) = self.save_projects().await {
            tracing::warn!("Failed to record access to {}: {}", project_id, e);
        }
        Ok(output)
    }

    /// Shell session state for a project
    pub async fn session(&self, project_id: &str) -> Result<SessionInfo> {
        let project = self.get_project(project_id).await?;
        Ok(self
            .sessions()
            .session(&project.user_id, &project.id)
            .await)
    }

    /// Current container status of a project, derived from inspect
    pub async fn status(&self, project_id: &str) -> Result<RecordStatus> {
        let project = self.get_project(project_id).await?;
        self.container_status(&project.container.container_id).await
    }

    async fn container_status(&self, container_id: &str) -> Result<RecordStatus> {
        match self.provider.inspect(&ContainerId::new(container_id)).await {
            Ok(details) if details.running => Ok(RecordStatus::Running),
            Ok(details) => Ok(match details.status {
                ContainerStatus::Created
                | ContainerStatus::Exited
                | ContainerStatus::Paused
                | ContainerStatus::Restarting => RecordStatus::Stopped,
                _ => RecordStatus::Error,
            }),
            Err(e) if e.is_not_found() => Ok(RecordStatus::Error),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the container is running. Any failure counts as unhealthy.
    pub async fn is_healthy(&self, container_id: &str) -> bool {
        match self.provider.inspect(&ContainerId::new(container_id)).await {
            Ok(details) => details.running,
            Err(e) => {
                tracing::debug!("Health inspect of {} failed: {}", container_id, e);
                false
            }
        }
    }

    /// Refresh the stored status and health-check time of a project
    pub async fn health_check(&self, project_id: &str) -> Result<RecordStatus> {
        let status = self.status(project_id).await?;
        self.update_project(project_id, |p| {
            p.container.status = status;
            p.container.last_health_check_at = Some(Utc::now());
        })
        .await?;
        Ok(status)
    }

    /// Health-check every stored project concurrently.
    ///
    /// A project whose container cannot be inspected is recorded as `Error`.
    pub async fn health_check_all(&self) -> Result<Vec<(String, RecordStatus)>> {
        let ids: Vec<String> = self.projects.read().await.projects.keys().cloned().collect();
        let statuses = futures::future::join_all(ids.iter().map(|id| self.status(id))).await;

        let now = Utc::now();
        let mut results = Vec::with_capacity(ids.len());
        {
            let mut store = self.projects.write().await;
            for (id, status) in ids.into_iter().zip(statuses) {
                let status = status.unwrap_or_else(|e| {
                    tracing::warn!("Health check of {} failed: {}", id, e);
                    RecordStatus::Error
                });
                if let Some(project) = store.get_mut(&id) {
                    project.container.status = status;
                    project.container.last_health_check_at = Some(now);
                }
                results.push((id, status));
            }
        }
        self.save_projects().await?;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    /// Last `tail` lines of the container's output
    pub async fn logs(&self, project_id: &str, tail: Option<u64>) -> Result<Vec<String>> {
        let project = self.get_project(project_id).await?;
        let config = LogConfig {
            tail,
            ..LogConfig::default()
        };
        Ok(self
            .provider
            .logs(&ContainerId::new(project.container.container_id), &config)
            .await?)
    }

    /// One resource usage snapshot
    pub async fn stats(&self, project_id: &str) -> Result<ContainerStats> {
        let project = self.get_project(project_id).await?;
        Ok(self
            .provider
            .stats(&ContainerId::new(project.container.container_id))
            .await?)
    }

    /// Containers created by devforge, including ones missing from the store
    pub async fn list_managed(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self.provider.list(MANAGED_LABEL).await?)
    }

    /// Whether the project's frontend dev server is alive
    pub async fn preview_status(&self, project_id: &str) -> Result<bool> {
        let project = self.get_project(project_id).await?;
        self.devserver.is_running(&project).await
    }

    /// Restart the frontend dev server and return the preview URL
    pub async fn restart_preview(&self, project_id: &str) -> Result<String> {
        let project = self.get_project(project_id).await?;
        self.devserver.restart(&project).await
    }

    /// Make sure the dev server runs, wait for it, and return the preview URL
    pub async fn open_preview(&self, project_id: &str) -> Result<String> {
        let project = self.get_project(project_id).await?;
        self.devserver.ensure_running(&project).await?;
        self.devserver
            .wait_until_ready(
                &project,
                self.config.preview.ready_timeout(),
                self.config.preview.poll_interval(),
            )
            .await?;
        Ok(DevServerSupervisor::preview_url(&project))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::MockProvider;
    use crate::MemoryStore;
    use devforge_provider::ProviderError;

    pub(crate) struct Harness {
        pub manager: ContainerManager,
        pub mock: Arc<MockProvider>,
        pub store: Arc<MemoryStore>,
        pub tmp: tempfile::TempDir,
    }

    pub(crate) fn harness_with(frontend: (u16, u16), backend: (u16, u16)) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStore::new());
        let ports = PortRegistry::with_bounds(store.clone(), frontend, backend);

        let mut config = ForgeConfig::default();
        config.container.projects_root = tmp.path().join("projects").display().to_string();

        let manager = ContainerManager::new_for_testing(
            mock.clone(),
            ports,
            config,
            tmp.path().join("state").join("projects.json"),
        );
        Harness {
            manager,
            mock,
            store,
            tmp,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with((50000, 50009), (60000, 60009))
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let h = harness();
        assert!(matches!(
            h.manager.status("nope").await,
            Err(CoreError::ProjectNotFound(_))
        ));
        assert!(matches!(
            h.manager.exec("nope", "ls", false).await,
            Err(CoreError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let h = harness();
        assert_eq!(
            h.manager.container_status("mock_container_id").await.unwrap(),
            RecordStatus::Running
        );

        h.mock.set_inspect_status(ContainerStatus::Exited);
        assert_eq!(
            h.manager.container_status("mock_container_id").await.unwrap(),
            RecordStatus::Stopped
        );

        h.mock.set_inspect_status(ContainerStatus::Dead);
        assert_eq!(
            h.manager.container_status("mock_container_id").await.unwrap(),
            RecordStatus::Error
        );

        *h.mock.inspect_result.lock().unwrap() = Err(ProviderError::NotFound("gone".into()));
        assert_eq!(
            h.manager.container_status("mock_container_id").await.unwrap(),
            RecordStatus::Error
        );
    }

    #[tokio::test]
    async fn test_is_healthy() {
        let h = harness();
        assert!(h.manager.is_healthy("mock_container_id").await);
        *h.mock.inspect_result.lock().unwrap() =
            Err(ProviderError::ConnectionError("refused".into()));
        assert!(!h.manager.is_healthy("mock_container_id").await);
    }

    #[tokio::test]
    async fn test_verify_connection_maps_engine_down() {
        let h = harness();
        h.manager.verify_connection().await.unwrap();

        *h.mock.ping_result.lock().unwrap() =
            Err(ProviderError::ConnectionError("refused".into()));
        assert!(matches!(
            h.manager.verify_connection().await,
            Err(CoreError::EngineUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_list_managed_uses_label() {
        let h = harness();
        h.manager.list_managed().await.unwrap();
        assert!(h.mock.was_called(&crate::test_support::MockCall::List {
            label: "app=devforge".to_string()
        }));
    }
}
