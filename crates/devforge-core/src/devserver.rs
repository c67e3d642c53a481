//! Frontend dev server supervision for previews

use crate::bootstrap::{FRONTEND_LAUNCH, WORKSPACE_DIR};
use crate::{CoreError, Project, Result};
use devforge_provider::{ContainerId, ContainerProvider, ExecConfig};
use std::sync::Arc;
use std::time::Duration;

const RUNNING_CHECK: &str = r#"ps aux | grep "[n]pm run dev" | grep frontend"#;
const KILL: &str = r#"pkill -f "npm run dev.*frontend" || true"#;

/// Checks and restarts the Vite dev server inside project containers
pub struct DevServerSupervisor {
    provider: Arc<dyn ContainerProvider>,
    /// Pause after killing the old server
    kill_settle: Duration,
    /// Pause after launching before verifying
    launch_settle: Duration,
}

impl DevServerSupervisor {
    pub fn new(provider: Arc<dyn ContainerProvider>) -> Self {
        Self {
            provider,
            kill_settle: Duration::from_secs(1),
            launch_settle: Duration::from_secs(2),
        }
    }

    pub fn with_settle_times(mut self, kill: Duration, launch: Duration) -> Self {
        self.kill_settle = kill;
        self.launch_settle = launch;
        self
    }

    fn check_supported(project: &Project) -> Result<ContainerId> {
        if !project.project_type.has_frontend() {
            return Err(CoreError::PreviewUnsupported(
                project.project_type.to_string(),
            ));
        }
        Ok(ContainerId::new(project.container.container_id.clone()))
    }

    async fn run(&self, id: &ContainerId, script: &str) -> Result<String> {
        let config = ExecConfig {
            working_dir: Some(WORKSPACE_DIR.to_string()),
            ..ExecConfig::shell(script)
        };
        let result = self.provider.exec(id, &config).await?;
        Ok(result.output)
    }

    async fn container_running(&self, id: &ContainerId) -> Result<bool> {
        Ok(self.provider.inspect(id).await?.running)
    }

    /// Whether the container is up and a frontend `npm run dev` is alive
    pub async fn is_running(&self, project: &Project) -> Result<bool> {
        let id = Self::check_supported(project)?;
        if !self.container_running(&id).await? {
            return Ok(false);
        }
        let output = self.run(&id, RUNNING_CHECK).await?;
        Ok(!output.trim().is_empty())
    }

    /// Kill any frontend dev server and start a fresh one
    pub async fn restart(&self, project: &Project) -> Result<String> {
        let id = Self::check_supported(project)?;
        if !self.container_running(&id).await? {
            return Err(CoreError::InvalidState(
                "Container is not running. Please restart the container first.".to_string(),
            ));
        }

        if let Err(e) = self.run(&id, KILL).await {
            tracing::debug!("No dev server to kill in {} ({})", id.short(), e);
        }
        tokio::time::sleep(self.kill_settle).await;

        let launch_output = self.run(&id, FRONTEND_LAUNCH).await?;
        tokio::time::sleep(self.launch_settle).await;

        let running = self.run(&id, RUNNING_CHECK).await?;
        if running.trim().is_empty() {
            tracing::warn!("Dev server for {} did not start", project.id);
            return Err(CoreError::DevServerFailed(launch_output));
        }

        tracing::info!("Dev server for {} started", project.id);
        Ok(Self::preview_url(project))
    }

    /// Start the dev server only if it is not already running.
    /// Returns true if a start was needed.
    pub async fn ensure_running(&self, project: &Project) -> Result<bool> {
        if self.is_running(project).await? {
            return Ok(false);
        }
        self.restart(project).await?;
        Ok(true)
    }

    /// Poll until the dev server process shows up or `window` elapses
    pub async fn wait_until_ready(
        &self,
        project: &Project,
        window: Duration,
        interval: Duration,
    ) -> Result<()> {
        let poll = async {
            loop {
                if self.is_running(project).await? {
                    return Ok::<(), CoreError>(());
                }
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(window, poll).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::DevServerTimeout(window.as_secs())),
        }
    }

    /// Browser URL of the project's frontend
    pub fn preview_url(project: &Project) -> String {
        format!("http://localhost:{}", project.container.ports.frontend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockProvider;
    use crate::{ContainerRecord, PortPair, ProjectType, RecordStatus};
    use chrono::Utc;
    use devforge_provider::{ContainerStatus, ExecResult};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn project(project_type: ProjectType) -> Project {
        let now = Utc::now();
        Project {
            id: "p1".to_string(),
            user_id: "u1".to_string(),
            name: "demo".to_string(),
            project_type,
            root_path: PathBuf::from("/docker-projects/u1/p1"),
            container: ContainerRecord {
                container_id: "mock_container_id".to_string(),
                container_name: "devforge-u1-p1".to_string(),
                image: "node:18-alpine".to_string(),
                image_id: "sha256:x".to_string(),
                status: RecordStatus::Running,
                ports: PortPair {
                    frontend: 50007,
                    backend: 60007,
                },
                memory_bytes: 0,
                nano_cpus: 0,
                created_at: now,
                last_health_check_at: None,
            },
            created_at: now,
            updated_at: now,
            last_accessed: now,
        }
    }

    fn supervisor(mock: Arc<MockProvider>) -> DevServerSupervisor {
        DevServerSupervisor::new(mock).with_settle_times(Duration::ZERO, Duration::ZERO)
    }

    /// Exec handler with a dev server that comes up when launched
    fn simulated_server(mock: &MockProvider, starts: bool) -> Arc<AtomicBool> {
        let up = Arc::new(AtomicBool::new(false));
        let state = up.clone();
        mock.set_exec_handler(move |config| {
            let script = config.cmd.last().cloned().unwrap_or_default();
            let output = if script == RUNNING_CHECK {
                if state.load(Ordering::SeqCst) {
                    "root 42 npm run dev /app/frontend\n".to_string()
                } else {
                    String::new()
                }
            } else if script == KILL {
                state.store(false, Ordering::SeqCst);
                String::new()
            } else if script == FRONTEND_LAUNCH {
                state.store(starts, Ordering::SeqCst);
                if starts { String::new() } else { "vite: not found\n".to_string() }
            } else {
                String::new()
            };
            Ok(ExecResult {
                exit_code: if script == RUNNING_CHECK && output.is_empty() { 1 } else { 0 },
                output,
            })
        });
        up
    }

    #[tokio::test]
    async fn test_unsupported_types() {
        let sup = supervisor(Arc::new(MockProvider::new()));
        for ty in [ProjectType::Node, ProjectType::Python] {
            let err = sup.is_running(&project(ty)).await.unwrap_err();
            assert!(matches!(err, CoreError::PreviewUnsupported(_)));
        }
    }

    #[tokio::test]
    async fn test_is_running_requires_container() {
        let mock = Arc::new(MockProvider::new());
        mock.set_inspect_status(ContainerStatus::Exited);
        let sup = supervisor(mock.clone());

        assert!(!sup.is_running(&project(ProjectType::React)).await.unwrap());
        assert!(mock.exec_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_restart_kills_then_launches() {
        let mock = Arc::new(MockProvider::new());
        let up = simulated_server(&mock, true);
        let sup = supervisor(mock.clone());

        let url = sup.restart(&project(ProjectType::Mern)).await.unwrap();
        assert_eq!(url, "http://localhost:50007");
        assert_eq!(mock.exec_scripts(), vec![KILL, FRONTEND_LAUNCH, RUNNING_CHECK]);
        assert!(up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_restart_reports_launch_output() {
        let mock = Arc::new(MockProvider::new());
        simulated_server(&mock, false);
        let sup = supervisor(mock);

        let err = sup.restart(&project(ProjectType::React)).await.unwrap_err();
        match err {
            CoreError::DevServerFailed(output) => assert!(output.contains("vite: not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_restart_needs_running_container() {
        let mock = Arc::new(MockProvider::new());
        mock.set_inspect_status(ContainerStatus::Exited);
        let sup = supervisor(mock);
        assert!(matches!(
            sup.restart(&project(ProjectType::React)).await,
            Err(CoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_running_is_idempotent() {
        let mock = Arc::new(MockProvider::new());
        simulated_server(&mock, true);
        let sup = supervisor(mock.clone());
        let p = project(ProjectType::React);

        assert!(sup.ensure_running(&p).await.unwrap());
        let calls = mock.exec_scripts().len();
        assert!(!sup.ensure_running(&p).await.unwrap());
        assert_eq!(mock.exec_scripts().len(), calls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_times_out() {
        let mock = Arc::new(MockProvider::new());
        simulated_server(&mock, false);
        let sup = supervisor(mock);

        let err = sup
            .wait_until_ready(
                &project(ProjectType::React),
                Duration::from_secs(30),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DevServerTimeout(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_sees_late_start() {
        let mock = Arc::new(MockProvider::new());
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        mock.set_exec_handler(move |_| {
            // Comes up on the third check
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(ExecResult {
                exit_code: 0,
                output: if n >= 2 { "npm run dev frontend".into() } else { String::new() },
            })
        });
        let sup = supervisor(mock);

        sup.wait_until_ready(
            &project(ProjectType::React),
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }
}
