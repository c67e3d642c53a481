//! Test support utilities for devforge-core
//!
//! Provides MockProvider and FakeContainer for unit testing the lifecycle
//! manager and the virtual shell without a real Docker daemon.

use async_trait::async_trait;
use devforge_provider::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Ping,
    EnsureNetwork { name: String },
    ImageExists { image: String },
    Pull { image: String },
    Create { image: String, name: Option<String> },
    Start { id: String },
    Stop { id: String, timeout: Option<u32> },
    Restart { id: String },
    Remove { id: String, force: bool, volumes: bool },
    Exec { id: String, cmd: Vec<String> },
    Inspect { id: String },
    Logs { id: String },
    Stats { id: String },
    List { label: String },
}

/// Answers exec calls in place of a container
pub type ExecHandler = Box<dyn Fn(&ExecConfig) -> Result<ExecResult> + Send + Sync>;

/// Configurable mock container provider for testing
pub struct MockProvider {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Every config passed to create
    pub created: Arc<Mutex<Vec<CreateContainerConfig>>>,
    /// Every config passed to exec
    pub execs: Arc<Mutex<Vec<ExecConfig>>>,
    pub ping_result: Arc<Mutex<Result<()>>>,
    pub ensure_network_result: Arc<Mutex<Result<bool>>>,
    pub image_exists_result: Arc<Mutex<Result<bool>>>,
    pub pull_result: Arc<Mutex<Result<ImageId>>>,
    pub create_result: Arc<Mutex<Result<ContainerId>>>,
    pub start_result: Arc<Mutex<Result<()>>>,
    pub stop_result: Arc<Mutex<Result<()>>>,
    pub restart_result: Arc<Mutex<Result<()>>>,
    pub remove_result: Arc<Mutex<Result<()>>>,
    pub inspect_result: Arc<Mutex<Result<ContainerDetails>>>,
    pub logs_result: Arc<Mutex<Result<Vec<String>>>>,
    pub stats_result: Arc<Mutex<Result<ContainerStats>>>,
    pub list_result: Arc<Mutex<Result<Vec<ContainerInfo>>>>,
    /// Exit code and output for exec calls without a handler
    pub exec_exit_code: Arc<Mutex<i64>>,
    pub exec_output: Arc<Mutex<String>>,
    /// Error for exec calls (if Some, exec returns this error)
    pub exec_error: Arc<Mutex<Option<ProviderError>>>,
    /// Scripted exec responses, takes precedence over the fixed result
    pub exec_handler: Arc<Mutex<Option<ExecHandler>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider with default success results
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            execs: Arc::new(Mutex::new(Vec::new())),
            ping_result: Arc::new(Mutex::new(Ok(()))),
            ensure_network_result: Arc::new(Mutex::new(Ok(false))),
            image_exists_result: Arc::new(Mutex::new(Ok(true))),
            pull_result: Arc::new(Mutex::new(Ok(ImageId::new("sha256:mock_pulled_id")))),
            create_result: Arc::new(Mutex::new(Ok(ContainerId::new("mock_container_id")))),
            start_result: Arc::new(Mutex::new(Ok(()))),
            stop_result: Arc::new(Mutex::new(Ok(()))),
            restart_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            inspect_result: Arc::new(Mutex::new(Ok(mock_container_details(
                "mock_container_id",
                ContainerStatus::Running,
            )))),
            logs_result: Arc::new(Mutex::new(Ok(Vec::new()))),
            stats_result: Arc::new(Mutex::new(Ok(ContainerStats::from_sample(
                &StatsSample::default(),
            )))),
            list_result: Arc::new(Mutex::new(Ok(Vec::new()))),
            exec_exit_code: Arc::new(Mutex::new(0)),
            exec_output: Arc::new(Mutex::new(String::new())),
            exec_error: Arc::new(Mutex::new(None)),
            exec_handler: Arc::new(Mutex::new(None)),
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Scripts passed to `sh -c`, in call order
    pub fn exec_scripts(&self) -> Vec<String> {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.cmd.last().cloned().unwrap_or_default())
            .collect()
    }

    pub fn exec_configs(&self) -> Vec<ExecConfig> {
        self.execs.lock().unwrap().clone()
    }

    pub fn created_configs(&self) -> Vec<CreateContainerConfig> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_exec_result(&self, exit_code: i64, output: &str) {
        *self.exec_exit_code.lock().unwrap() = exit_code;
        *self.exec_output.lock().unwrap() = output.to_string();
    }

    pub fn set_exec_error(&self, err: ProviderError) {
        *self.exec_error.lock().unwrap() = Some(err);
    }

    pub fn set_exec_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecConfig) -> Result<ExecResult> + Send + Sync + 'static,
    {
        *self.exec_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Answer execs from a simulated directory tree
    pub fn set_fake_container(&self, fake: FakeContainer) {
        self.set_exec_handler(move |config| {
            let script = config.cmd.last().map(String::as_str).unwrap_or_default();
            Ok(fake.run(script))
        });
    }

    pub fn set_inspect_status(&self, status: ContainerStatus) {
        *self.inspect_result.lock().unwrap() =
            Ok(mock_container_details("mock_container_id", status));
    }
}

/// Helper to clone a Result<T> from an Arc<Mutex<Result<T>>>
fn clone_result<T: Clone>(r: &Arc<Mutex<Result<T>>>) -> Result<T> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
pub fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::NotFound(s) => ProviderError::NotFound(s.clone()),
        ProviderError::ImageNotFound(s) => ProviderError::ImageNotFound(s.clone()),
        ProviderError::Conflict(s) => ProviderError::Conflict(s.clone()),
        ProviderError::NotModified(s) => ProviderError::NotModified(s.clone()),
        ProviderError::ExecError(s) => ProviderError::ExecError(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::Timeout => ProviderError::Timeout,
    }
}

/// Create a mock ContainerDetails
pub fn mock_container_details(id: &str, status: ContainerStatus) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: "mock_container".to_string(),
        image: "node:18-alpine".to_string(),
        image_id: "sha256:mock_image_id".to_string(),
        status,
        running: status == ContainerStatus::Running,
        created: 0,
        started_at: None,
        exit_code: None,
        labels: HashMap::new(),
        ports: Vec::new(),
    }
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        clone_result(&self.ping_result)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            version: "mock".to_string(),
            api_version: "1.0".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<bool> {
        self.record(MockCall::EnsureNetwork {
            name: name.to_string(),
        });
        clone_result(&self.ensure_network_result)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(MockCall::ImageExists {
            image: image.to_string(),
        });
        clone_result(&self.image_exists_result)
    }

    async fn pull(
        &self,
        image: &str,
        _progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId> {
        self.record(MockCall::Pull {
            image: image.to_string(),
        });
        clone_result(&self.pull_result)
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
            name: config.name.clone(),
        });
        self.created.lock().unwrap().push(config.clone());
        clone_result(&self.create_result)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        clone_result(&self.start_result)
    }

    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()> {
        self.record(MockCall::Stop {
            id: id.0.clone(),
            timeout,
        });
        clone_result(&self.stop_result)
    }

    async fn restart(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Restart { id: id.0.clone() });
        clone_result(&self.restart_result)
    }

    async fn remove(&self, id: &ContainerId, force: bool, volumes: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
            volumes,
        });
        clone_result(&self.remove_result)
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        self.record(MockCall::Exec {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
        });
        self.execs.lock().unwrap().push(config.clone());

        if let Some(e) = self.exec_error.lock().unwrap().as_ref() {
            return Err(clone_provider_error(e));
        }
        if let Some(handler) = self.exec_handler.lock().unwrap().as_ref() {
            return handler(config);
        }
        Ok(ExecResult {
            exit_code: *self.exec_exit_code.lock().unwrap(),
            output: self.exec_output.lock().unwrap().clone(),
        })
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        clone_result(&self.inspect_result)
    }

    async fn logs(&self, id: &ContainerId, _config: &LogConfig) -> Result<Vec<String>> {
        self.record(MockCall::Logs { id: id.0.clone() });
        clone_result(&self.logs_result)
    }

    async fn stats(&self, id: &ContainerId) -> Result<ContainerStats> {
        self.record(MockCall::Stats { id: id.0.clone() });
        clone_result(&self.stats_result)
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>> {
        self.record(MockCall::List {
            label: label.to_string(),
        });
        clone_result(&self.list_result)
    }
}

/// Simulated container filesystem that understands the scripts the virtual
/// shell sends: `cd <dir> && <rest>` where rest is `pwd`, `ls`, `mkdir`,
/// `echo`, `false` or anything else (succeeds silently).
#[derive(Clone, Default)]
pub struct FakeContainer {
    dirs: Arc<Mutex<BTreeSet<String>>>,
}

impl FakeContainer {
    pub fn new(dirs: &[&str]) -> Self {
        let mut set: BTreeSet<String> = dirs.iter().map(|d| normalize(d)).collect();
        set.insert("/".to_string());
        Self {
            dirs: Arc::new(Mutex::new(set)),
        }
    }

    pub fn has_dir(&self, dir: &str) -> bool {
        self.dirs.lock().unwrap().contains(&normalize(dir))
    }

    /// Execute one `sh -c` script
    pub fn run(&self, script: &str) -> ExecResult {
        let Some((head, rest)) = script.split_once(" && ") else {
            return ok("");
        };
        let words = shell_words::split(head).unwrap_or_default();
        if words.first().map(String::as_str) != Some("cd") || words.len() != 2 {
            return ok("");
        }

        let dir = normalize(&words[1]);
        if !self.has_dir(&dir) {
            return ExecResult {
                exit_code: 2,
                output: format!(
                    "sh: cd: line 1: can't cd to {}: No such file or directory\n",
                    words[1]
                ),
            };
        }
        self.run_in(&dir, rest.trim())
    }

    fn run_in(&self, cwd: &str, cmd: &str) -> ExecResult {
        let words = shell_words::split(cmd).unwrap_or_default();
        match words.first().map(String::as_str) {
            Some("pwd") => ok(&format!("{}\n", cwd)),
            Some("false") => ExecResult {
                exit_code: 1,
                output: String::new(),
            },
            Some("echo") => ok(&format!("{}\n", words[1..].join(" "))),
            Some("ls") => {
                let prefix = if cwd == "/" { "/".to_string() } else { format!("{}/", cwd) };
                let listing: Vec<String> = self
                    .dirs
                    .lock()
                    .unwrap()
                    .iter()
                    .filter_map(|d| d.strip_prefix(&prefix))
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(str::to_string)
                    .collect();
                ok(&listing.iter().map(|l| format!("{}\n", l)).collect::<String>())
            }
            Some("mkdir") => {
                let mut dirs = self.dirs.lock().unwrap();
                for arg in words[1..].iter().filter(|a| !a.starts_with('-')) {
                    dirs.insert(join(cwd, arg));
                }
                ok("")
            }
            // `npm create vite@latest <dir>` scaffolds a directory
            Some("npm") if words.get(1).map(String::as_str) == Some("create") => {
                if let Some(name) = words.get(3) {
                    self.dirs.lock().unwrap().insert(join(cwd, name));
                }
                ok("")
            }
            _ => ok(""),
        }
    }
}

fn ok(output: &str) -> ExecResult {
    ExecResult {
        exit_code: 0,
        output: output.to_string(),
    }
}

fn join(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", cwd, path))
    }
}

/// Collapse `.` and `..` segments of an absolute path
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}
