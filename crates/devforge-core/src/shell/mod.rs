//! Virtual shell over one-shot container execs
//!
//! Every exec starts a fresh process in the container, so there is no shell
//! whose working directory could persist. The session layer keeps the
//! directory itself: ordinary commands are prefixed with `cd <cwd> &&`, and a
//! `cd` is sent as `cd <target> && pwd` so the container both validates the
//! target and reports the canonical path in one round trip. Anything chained
//! after the `cd` (`cd src && ls`) runs in a second exec from the new cwd.

mod policy;
mod session;

pub use policy::*;
pub use session::*;

use crate::bootstrap::WORKSPACE_DIR;
use crate::{CoreError, Result};
use devforge_provider::{ContainerId, ContainerProvider, ExecConfig, ExecResult};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Result of one virtual shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    pub output: String,
    pub exit_code: i64,
    pub current_dir: String,
}

/// How the remainder of a compound command depends on what ran before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `;` or `|`
    Then,
}

impl Chain {
    fn runs_after(self, succeeded: bool) -> bool {
        match self {
            Self::And => succeeded,
            Self::Or => !succeeded,
            Self::Then => true,
        }
    }
}

/// A user command split into directory changes and everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand<'a> {
    /// `cd` with its (possibly absent) target and whatever was chained after it
    ChangeDir {
        target: Option<&'a str>,
        then: Option<(Chain, &'a str)>,
    },
    Run(&'a str),
}

impl<'a> ShellCommand<'a> {
    pub fn parse(command: &'a str) -> Self {
        let trimmed = command.trim();
        let args = if trimmed == "cd" {
            ""
        } else if let Some(args) = trimmed.strip_prefix("cd ") {
            args
        } else {
            return Self::Run(command);
        };

        let (target, then) = split_first_operator(args);
        let target = Some(target.trim()).filter(|t| !t.is_empty());
        let then = then
            .map(|(chain, rest)| (chain, rest.trim()))
            .filter(|(_, rest)| !rest.is_empty());
        Self::ChangeDir { target, then }
    }
}

/// Split `s` at the first unquoted `&&`, `||`, `;` or `|`
fn split_first_operator(s: &str) -> (&str, Option<(Chain, &str)>) {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
        } else {
            let next = bytes.get(i + 1).copied();
            let found = match (b, next) {
                (b'\'', _) | (b'"', _) => {
                    quote = Some(b);
                    None
                }
                (b'\\', _) => {
                    i += 1;
                    None
                }
                (b'&', Some(b'&')) => Some((Chain::And, 2)),
                (b'|', Some(b'|')) => Some((Chain::Or, 2)),
                (b'|', _) | (b';', _) => Some((Chain::Then, 1)),
                _ => None,
            };
            if let Some((chain, len)) = found {
                return (&s[..i], Some((chain, &s[i + len..])));
            }
        }
        i += 1;
    }
    (s, None)
}

/// A target written as one quoted word loses its quotes; anything else is kept verbatim
fn unquote_target(target: &str) -> Cow<'_, str> {
    match shell_words::split(target) {
        Ok(mut words) if words.len() == 1 => Cow::Owned(words.remove(0)),
        _ => Cow::Borrowed(target),
    }
}

/// Resolve a `cd` target against `cwd` without touching the filesystem.
///
/// The result is only a candidate; the container has the final say.
pub fn resolve_cd_target(cwd: &str, target: Option<&str>, entry_dir: &str) -> String {
    match target {
        None | Some("") => entry_dir.to_string(),
        Some(t) if t.starts_with('/') => t.to_string(),
        Some("..") => {
            let mut parts: Vec<&str> = cwd.split('/').filter(|p| !p.is_empty()).collect();
            parts.pop();
            format!("/{}", parts.join("/"))
        }
        Some(".") => cwd.to_string(),
        Some(t) if cwd == "/" => format!("/{}", t),
        Some(t) => format!("{}/{}", cwd.trim_end_matches('/'), t),
    }
}

/// Strip control bytes left in exec output, keeping tabs and newlines
pub fn sanitize_output(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c == '\t' || *c == '\n' || !c.is_control())
        .collect()
}

/// Last non-empty line of `output`, trimmed
fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).rev().find(|l| !l.is_empty())
}

/// Runs user commands against project containers with per-project cwd
pub struct VirtualShell {
    provider: Arc<dyn ContainerProvider>,
    sessions: Arc<SessionManager>,
    policy: CommandPolicy,
}

impl VirtualShell {
    pub fn new(provider: Arc<dyn ContainerProvider>, sessions: Arc<SessionManager>) -> Self {
        Self {
            provider,
            sessions,
            policy: CommandPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `command` for (`user_id`, `project_id`) inside `container`.
    ///
    /// A non-zero exit is reported in the returned [`ShellOutput`]; only
    /// failures to reach the container are errors.
    pub async fn exec(
        &self,
        user_id: &str,
        project_id: &str,
        container: &ContainerId,
        command: &str,
        background: bool,
    ) -> Result<ShellOutput> {
        if command.trim().is_empty() {
            return Err(CoreError::InvalidState("command is required".to_string()));
        }

        let key = SessionKey::new(user_id, project_id);
        let mut session = self.sessions.lock(&key).await;

        let (output, exit_code) = match ShellCommand::parse(command) {
            ShellCommand::ChangeDir { target, then } => {
                let (mut output, mut exit_code) =
                    self.change_dir(&mut session, &key, container, target).await?;
                if let Some((chain, rest)) = then.filter(|(c, _)| c.runs_after(exit_code == 0)) {
                    let script = self.script_for(session.current_dir(), project_id, rest, background);
                    let result = self.run(container, script).await?;
                    output.push_str(&result.output);
                    exit_code = result.exit_code;
                    tracing::debug!("Session {}: ran {:?} {} after cd", key, chain, rest);
                }
                session.touch();
                (output, exit_code)
            }
            ShellCommand::Run(cmd) => {
                let script = self.script_for(session.current_dir(), project_id, cmd, background);
                session.touch();
                let result = self.run(container, script).await?;
                (result.output, result.exit_code)
            }
        };

        let output = if exit_code != 0 && output.trim().is_empty() {
            format!("Command exited with code {}", exit_code)
        } else {
            output
        };

        Ok(ShellOutput {
            output,
            exit_code,
            current_dir: session.current_dir().to_string(),
        })
    }

    /// Send `cd <target> && pwd` and adopt the reported directory on success.
    ///
    /// Output is cleared once the cwd moved; a failed `cd` keeps the old cwd
    /// and returns the container's error text.
    async fn change_dir(
        &self,
        session: &mut ShellSession,
        key: &SessionKey,
        container: &ContainerId,
        target: Option<&str>,
    ) -> Result<(String, i64)> {
        let target = target.map(unquote_target);
        let candidate = resolve_cd_target(
            session.current_dir(),
            target.as_deref(),
            self.sessions.entry_dir(),
        );
        let script = format!("cd {} && pwd", shell_words::quote(&candidate));
        let result = self.run(container, script).await?;

        let mut output = result.output;
        if result.exit_code == 0 {
            let cleaned = sanitize_output(&output);
            if let Some(dir) = last_line(&cleaned).filter(|d| d.starts_with('/')) {
                tracing::debug!("Session {}: cd {} -> {}", key, candidate, dir);
                session.set_current_dir(dir);
                output.clear();
            }
        }
        Ok((output, result.exit_code))
    }

    /// Script running `cmd` from `cwd`, detached when it looks like a dev server
    fn script_for(&self, cwd: &str, project_id: &str, cmd: &str, background: bool) -> String {
        let cwd = shell_words::quote(cwd);
        match self.policy.classify(cmd, background) {
            CommandBehavior::Foreground => format!("cd {} && {}", cwd, cmd),
            CommandBehavior::Background => {
                let log = format!("/tmp/{}-dev.log", project_id);
                format!(
                    "cd {cwd} && nohup {cmd} > {log} 2>&1 & echo \"Dev server started in background. Check logs at {log}\" && echo \"PID: $!\""
                )
            }
        }
    }

    async fn run(&self, container: &ContainerId, script: String) -> Result<ExecResult> {
        tracing::debug!("exec in {}: {}", container.short(), script);
        let config = ExecConfig {
            working_dir: Some(WORKSPACE_DIR.to_string()),
            ..ExecConfig::shell(script)
        };
        self.provider
            .exec(container, &config)
            .await
            .map_err(|e| CoreError::Transport {
                container: container.short().to_string(),
                reason: e.to_string(),
            })
    }
}
