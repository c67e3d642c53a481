//! Which commands get detached from the request

/// How a user command is run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBehavior {
    /// Run to completion and return its output
    Foreground,
    /// Start under `nohup` and return immediately with the PID
    Background,
}

/// A substring that, when present in a command, selects a behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub tag: &'static str,
    pub pattern: String,
    pub behavior: CommandBehavior,
}

/// Ordered rule table; the first matching rule wins
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for CommandPolicy {
    /// Long-running dev server launches
    fn default() -> Self {
        Self::empty()
            .with_rule("vite-dev", "npm run dev", CommandBehavior::Background)
            .with_rule("npm-start", "npm start", CommandBehavior::Background)
            .with_rule("node-script", "node ", CommandBehavior::Background)
    }
}

impl CommandPolicy {
    /// A policy that runs everything in the foreground
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(
        mut self,
        tag: &'static str,
        pattern: impl Into<String>,
        behavior: CommandBehavior,
    ) -> Self {
        self.rules.push(PolicyRule {
            tag,
            pattern: pattern.into(),
            behavior,
        });
        self
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// The rule matching `command`, if any
    pub fn matching_rule(&self, command: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| command.contains(r.pattern.as_str()))
    }

    /// Decide how to run `command`. `force_background` always wins.
    pub fn classify(&self, command: &str, force_background: bool) -> CommandBehavior {
        if force_background {
            return CommandBehavior::Background;
        }
        self.matching_rule(command)
            .map(|r| r.behavior)
            .unwrap_or(CommandBehavior::Foreground)
    }
}
