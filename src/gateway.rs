//! Command Gateway
//!
//! Runs one request through the full pipeline:
//!
//! ```text
//! Received -> command check -> path check -> shell resolution -> execution
//!                   |               |
//!                   +--- Denied ----+   (no process is spawned)
//! ```
//!
//! Every request ends in a [`CommandResponse`], which renders to the plain
//! text handed back to the caller.

use crate::policy::SecurityPolicy;
use crate::tools::{
    CommandRunner, CommandValidator, ExecutionEngine, ExecutionFailure, ExecutionOutcome,
    ExecutionResult, ExecutionTimeout, HostPlatform, PathValidator, ShellKind, ShellSelector,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Prefix that marks a policy denial in rendered responses
pub const DENIAL_PREFIX: &str = "Security policy violation: ";

/// A request to run one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(default, rename = "shell")]
    pub shell_kind: ShellKind,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: None,
            shell_kind: ShellKind::Auto,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_shell(mut self, kind: ShellKind) -> Self {
        self.shell_kind = kind;
        self
    }
}

/// Which check rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialStage {
    Command,
    WorkingDirectory,
}

/// A policy rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub stage: DenialStage,
    pub reason: String,
}

/// Final state of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResponse {
    /// Rejected by the policy before anything ran
    Denied(Denial),

    /// Handed to the execution engine
    Executed {
        label: &'static str,
        result: ExecutionResult,
    },
}

impl CommandResponse {
    pub fn is_denied(&self) -> bool {
        matches!(self, CommandResponse::Denied(_))
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            CommandResponse::Executed { result, .. } => Some(result),
            CommandResponse::Denied(_) => None,
        }
    }

    /// Plain-text form for the caller
    pub fn render(&self) -> String {
        match self {
            CommandResponse::Denied(denial) => format!("{}{}", DENIAL_PREFIX, denial.reason),
            CommandResponse::Executed { label, result } => render_execution(label, result),
        }
    }
}

fn render_execution(label: &str, result: &ExecutionResult) -> String {
    let sections = output_sections(result);

    match (result.outcome, &result.failure) {
        (ExecutionOutcome::Completed, failure) => {
            let mut text = if sections.is_empty() {
                "Command executed successfully with no output".to_string()
            } else {
                sections
            };
            match failure {
                Some(ExecutionFailure::NonZeroExit(code)) => {
                    text.push_str(&format!("\nExit code: {}", code))
                }
                Some(other) => text.push_str(&format!("\n{}", other)),
                None => {}
            }
            text
        }
        (_, failure) => {
            let description = failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            let mut text = format!("Error executing {} command: {}", label, description);
            if !sections.is_empty() {
                text.push('\n');
                text.push_str(&sections);
            }
            text
        }
    }
}

fn output_sections(result: &ExecutionResult) -> String {
    let mut output = String::new();
    if !result.stdout.is_empty() {
        output.push_str(&format!("Output:\n{}", result.stdout));
    }
    if !result.stderr.is_empty() {
        output.push_str(&format!("\nErrors:\n{}", result.stderr));
    }
    output
}

/// Validates and executes requests under one policy
#[derive(Clone)]
pub struct CommandService {
    policy: Arc<SecurityPolicy>,
    platform: HostPlatform,
    runner: Arc<dyn CommandRunner>,
}

impl CommandService {
    pub fn new(
        policy: Arc<SecurityPolicy>,
        platform: HostPlatform,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            policy,
            platform,
            runner,
        }
    }

    /// Service on the current host backed by a real [`ExecutionEngine`]
    pub fn with_engine(policy: Arc<SecurityPolicy>) -> Self {
        Self::new(policy, HostPlatform::current(), Arc::new(ExecutionEngine::new()))
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Run the policy checks without executing anything
    pub fn validate(&self, request: &CommandRequest) -> Result<(), Denial> {
        let verdict = CommandValidator::new(&self.policy).check(&request.command);
        if !verdict.allowed {
            return Err(Denial {
                stage: DenialStage::Command,
                reason: verdict.reason.unwrap_or_default(),
            });
        }

        let verdict = PathValidator::new(&self.policy).check(request.working_directory.as_deref());
        if !verdict.allowed {
            return Err(Denial {
                stage: DenialStage::WorkingDirectory,
                reason: verdict.reason.unwrap_or_default(),
            });
        }

        Ok(())
    }

    /// Validate and, if allowed, execute a request
    pub async fn handle(&self, request: CommandRequest) -> CommandResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("command", %request_id, shell = %request.shell_kind);

        async move {
            if let Err(denial) = self.validate(&request) {
                warn!(stage = ?denial.stage, "Request denied: {}", denial.reason);
                return CommandResponse::Denied(denial);
            }

            let invocation = ShellSelector::resolve(request.shell_kind, self.platform, &request.command);
            debug!(command_line = %invocation.command_line, "Resolved shell invocation");

            let working_dir = PathValidator::new(&self.policy)
                .effective_path(request.working_directory.as_deref())
                .to_string();
            let timeout = ExecutionTimeout::from_policy(&self.policy);

            let result = self
                .runner
                .run(&invocation, Path::new(&working_dir), timeout)
                .await;

            CommandResponse::Executed {
                label: invocation.label,
                result,
            }
        }
        .instrument(span)
        .await
    }
}
