//! Command Validation Module
//!
//! Decides whether a raw command string may run under a [`SecurityPolicy`].
//!
//! Checks run in a fixed order and the first failure is the one reported:
//!
//! 1. Length limit
//! 2. Blocklist (case-insensitive substring)
//! 3. Network tools, unless the policy allows them
//! 4. Allow-list patterns, when any are configured
//!
//! # Limitations
//!
//! The checks look at raw text. There is no tokenizing, so a blocked token also
//! matches inside unrelated words and arguments (`rm` inside `format`), while a
//! command that reaches the same program through an alias, variable expansion,
//! quoting tricks or an encoded payload is not caught.

use crate::policy::SecurityPolicy;
use serde::{Deserialize, Serialize};

/// Network tools denied unless `allow_network_commands` is set
pub const NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "ping", "nslookup", "telnet", "ssh", "ftp", "scp", "rsync",
];

/// Reasons a command is rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandValidationError {
    #[error("Command exceeds maximum length of {0} characters")]
    TooLong(usize),

    #[error("Command contains blocked term: '{0}'")]
    Blocked(String),

    #[error("Network command '{0}' is not allowed")]
    NetworkCommand(String),

    #[error("Command does not match any allowed pattern")]
    NoPatternMatched,
}

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub allowed: bool,

    /// Set only when the request is denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

impl From<Result<(), CommandValidationError>> for ValidationVerdict {
    fn from(result: Result<(), CommandValidationError>) -> Self {
        match result {
            Ok(()) => Self::allow(),
            Err(e) => Self::deny(e.to_string()),
        }
    }
}

/// Command validator bound to a policy
#[derive(Debug, Clone, Copy)]
pub struct CommandValidator<'a> {
    policy: &'a SecurityPolicy,
}

impl<'a> CommandValidator<'a> {
    pub fn new(policy: &'a SecurityPolicy) -> Self {
        Self { policy }
    }

    /// Check a command against the policy
    ///
    /// # Example
    ///
    /// ```
    /// use commandgate::policy::SecurityPolicy;
    /// use commandgate::tools::CommandValidator;
    ///
    /// let policy = SecurityPolicy::default();
    /// let verdict = CommandValidator::new(&policy).check("sudo rm -rf /");
    /// assert!(!verdict.allowed);
    /// ```
    pub fn check(&self, command: &str) -> ValidationVerdict {
        self.validate(command).into()
    }

    /// Same as [`CommandValidator::check`], returning the typed reason
    pub fn validate(&self, command: &str) -> Result<(), CommandValidationError> {
        self.check_length(command)?;

        let lowered = command.to_lowercase();
        self.check_blocklist(&lowered)?;
        self.check_network(&lowered)?;
        self.check_patterns(command)?;

        Ok(())
    }

    fn check_length(&self, command: &str) -> Result<(), CommandValidationError> {
        let max = self.policy.max_command_length.get();
        if command.chars().count() > max {
            return Err(CommandValidationError::TooLong(max));
        }
        Ok(())
    }

    fn check_blocklist(&self, lowered: &str) -> Result<(), CommandValidationError> {
        let hit = self
            .policy
            .blocked_commands
            .iter()
            .find(|token| lowered.contains(&token.to_lowercase()));

        match hit {
            Some(token) => Err(CommandValidationError::Blocked(token.clone())),
            None => Ok(()),
        }
    }

    fn check_network(&self, lowered: &str) -> Result<(), CommandValidationError> {
        if self.policy.allow_network_commands {
            return Ok(());
        }

        match NETWORK_COMMANDS.iter().find(|name| lowered.contains(*name)) {
            Some(name) => Err(CommandValidationError::NetworkCommand(name.to_string())),
            None => Ok(()),
        }
    }

    fn check_patterns(&self, command: &str) -> Result<(), CommandValidationError> {
        let patterns = &self.policy.allowed_command_patterns;
        if patterns.is_empty() || patterns.iter().any(|p| p.is_match(command)) {
            return Ok(());
        }
        Err(CommandValidationError::NoPatternMatched)
    }
}
