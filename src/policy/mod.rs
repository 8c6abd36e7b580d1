//! Security Policy
//!
//! The policy decides which commands and working directories a request may use.
//! It is built once at startup (defaults merged with an optional override file,
//! see [`store`]) and then shared read-only between all requests.
//!
//! # Defaults
//!
//! - No partition restriction, no allow-list
//! - A small blocklist of destructive commands
//! - 1000 character command limit, 30 second timeout
//! - Network tools denied

pub mod store;

pub use store::{PolicyLoadError, PolicyOverride, PolicySource, PolicyStore};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::{NonZeroU64, NonZeroUsize};

/// Default maximum command length in characters
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 1000;

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Blocked command tokens applied when no override replaces them
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "rm", "del", "rmdir", "format", "shutdown", "reboot", "sudo", "mkfs", "diskpart", "dd if=",
];

/// A case-insensitive allow-list pattern
///
/// Serialized as its source text. Deserializing compiles the pattern, so a
/// policy file with a broken expression fails to parse as a whole.
#[derive(Debug, Clone)]
pub struct CommandPattern(Regex);

impl CommandPattern {
    /// Compile a pattern with case-insensitive matching
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Self)
    }

    /// Whether the pattern matches anywhere in `command`
    pub fn is_match(&self, command: &str) -> bool {
        self.0.is_match(command)
    }

    /// The pattern's source text
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for CommandPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Display for CommandPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        CommandPattern::new(&source).map_err(|e| {
            serde::de::Error::custom(format!("invalid command pattern '{}': {}", source, e))
        })
    }
}

/// The active security policy
///
/// Empty `allowed_partitions` and empty `allowed_command_patterns` mean
/// "unrestricted" for the respective check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Path prefixes a working directory must start with
    pub allowed_partitions: Vec<String>,

    /// Working directory used when a request names none
    pub default_path: String,

    /// Substring tokens that deny a command, checked in order
    pub blocked_commands: Vec<String>,

    /// Expressions of which a command must match at least one
    pub allowed_command_patterns: Vec<CommandPattern>,

    /// Maximum command length in characters
    pub max_command_length: NonZeroUsize,

    /// Wall-clock bound for a single execution
    pub timeout_seconds: NonZeroU64,

    /// Whether known network tools may run
    pub allow_network_commands: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_partitions: Vec::new(),
            default_path: current_dir_string(),
            blocked_commands: DEFAULT_BLOCKED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_command_patterns: Vec::new(),
            max_command_length: NonZeroUsize::new(DEFAULT_MAX_COMMAND_LENGTH)
                .unwrap_or(NonZeroUsize::MIN),
            timeout_seconds: NonZeroU64::new(DEFAULT_TIMEOUT_SECS).unwrap_or(NonZeroU64::MIN),
            allow_network_commands: false,
        }
    }
}

impl SecurityPolicy {
    /// A policy that lets every command run, in any directory, for up to an hour
    ///
    /// This is the behavior of running without policy enforcement.
    pub fn allow_all() -> Self {
        Self {
            allowed_partitions: Vec::new(),
            blocked_commands: Vec::new(),
            allowed_command_patterns: Vec::new(),
            max_command_length: NonZeroUsize::MAX,
            timeout_seconds: NonZeroU64::new(3600).unwrap_or(NonZeroU64::MAX),
            allow_network_commands: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Allowed Partitions: {}",
            join_or(&self.allowed_partitions, "(unrestricted)")
        )?;
        writeln!(f, "Default Path: {}", self.default_path)?;
        writeln!(
            f,
            "Blocked Commands: {}",
            join_or(&self.blocked_commands, "(none)")
        )?;
        let patterns: Vec<&str> = self
            .allowed_command_patterns
            .iter()
            .map(CommandPattern::as_str)
            .collect();
        writeln!(f, "Allowed Command Patterns: {}", join_or(&patterns, "(any)"))?;
        writeln!(f, "Max Command Length: {}", self.max_command_length)?;
        writeln!(f, "Timeout Seconds: {}", self.timeout_seconds)?;
        write!(f, "Allow Network Commands: {}", self.allow_network_commands)
    }
}

fn join_or<S: AsRef<str>>(items: &[S], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn current_dir_string() -> String {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = SecurityPolicy::default();
        assert!(policy.allowed_partitions.is_empty());
        assert!(policy.allowed_command_patterns.is_empty());
        assert_eq!(policy.max_command_length.get(), 1000);
        assert_eq!(policy.timeout_seconds.get(), 30);
        assert!(!policy.allow_network_commands);
        assert!(policy.blocked_commands.contains(&"sudo".to_string()));
        assert!(!policy.default_path.is_empty());
    }

    #[test]
    fn test_allow_all_policy() {
        let policy = SecurityPolicy::allow_all();
        assert!(policy.blocked_commands.is_empty());
        assert!(policy.allow_network_commands);
        assert_eq!(policy.max_command_length, NonZeroUsize::MAX);
    }

    #[test]
    fn test_command_pattern_case_insensitive() {
        let pattern = CommandPattern::new("^git status").unwrap();
        assert!(pattern.is_match("GIT STATUS"));
        assert!(pattern.is_match("git status --short"));
        assert!(!pattern.is_match("echo git status"));
    }

    #[test]
    fn test_command_pattern_deserialize_invalid() {
        let result: Result<CommandPattern, _> = serde_json::from_str(r#""(unclosed""#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid command pattern"));
    }

    #[test]
    fn test_policy_serializes_camel_case() {
        let mut policy = SecurityPolicy::default();
        policy.allowed_command_patterns = vec![CommandPattern::new("^ls").unwrap()];
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["maxCommandLength"], 1000);
        assert_eq!(value["timeoutSeconds"], 30);
        assert_eq!(value["allowedCommandPatterns"][0], "^ls");
        assert_eq!(value["allowNetworkCommands"], false);
    }

    #[test]
    fn test_policy_display() {
        let text = SecurityPolicy::default().to_string();
        assert!(text.contains("Allowed Partitions: (unrestricted)"));
        assert!(text.contains("Blocked Commands: rm, del"));
        assert!(text.contains("Timeout Seconds: 30"));
    }
}
