//! Policy Store
//!
//! Loads the security policy once at startup. The override file is optional;
//! its top-level keys replace the matching defaults wholesale (arrays are not
//! merged). A malformed file is logged and the defaults are used instead.

use super::{CommandPattern, SecurityPolicy};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors raised while reading a policy override file
///
/// These never abort startup: the store falls back to defaults.
#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("Failed to read policy file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy file {path:?} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse policy file {path:?} as TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level keys recognized in a policy override file
///
/// Numeric limits are read as signed integers so that zero or negative values
/// can be detected and replaced by the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverride {
    pub allowed_partitions: Option<Vec<String>>,
    pub default_path: Option<String>,
    pub blocked_commands: Option<Vec<String>>,
    pub allowed_command_patterns: Option<Vec<CommandPattern>>,
    pub max_command_length: Option<i64>,
    pub timeout_seconds: Option<i64>,
    pub allow_network_commands: Option<bool>,
}

impl PolicyOverride {
    /// Parse override content; `.toml` files are TOML, everything else JSON
    pub fn parse(path: &Path, content: &str) -> Result<Self, PolicyLoadError> {
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(content).map_err(|source| PolicyLoadError::Toml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_json::from_str(content).map_err(|source| PolicyLoadError::Json {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Replace each default field the override names
    pub fn apply(self, mut policy: SecurityPolicy) -> SecurityPolicy {
        if let Some(partitions) = self.allowed_partitions {
            policy.allowed_partitions = partitions;
        }
        if let Some(path) = self.default_path {
            policy.default_path = path;
        }
        if let Some(blocked) = self.blocked_commands {
            // An empty token would match, and so deny, every command
            policy.blocked_commands = blocked
                .into_iter()
                .filter(|token| {
                    let blank = token.is_empty();
                    if blank {
                        warn!("Ignoring empty entry in blockedCommands");
                    }
                    !blank
                })
                .collect();
        }
        if let Some(patterns) = self.allowed_command_patterns {
            policy.allowed_command_patterns = patterns;
        }
        if let Some(len) = self.max_command_length {
            match usize::try_from(len).ok().and_then(NonZeroUsize::new) {
                Some(len) => policy.max_command_length = len,
                None => warn!(
                    value = len,
                    "Ignoring non-positive maxCommandLength in policy override"
                ),
            }
        }
        if let Some(secs) = self.timeout_seconds {
            match u64::try_from(secs).ok().and_then(NonZeroU64::new) {
                Some(secs) => policy.timeout_seconds = secs,
                None => warn!(
                    value = secs,
                    "Ignoring non-positive timeoutSeconds in policy override"
                ),
            }
        }
        if let Some(allow) = self.allow_network_commands {
            policy.allow_network_commands = allow;
        }
        policy
    }
}

/// Where the active policy came from
#[derive(Debug, Clone, PartialEq)]
pub enum PolicySource {
    /// Built-in defaults only
    Defaults,

    /// Defaults merged with an override file
    File(PathBuf),
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySource::Defaults => f.write_str("defaults"),
            PolicySource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Holder of the policy resolved at startup
#[derive(Debug, Clone)]
pub struct PolicyStore {
    policy: Arc<SecurityPolicy>,
    source: PolicySource,
    loaded_at: DateTime<Utc>,
    load_error: Option<String>,
}

impl PolicyStore {
    /// Load defaults merged with the override at `path`
    ///
    /// A missing file is not an error. A file that cannot be read or parsed is
    /// logged and recorded in [`PolicyStore::load_error`]; defaults apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        match read_override(path) {
            Ok(Some(overrides)) => {
                info!("Loaded security policy override from {:?}", path);
                Self::with_source(
                    overrides.apply(SecurityPolicy::default()),
                    PolicySource::File(path.to_path_buf()),
                    None,
                )
            }
            Ok(None) => {
                debug!("Policy file not found at {:?}, using defaults", path);
                Self::with_source(SecurityPolicy::default(), PolicySource::Defaults, None)
            }
            Err(e) => {
                warn!("{}; falling back to default security policy", e);
                Self::with_source(
                    SecurityPolicy::default(),
                    PolicySource::Defaults,
                    Some(e.to_string()),
                )
            }
        }
    }

    /// Wrap an already-built policy
    pub fn from_policy(policy: SecurityPolicy) -> Self {
        Self::with_source(policy, PolicySource::Defaults, None)
    }

    fn with_source(
        policy: SecurityPolicy,
        source: PolicySource,
        load_error: Option<String>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            source,
            loaded_at: Utc::now(),
            load_error,
        }
    }

    /// Shared handle to the active policy
    pub fn policy(&self) -> Arc<SecurityPolicy> {
        Arc::clone(&self.policy)
    }

    pub fn source(&self) -> &PolicySource {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Error that forced a fallback to defaults, if any
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Operator-facing text listing the active policy
    pub fn render(&self) -> String {
        let mut text = format!(
            "Security Policy:\nSource: {}\nLoaded At: {}\n",
            self.source,
            self.loaded_at.to_rfc3339()
        );
        if let Some(err) = &self.load_error {
            text.push_str(&format!("Load Error: {}\n", err));
        }
        text.push_str(&self.policy.to_string());
        text
    }

    /// Structured form of [`PolicyStore::render`]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "source": self.source.to_string(),
            "loadedAt": self.loaded_at.to_rfc3339(),
            "loadError": self.load_error,
            "policy": &*self.policy,
        })
    }
}

/// Read and parse the override at `path`; `Ok(None)` when there is no file
pub fn read_override(path: &Path) -> Result<Option<PolicyOverride>, PolicyLoadError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| PolicyLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    PolicyOverride::parse(path, &content).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn json_file(content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load(dir.path().join("missing.json"));
        assert_eq!(*store.policy(), SecurityPolicy::default());
        assert_eq!(store.source(), &PolicySource::Defaults);
        assert!(store.load_error().is_none());
    }

    #[test]
    fn test_override_replaces_fields_wholesale() {
        let file = json_file(
            r#"{
                "blockedCommands": ["format"],
                "allowedPartitions": ["C:\\safe"],
                "timeoutSeconds": 5
            }"#,
        );
        let store = PolicyStore::load(file.path());
        let policy = store.policy();

        assert_eq!(policy.blocked_commands, vec!["format".to_string()]);
        assert_eq!(policy.allowed_partitions, vec!["C:\\safe".to_string()]);
        assert_eq!(policy.timeout_seconds.get(), 5);
        // Untouched keys keep defaults
        assert_eq!(policy.max_command_length.get(), 1000);
        assert!(!policy.allow_network_commands);
        assert_eq!(store.source(), &PolicySource::File(file.path().to_path_buf()));
    }

    #[test]
    fn test_override_empty_array_clears_default() {
        let file = json_file(r#"{ "blockedCommands": [] }"#);
        let store = PolicyStore::load(file.path());
        assert!(store.policy().blocked_commands.is_empty());
    }

    #[test]
    fn test_empty_blocked_token_skipped() {
        let file = json_file(r#"{ "blockedCommands": ["", "format", ""] }"#);
        let policy = PolicyStore::load(file.path()).policy();
        assert_eq!(policy.blocked_commands, vec!["format".to_string()]);
    }

    #[test]
    fn test_non_positive_limits_fall_back() {
        let file = json_file(r#"{ "maxCommandLength": 0, "timeoutSeconds": -4 }"#);
        let policy = PolicyStore::load(file.path()).policy();
        assert_eq!(policy.max_command_length.get(), 1000);
        assert_eq!(policy.timeout_seconds.get(), 30);
    }

    #[test]
    fn test_malformed_json_falls_back_to_defaults() {
        let file = json_file(r#"{ "timeoutSeconds": "#);
        let store = PolicyStore::load(file.path());
        assert_eq!(*store.policy(), SecurityPolicy::default());
        assert_eq!(store.source(), &PolicySource::Defaults);
        assert!(store.load_error().unwrap().contains("JSON"));
    }

    #[test]
    fn test_invalid_pattern_falls_back_to_defaults() {
        let file = json_file(r#"{ "allowedCommandPatterns": ["^git", "([a-z"] }"#);
        let store = PolicyStore::load(file.path());
        assert!(store.policy().allowed_command_patterns.is_empty());
        assert!(store.load_error().unwrap().contains("invalid command pattern"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let file = json_file(r#"{ "allowNetworkCommands": true, "somethingElse": 1 }"#);
        let store = PolicyStore::load(file.path());
        assert!(store.policy().allow_network_commands);
        assert!(store.load_error().is_none());
    }

    #[test]
    fn test_toml_override() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
allowedCommandPatterns = ["^echo ", "^dir$"]
timeoutSeconds = 1
allowNetworkCommands = true
"#
        )
        .unwrap();

        let policy = PolicyStore::load(file.path()).policy();
        assert_eq!(policy.allowed_command_patterns.len(), 2);
        assert_eq!(policy.allowed_command_patterns[1].as_str(), "^dir$");
        assert_eq!(policy.timeout_seconds.get(), 1);
        assert!(policy.allow_network_commands);
    }

    #[test]
    fn test_read_override_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_override(&dir.path().join("nope.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_render_lists_fields() {
        let store = PolicyStore::from_policy(SecurityPolicy::default());
        let text = store.render();
        assert!(text.starts_with("Security Policy:"));
        assert!(text.contains("Source: defaults"));
        assert!(text.contains("Max Command Length: 1000"));
        assert!(text.contains("Allow Network Commands: false"));
    }

    #[test]
    fn test_to_json() {
        let store = PolicyStore::from_policy(SecurityPolicy::allow_all());
        let value = store.to_json();
        assert_eq!(value["source"], "defaults");
        assert_eq!(value["policy"]["allowNetworkCommands"], true);
        assert!(value["loadError"].is_null());
    }
}
