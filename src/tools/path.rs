//! Working Directory Validation
//!
//! Scopes the directories a command may run in to the policy's partitions.
//! Paths are compared as normalized text: lowercase, `/` as the only separator,
//! no repeated or trailing separators, `.` and `..` folded away. Relative
//! paths are anchored at the process working directory first, since that is
//! where the engine will run them. Nothing else is resolved against the
//! filesystem, so symlinks are not followed.

use super::validator::ValidationVerdict;
use crate::policy::SecurityPolicy;
use tracing::warn;

/// Working directory validator bound to a policy
#[derive(Debug, Clone, Copy)]
pub struct PathValidator<'a> {
    policy: &'a SecurityPolicy,
}

impl<'a> PathValidator<'a> {
    pub fn new(policy: &'a SecurityPolicy) -> Self {
        Self { policy }
    }

    /// The directory a request will run in
    pub fn effective_path<'b>(&self, working_directory: Option<&'b str>) -> &'b str
    where
        'a: 'b,
    {
        working_directory.unwrap_or(&self.policy.default_path)
    }

    /// Check a working directory; `None` means the policy's default path
    pub fn check(&self, working_directory: Option<&str>) -> ValidationVerdict {
        let partitions = &self.policy.allowed_partitions;
        if partitions.is_empty() {
            return ValidationVerdict::allow();
        }

        let path = self.effective_path(working_directory);
        let normalized = anchor_path(path);
        // Blank entries never match; they must not widen the partition to everything
        let inside = partitions
            .iter()
            .filter(|partition| !partition.trim().is_empty())
            .any(|partition| normalized.starts_with(&anchor_path(partition)));

        if inside {
            ValidationVerdict::allow()
        } else {
            ValidationVerdict::deny(format!(
                "Working directory '{}' is outside the allowed partitions: {}",
                path,
                partitions.join(", ")
            ))
        }
    }
}

/// Normalize a path for case-insensitive prefix comparison
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/").to_lowercase();
    let rooted = unified.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // Never climb above a drive letter or the root
                let is_drive = segments.len() == 1 && segments[0].ends_with(':');
                match segments.last() {
                    Some(&"..") | None if !rooted => segments.push(".."),
                    Some(_) if !is_drive => {
                        segments.pop();
                    }
                    _ => {}
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Normalize a path, anchoring relative text at the process working directory
fn anchor_path(path: &str) -> String {
    if is_absolute_text(path) {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&format!("{}/{}", cwd.display(), path)),
        Err(e) => {
            warn!("Cannot resolve relative path '{}': {}", path, e);
            normalize_path(path)
        }
    }
}

/// Rooted (`/x`, `\\x`) or drive-qualified (`C:`) on either platform
fn is_absolute_text(path: &str) -> bool {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some('/' | '\\'), _) => true,
        (Some(letter), Some(':')) => letter.is_ascii_alphabetic(),
        _ => false,
    }
}
