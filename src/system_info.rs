//! Host information report
//!
//! Lets an operator or agent see which platform commands will run on and
//! which shells to expect before sending anything.

use crate::tools::HostPlatform;
use serde::Serialize;
use sysinfo::System;

/// Snapshot of the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub platform: String,
    pub architecture: String,
    pub release: String,
    pub hostname: Option<String>,
    pub available_shells: Vec<String>,
    pub current_directory: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let platform = HostPlatform::current();
        Self {
            platform: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            release: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
            hostname: System::host_name(),
            available_shells: platform
                .available_shells()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            current_directory: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "System Information:\nPlatform: {}\nArchitecture: {}\nRelease: {}\nAvailable Shells: {}\nCurrent Working Directory: {}",
            self.platform,
            self.architecture,
            self.release,
            self.available_shells.join(", "),
            self.current_directory
        )
    }
}
