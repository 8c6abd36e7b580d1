//! Shell Selection
//!
//! Maps the logical shell a caller asked for onto the command line that is
//! handed to the execution engine.
//!
//! | kind | Windows host | other hosts |
//! |---|---|---|
//! | `auto` | PowerShell wrapper | raw command via `/bin/sh` |
//! | `powershell` | PowerShell wrapper | PowerShell wrapper |
//! | `cmd` | `cmd.exe /c "..."` | `cmd.exe /c "..."` |
//! | `bash` | raw command via `/bin/bash` | raw command via `/bin/bash` |
//!
//! The PowerShell wrapper doubles embedded double quotes. The CMD wrapper does
//! not escape anything: the command is placed between the quotes verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interpreter used for `bash` requests
pub const BASH_PATH: &str = "/bin/bash";

/// Logical shell requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    #[default]
    Auto,
    Powershell,
    Cmd,
    Bash,
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellKind::Auto => "auto",
            ShellKind::Powershell => "powershell",
            ShellKind::Cmd => "cmd",
            ShellKind::Bash => "bash",
        };
        f.write_str(name)
    }
}

impl FromStr for ShellKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ShellKind::Auto),
            "powershell" => Ok(ShellKind::Powershell),
            "cmd" => Ok(ShellKind::Cmd),
            "bash" => Ok(ShellKind::Bash),
            other => Err(format!(
                "Unknown shell '{}'. Must be one of: auto, powershell, cmd, bash",
                other
            )),
        }
    }
}

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Unix,
}

impl HostPlatform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }

    /// Shells the platform normally offers, for display
    pub fn available_shells(&self) -> &'static [&'static str] {
        match self {
            HostPlatform::Windows => &["PowerShell", "CMD"],
            HostPlatform::Unix => &["Bash", "Shell"],
        }
    }
}

/// A resolved command line ready for the execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Full command line passed to the shell
    pub command_line: String,

    /// Interpreter to use instead of the host's default shell
    pub shell_override: Option<String>,

    /// Name used in error messages ("PowerShell", "CMD" or "shell")
    pub label: &'static str,
}

/// Resolve a shell choice into an invocation
pub struct ShellSelector;

impl ShellSelector {
    pub fn resolve(kind: ShellKind, platform: HostPlatform, raw_command: &str) -> Invocation {
        match (kind, platform) {
            (ShellKind::Powershell, _) => powershell(raw_command, "PowerShell"),
            (ShellKind::Auto, HostPlatform::Windows) => powershell(raw_command, "shell"),
            (ShellKind::Cmd, _) => Invocation {
                command_line: format!("cmd.exe /c \"{}\"", raw_command),
                shell_override: None,
                label: "CMD",
            },
            (ShellKind::Bash, _) => Invocation {
                command_line: raw_command.to_string(),
                shell_override: Some(BASH_PATH.to_string()),
                label: "shell",
            },
            (ShellKind::Auto, HostPlatform::Unix) => Invocation {
                command_line: raw_command.to_string(),
                shell_override: None,
                label: "shell",
            },
        }
    }
}

fn powershell(raw_command: &str, label: &'static str) -> Invocation {
    Invocation {
        command_line: format!(
            "powershell.exe -Command \"{}\"",
            raw_command.replace('"', "\"\"")
        ),
        shell_override: None,
        label,
    }
}
