//! Commandgate Library
//!
//! Policy-gated execution of PowerShell, CMD and shell commands on behalf of
//! an agent: a security policy loaded once at startup, validators for commands
//! and working directories, shell resolution and time-bounded execution.

pub mod config;
pub mod gateway;
pub mod policy;
pub mod system_info;
pub mod tools;

pub use gateway::{CommandRequest, CommandResponse, CommandService};
pub use policy::{PolicyStore, SecurityPolicy};
