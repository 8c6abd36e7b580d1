//! Tool Execution Subsystem
//!
//! Policy checks and bounded process execution for shell commands.
//!
//! # Architecture
//!
//! The module is organized into:
//! - `validator.rs`: command checks (length, blocklist, network tools, allow-list)
//! - `path.rs`: working directory partition checks
//! - `shell.rs`: shell kind to command line resolution
//! - `executor.rs`: subprocess execution with timeout handling
//! - `timeout.rs`: timeout management
//!
//! # Example
//!
//! ```no_run
//! use commandgate::policy::SecurityPolicy;
//! use commandgate::tools::{
//!     CommandValidator, ExecutionEngine, ExecutionTimeout, HostPlatform, ShellKind, ShellSelector,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = SecurityPolicy::default();
//!     assert!(CommandValidator::new(&policy).check("echo hello").allowed);
//!
//!     let invocation = ShellSelector::resolve(ShellKind::Auto, HostPlatform::current(), "echo hello");
//!     let result = ExecutionEngine::new()
//!         .execute(&invocation, Path::new("."), ExecutionTimeout::from_policy(&policy))
//!         .await;
//!     println!("{}", result.summary());
//! }
//! ```

mod executor;
mod path;
mod shell;
mod timeout;
mod validator;

pub use executor::{
    CommandRunner, ExecutionEngine, ExecutionFailure, ExecutionOutcome, ExecutionResult,
};
pub use path::{normalize_path, PathValidator};
pub use shell::{HostPlatform, Invocation, ShellKind, ShellSelector, BASH_PATH};
pub use timeout::{ExecutionTimedOut, ExecutionTimeout};
pub use validator::{CommandValidationError, CommandValidator, ValidationVerdict, NETWORK_COMMANDS};
