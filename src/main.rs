// Commandgate - Main Entry Point
//
// Command-line front end for the policy-gated executor:
// - exec: validate and run a command
// - check: validate only
// - policy: show the active security policy
// - system-info: describe the host

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commandgate::config::Config;
use commandgate::gateway::{CommandRequest, CommandService};
use commandgate::policy::PolicyStore;
use commandgate::system_info::SystemInfo;
use commandgate::tools::ShellKind;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Commandgate: policy-gated command execution for agents
#[derive(Parser, Debug)]
#[command(name = "commandgate")]
#[command(version)]
#[command(about = "Run shell commands for agents under a security policy", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the application config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the security policy override file
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate and execute a command
    Exec {
        /// Shell to run the command with
        #[arg(long, default_value = "auto")]
        shell: ShellKind,

        /// Working directory (defaults to the policy's default path)
        #[arg(long)]
        cwd: Option<String>,

        /// Print the structured response as JSON
        #[arg(long)]
        json: bool,

        /// Command text; multiple words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Check a command against the policy without executing it
    Check {
        /// Working directory to check
        #[arg(long)]
        cwd: Option<String>,

        /// Command text; multiple words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show the active security policy
    Policy {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show platform, architecture and available shells
    SystemInfo {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config, args.verbose)?;

    let policy_path = args.policy.clone().unwrap_or_else(|| config.policy_path());
    debug!("Using policy file {:?}", policy_path);
    let store = PolicyStore::load(&policy_path);

    match args.command {
        Commands::Exec {
            shell,
            cwd,
            json,
            command,
        } => {
            let mut request = CommandRequest::new(command.join(" ")).with_shell(shell);
            if let Some(dir) = cwd {
                request = request.in_dir(dir);
            }

            let service = CommandService::with_engine(store.policy());
            let response = service.handle(request).await;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&response)
                        .context("Failed to serialize response")?
                );
            } else {
                println!("{}", response.render());
            }

            Ok(if response.is_denied() {
                ExitCode::from(2)
            } else if response.result().is_some_and(|r| r.is_success()) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Check { cwd, command } => {
            let mut request = CommandRequest::new(command.join(" "));
            if let Some(dir) = cwd {
                request = request.in_dir(dir);
            }

            let service = CommandService::with_engine(store.policy());
            match service.validate(&request) {
                Ok(()) => {
                    println!("Allowed");
                    Ok(ExitCode::SUCCESS)
                }
                Err(denial) => {
                    println!("Denied: {}", denial.reason);
                    Ok(ExitCode::from(2))
                }
            }
        }
        Commands::Policy { json } => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&store.to_json())
                        .context("Failed to serialize policy")?
                );
            } else {
                println!("{}", store.render());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::SystemInfo { json } => {
            let info = SystemInfo::collect();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&info).context("Failed to serialize system info")?
                );
            } else {
                println!("{}", info.render());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Install the tracing subscriber; logs go to stderr, results to stdout
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }

    info!("Commandgate v{} starting", env!("CARGO_PKG_VERSION"));
    Ok(())
}
