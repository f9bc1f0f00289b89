use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Supervise named long-running commands per workspace")]
pub struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Path to config file (replaces the global config file)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Shared state root; each workspace gets its own namespace below it
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Bounded wait for a stopped process to exit, in milliseconds
    #[arg(long, global = true)]
    pub stop_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a command and track it under a code
    Run {
        /// Code naming the command slot (e.g. "web", "worker")
        code: String,

        /// Return as soon as the process is started
        #[arg(long)]
        detach: bool,

        /// Wait for the child to open its debug socket and print its path
        #[arg(long)]
        debug: bool,

        /// Extra environment variable to strip from the child (repeatable)
        #[arg(long = "forbid-env", value_name = "NAME")]
        forbid_env: Vec<String>,

        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Stop the command tracked under a code
    Stop { code: String },
    /// Stop every running command concurrently
    StopAll,
    /// List codes whose process is alive
    List,
    /// Show pid and termination reason for a code
    Status { code: String },
    /// Reset termination reasons
    ClearReason {
        /// Code to clear
        #[arg(required_unless_present = "all")]
        code: Option<String>,

        /// Clear every code's reason
        #[arg(long, conflicts_with = "code")]
        all: bool,
    },
    /// Inspect and clean the debug socket directory
    Sockets {
        #[command(subcommand)]
        action: SocketCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SocketCommands {
    /// List socket entries
    List,
    /// Delete entries whose owning process is dead
    Reclaim,
    /// Find the entry for a session label
    Find { label: String },
    /// Wait for the entry of a session label to appear
    Wait {
        label: String,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Poll interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_debug_flag_before_command() {
        let cli = Cli::parse_from(["warden", "run", "web", "--debug", "--detach", "node", "--inspect"]);
        match cli.command {
            Commands::Run {
                code,
                detach,
                debug,
                command,
                ..
            } => {
                assert_eq!(code, "web");
                assert!(detach);
                assert!(debug);
                assert_eq!(command, vec!["node", "--inspect"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_without_debug_flag() {
        let cli = Cli::parse_from(["warden", "run", "web", "sleep", "1"]);
        assert!(matches!(cli.command, Commands::Run { debug: false, .. }));
    }
}
