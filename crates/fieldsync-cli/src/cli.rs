use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Sync equipment inspection inventories between devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Root directory for attachments
    #[arg(long, global = true, value_name = "PATH")]
    pub storage_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export the whole inventory to a package file
    Export {
        /// Output path (defaults to a timestamped file in the current directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Do not embed photo files
        #[arg(long)]
        no_attachments: bool,
    },
    /// Import a package file into the local inventory
    Import {
        /// Package file
        path: PathBuf,
        /// Check dependencies and resolve conflicts instead of overwriting
        #[arg(long)]
        validated: bool,
        /// Output the merge report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what importing a package with validation would change
    MergePreview {
        /// Package file
        path: PathBuf,
        /// Output the merge report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Advertise and discover peers over TCP until interrupted
    Serve,
    /// Run one exchange with a single peer and exit
    Sync {
        /// Peer address, e.g. 192.168.1.20:47800
        #[arg(long, value_name = "ADDR")]
        peer: String,
        /// Give up after this many seconds
        #[arg(long, default_value = "120", value_name = "SECONDS")]
        timeout: u64,
    },
    /// Show record counts of the local inventory
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or initialize the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a config file, keeping values already present
    Init {
        /// Name advertised to peers
        #[arg(long, value_name = "NAME")]
        device_name: Option<String>,
        /// TCP listen address
        #[arg(long, value_name = "ADDR")]
        listen_addr: Option<String>,
        /// Known peer address (repeatable)
        #[arg(long = "peer", value_name = "ADDR")]
        peers: Vec<String>,
    },
}
