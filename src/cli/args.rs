use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minutehook")]
#[command(about = "Meeting webhook ingestion for Tencent Meeting and Lark", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the webhook server and queue workers (default)
    Serve,
    /// Print version information
    Version,
    /// Encrypt and sign an event the way the provider would, for testing
    Sign(SignCliArgs),
    /// Inspect and manage queued jobs
    Jobs(JobsCliArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignProvider {
    Tencent,
    Lark,
}

#[derive(ClapArgs, Debug)]
pub struct SignCliArgs {
    /// Plaintext event JSON file (reads stdin when omitted)
    pub file: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "tencent")]
    pub provider: SignProvider,
    /// Timestamp header (default: now)
    #[arg(long)]
    pub timestamp: Option<String>,
    /// Nonce header (default: random)
    #[arg(long)]
    pub nonce: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct JobsCliArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Show job counts by status
    Stats,
    /// List jobs in the dead-letter state
    Dead {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Move a dead job back to the queue
    Retry {
        /// Job ID
        id: i64,
    },
    /// Delete completed jobs older than the retention window
    Prune,
}
