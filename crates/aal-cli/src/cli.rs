use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aal", about = "Anchored Audit Ledger: tamper-evident audit log with external anchoring", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the ledger behind the HTTP API
    Serve(ServeArgs),
    /// Inspect a local anchor chain file
    Chain(ChainArgs),
    /// Check Merkle inclusion proofs offline
    Proof(ProofArgs),
    /// Print configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Overrides `server.bind_addr`.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Overrides `server.allow_test_reset`.
    #[arg(long)]
    pub allow_test_reset: bool,
}

#[derive(Args)]
pub struct ChainArgs {
    #[command(subcommand)]
    pub action: ChainAction,
}

#[derive(Subcommand)]
pub enum ChainAction {
    /// Check every block's hash and link
    Verify { path: PathBuf },
    /// List the most recent blocks
    Show {
        path: PathBuf,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Args)]
pub struct ProofArgs {
    #[command(subcommand)]
    pub action: ProofAction,
}

#[derive(Subcommand)]
pub enum ProofAction {
    /// Verify a proof against a batch root
    Verify(VerifyProofArgs),
}

#[derive(Args)]
pub struct VerifyProofArgs {
    /// JSON file holding a proof, or an entry as served by the API.
    #[arg(long)]
    pub proof: PathBuf,
    /// Hex root hash of the batch.
    #[arg(long)]
    pub root: String,
    /// Hex entry hash; read from the entry when `--proof` holds one.
    #[arg(long)]
    pub entry: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the built-in defaults as TOML
    Default,
    /// Print the effective configuration
    Show,
}
