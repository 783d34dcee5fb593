use std::fs;
use std::path::Path;
use std::sync::Arc;

use aal_anchor::{AnchorManager, BackendRegistry, LocalChain};
use aal_crypto::MerkleProof;
use aal_ledger::{AuditLedger, LedgerConfig};
use aal_server::AalServer;
use aal_store::{DurableStore, InMemoryKeyValueStore, JournalStore, KvDurableStore};
use aal_types::Digest;
use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::*;
use crate::config::AppConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(AppConfig::load(cli.config.as_deref())?, args).await,
        Command::Chain(args) => match args.action {
            ChainAction::Verify { path } => cmd_chain_verify(&path, format),
            ChainAction::Show { path, limit } => cmd_chain_show(&path, limit, format),
        },
        Command::Proof(ProofArgs {
            action: ProofAction::Verify(args),
        }) => cmd_proof_verify(args, format),
        Command::Config(args) => cmd_config(args.action, cli.config.as_deref()),
    }
}

async fn cmd_serve(config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    let mut server_config = config.server;
    if let Some(bind) = args.bind {
        server_config.bind_addr = bind;
    }
    server_config.allow_test_reset |= args.allow_test_reset;
    if server_config.allow_test_reset {
        warn!("POST /v1/admin/reset is enabled");
    }

    let ledger = Arc::new(build_ledger(&config.ledger)?);
    AalServer::new(server_config, ledger)
        .serve(shutdown_signal())
        .await
        .context("server failed")?;
    info!("shutdown complete");
    Ok(())
}

/// The binary has no external key-value service, so the journal serves as
/// the only durable tier when configured.
fn build_ledger(config: &LedgerConfig) -> anyhow::Result<AuditLedger> {
    let dispatcher =
        AnchorManager::from_config(config.anchoring.clone(), &BackendRegistry::new()).context("building anchor backends")?;
    let store: Arc<dyn DurableStore> = match &config.storage.journal_path {
        Some(path) => Arc::new(
            JournalStore::open(path, config.storage.sync_mode)
                .with_context(|| format!("opening journal {}", path.display()))?,
        ),
        None => {
            warn!("no journal configured; ledger state lives in memory only");
            Arc::new(KvDurableStore::new(Arc::new(InMemoryKeyValueStore::new())))
        }
    };
    AuditLedger::new(config.clone(), store, dispatcher).context("building ledger")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn cmd_chain_verify(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("no chain file at {}", path.display());
    }
    let blocks = LocalChain::read_blocks(path)?;
    if blocks.is_empty() {
        bail!("chain file {} holds no blocks", path.display());
    }

    // Opening an existing non-empty chain only reads it.
    let outcome = LocalChain::open(path);
    match format {
        OutputFormat::Json => {
            let report = match &outcome {
                Ok(chain) => json!({ "valid": true, "blocks": chain.len(), "head": chain.head().map(|b| b.block_hash) }),
                Err(e) => json!({ "valid": false, "blocks": blocks.len(), "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => match &outcome {
            Ok(chain) => {
                println!("{} Chain integrity verified", "✓".green().bold());
                println!("  Blocks: {}", chain.len().to_string().bold());
                if let Some(head) = chain.head() {
                    println!("  Head: {}", head.block_hash.to_hex().yellow());
                }
            }
            Err(e) => println!("{} {}", "✗".red().bold(), e),
        },
    }
    outcome.map(|_| ()).context("chain verification failed")
}

fn cmd_chain_show(path: &Path, limit: usize, format: OutputFormat) -> anyhow::Result<()> {
    let blocks = LocalChain::read_blocks(path).with_context(|| format!("reading {}", path.display()))?;
    let shown = &blocks[blocks.len().saturating_sub(limit)..];
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(shown)?),
        OutputFormat::Text => {
            if shown.is_empty() {
                println!("Chain is empty.");
            }
            for block in shown {
                let root = if block.index == 0 {
                    "genesis".dimmed().to_string()
                } else {
                    block.root_hash.short_hex().cyan().to_string()
                };
                println!(
                    "{}  {}  root {}  {}",
                    format!("#{}", block.index).yellow().bold(),
                    block.block_hash.short_hex().dimmed(),
                    root,
                    block.timestamp.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

fn cmd_proof_verify(args: VerifyProofArgs, format: OutputFormat) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.proof).with_context(|| format!("reading {}", args.proof.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).context("proof file is not JSON")?;

    // An entry as served by the API carries its own hash next to the proof.
    let (proof, embedded_hash) = match value.get("proof") {
        Some(proof) => (
            proof.clone(),
            value.get("hash").and_then(|h| h.as_str()).map(str::to_owned),
        ),
        None => (value, None),
    };
    let proof: MerkleProof = serde_json::from_value(proof).context("reading Merkle proof")?;
    let entry: Digest = args
        .entry
        .or(embedded_hash)
        .context("no entry hash: pass --entry or an entry file")?
        .parse()
        .context("invalid entry hash")?;
    let root: Digest = args.root.parse().context("invalid root hash")?;

    let is_valid = proof.verify_record(entry.as_bytes(), &root);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "entryHash": entry, "rootHash": root, "isValid": is_valid }))?
            );
        }
        OutputFormat::Text if is_valid => {
            println!("{} Proof valid", "✓".green().bold());
            println!("  Entry: {}", entry.to_hex().yellow());
            println!("  Root: {}", root.to_hex().cyan());
        }
        OutputFormat::Text => println!("{} Proof does not verify against {}", "✗".red().bold(), root.short_hex()),
    }
    if !is_valid {
        bail!("proof verification failed");
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, path: Option<&Path>) -> anyhow::Result<()> {
    let config = match action {
        ConfigAction::Default => AppConfig::default(),
        ConfigAction::Show => AppConfig::load(path)?,
    };
    print!("{}", config.to_toml()?);
    Ok(())
}
