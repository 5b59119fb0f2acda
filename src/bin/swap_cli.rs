use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use serde_json::json;

use ln_chain_swap::{SqliteAdapter, SwapKeySource, SwapRecord, SwapStore};

/// Offline inspection of a swap store plus rescue export. No provider or
/// wallet access; for driving live swaps embed the orchestrator instead.
#[derive(Debug, clap::Parser)]
struct Args {
    /// Path to the sqlite swap store
    #[arg(long)]
    store_path: PathBuf,

    /// Hex-encoded seed of the swap key source
    #[arg(long)]
    seed_hex: String,

    #[arg(long, default_value_t = false)]
    mainnet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pending swap ids
    Pending,
    /// List completed swap ids
    Completed,
    /// Print one swap record
    Show {
        #[arg(long)]
        swap_id: String,
    },
    /// Delete one swap record
    Remove {
        #[arg(long)]
        swap_id: String,
    },
    /// Export the rescue material
    Rescue,
}

fn main() -> Result<()> {
    ln_chain_swap::logging::init().ok();

    let args = Args::parse();
    let keys = SwapKeySource::from_seed_hex(&args.seed_hex, args.mainnet).context("parse seed")?;

    let adapter = SqliteAdapter::open(args.store_path)
        .map_err(|e| anyhow::anyhow!(e))
        .context("open sqlite store")?;
    let store = SwapStore::new(Arc::new(adapter), keys.namespace());

    match args.command {
        Command::Pending => {
            let ids = store.pending_ids().context("list pending swaps")?;
            println!("{}", json!({ "pending": ids }));
        }
        Command::Completed => {
            let ids = store.completed_ids().context("list completed swaps")?;
            println!("{}", json!({ "completed": ids }));
        }
        Command::Show { swap_id } => {
            let record = store
                .get(&swap_id)
                .context("get swap")?
                .with_context(|| format!("swap not found: {swap_id}"))?;
            print_record(&record)?;
        }
        Command::Remove { swap_id } => {
            let removed = store.remove(&swap_id).context("remove swap")?;
            println!("{}", json!({ "swap_id": swap_id, "removed": removed }));
        }
        Command::Rescue => {
            let material = keys.rescue_material();
            println!("{}", serde_json::to_string_pretty(&material)?);
        }
    }

    Ok(())
}

fn print_record(record: &SwapRecord) -> Result<()> {
    let value = serde_json::to_value(record).context("encode swap record")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
