//! eventwatch CLI — inspect and manage listener sync state.
//!
//! Usage:
//! ```bash
//! eventwatch listeners --db eventwatch.db
//! eventwatch status    --db eventwatch.db --listener my-listener
//! eventwatch info
//! ```

use std::env;
use std::process;

use eventwatch_core::store::{ContractRegistry, ListenerStore};
use eventwatch_storage::SqliteStore;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("eventwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "listeners" => run_async(cmd_listeners(&args[2..])),
        "status" => run_async(cmd_status(&args[2..])),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_async(
    fut: impl std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
) -> Result<(), Box<dyn std::error::Error>> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(fut)
}

fn print_usage() {
    println!("eventwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe smart contract event listener engine\n");
    println!("USAGE:");
    println!("    eventwatch <COMMAND>\n");
    println!("COMMANDS:");
    println!("    listeners  List listeners and their sync heights  (--db <path>)");
    println!("    status     Show one listener's stored state       (--db <path> --listener <id>)");
    println!("    info       Show EventWatch configuration info");
    println!("    version    Print version");
    println!("    help       Print this help");
}

fn cmd_info() {
    println!("EventWatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default confirmation depth: 12 blocks");
    println!("  Default batch size: 1000 blocks/call");
    println!("  Default poll interval: 2000 ms");
    println!("  Checkpoint window: 64 heights/listener");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Chains: EVM (Ethereum, Arbitrum, Base, Polygon, Optimism, ...)");
}

/// Pull `--flag value` out of a raw argument list.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn open_store(args: &[String]) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    let path = flag_value(args, "--db").ok_or("missing --db <path>")?;
    Ok(SqliteStore::open(path).await?)
}

async fn cmd_listeners(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(args).await?;
    let listeners = store.list_listeners().await?;
    if listeners.is_empty() {
        println!("No listeners registered");
        return Ok(());
    }
    println!("{:<24} {:<24} {:<20} {:>12}", "ID", "CONTRACT", "EVENT", "SYNC HEIGHT");
    for l in listeners {
        println!(
            "{:<24} {:<24} {:<20} {:>12}",
            l.id, l.contract_id, l.name, l.sync_height
        );
    }
    Ok(())
}

async fn cmd_status(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(args).await?;
    let id = flag_value(args, "--listener").ok_or("missing --listener <id>")?;

    let listener = store.get_listener(id).await?;
    let contract = store.get_contract(&listener.contract_id).await?;
    let records = store.records(id).await?;
    let checkpoints = store.checkpoints(id).await?;

    println!("Listener {}", listener.id);
    println!("  Event:        {}", listener.name);
    println!("  Contract:     {} ({})", contract.name, contract.address);
    println!("  Network:      {}", contract.network);
    println!("  Start height: {}", contract.start_height);
    println!("  Sync height:  {}", listener.sync_height);
    println!("  Records:      {}", records.len());
    if let Some(newest) = checkpoints.last() {
        println!("  Checkpoint:   {} ({})", newest.height, newest.block_hash);
    }
    Ok(())
}
