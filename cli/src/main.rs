//! evindex operator CLI — inspect and manage indexer state.
//!
//! Usage:
//! ```bash
//! evindex status
//! evindex reset --checkpoint <checkpoint>
//! evindex info
//! ```
//!
//! `status`/`reset` connect to the Postgres backend named by `DATABASE_URL`
//! (the same variable `evindex_store::postgres::PostgresBackend::connect`
//! uses, and the same integration-test convention
//! `evindex-store/src/postgres.rs` follows).

use std::env;
use std::process;

use evindex_core::checkpoint::Checkpoint;
use evindex_store::versioned::Backend;
use evindex_store::PostgresBackend;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    let exit_code = match args[1].as_str() {
        "info" => {
            cmd_info();
            0
        }
        "status" => runtime.block_on(cmd_status()),
        "reset" => runtime.block_on(cmd_reset(&args[2..])),
        "version" | "--version" | "-V" => {
            println!("evindex {}", env!("CARGO_PKG_VERSION"));
            0
        }
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            1
        }
    };
    process::exit(exit_code);
}

fn print_usage() {
    println!("evindex {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe, schema-driven blockchain indexing engine\n");
    println!("USAGE:");
    println!("    evindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    status               Connect to DATABASE_URL and report reachability");
    println!("    reset [--checkpoint] Roll back every versioned row past a checkpoint (default: zero, i.e. wipe)");
    println!("    info                 Show evindex configuration defaults");
    println!("    version              Print version");
    println!("    help                 Print this help");
}

fn cmd_info() {
    println!("evindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backend: PostgreSQL (one generic evindex_versioned_rows table)");
    println!("  Realtime gap cap: {} blocks per fetch", evindex_sync::MAX_QUEUED_BLOCKS);
    println!("  Realtime backoff schedule: {:?} s", evindex_sync::BACKOFF_SCHEDULE_SECS);
    println!("  Ordering regimes: omnichain (default), multichain");
}

async fn cmd_status() -> i32 {
    let Ok(database_url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set");
        return 1;
    };
    match PostgresBackend::connect(&database_url).await {
        Ok(_) => {
            println!("connected: schema reachable at {database_url}");
            0
        }
        Err(err) => {
            eprintln!("connection failed: {err}");
            1
        }
    }
}

async fn cmd_reset(args: &[String]) -> i32 {
    let Ok(database_url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set");
        return 1;
    };
    let checkpoint = args
        .iter()
        .position(|a| a == "--checkpoint")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| Checkpoint::zero().to_string());

    let backend = match PostgresBackend::connect(&database_url).await {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("connection failed: {err}");
            return 1;
        }
    };

    match backend.rollback_to(&checkpoint).await {
        Ok(()) => {
            println!("rolled back every versioned row opened after checkpoint {checkpoint}");
            0
        }
        Err(err) => {
            eprintln!("reset failed: {err}");
            1
        }
    }
}
