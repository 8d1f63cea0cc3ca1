use anyhow::Result;
use clap::Args;
use dbikit::database::{LockManager, LockRecord, LOCK_TABLE};
use dbikit::DbikitConfig;
use serde::Serialize;

use super::{open_connection, print_json};

/// Arguments for the Unlock command
#[derive(Args)]
pub struct UnlockArgs {
    /// Remove the lock records even though their owners may still be running
    #[clap(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct UnlockReport {
    holders: Vec<LockRecord>,
    removed: u64,
}

pub fn run(config: &DbikitConfig, args: UnlockArgs, json: bool) {
    let report = match unlock(config, args.force) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        print_json(&report);
        return;
    }

    if report.holders.is_empty() {
        println!("Store is not locked");
    } else if !args.force {
        for holder in &report.holders {
            println!("Locked by {}", holder);
        }
        println!("Re-run with --force to remove the lock");
    } else {
        println!("Removed {} lock record(s)", report.removed);
    }
}

fn unlock(config: &DbikitConfig, force: bool) -> Result<UnlockReport> {
    let mut conn = open_connection(config)?;
    let manager = LockManager::for_current_process();
    let holders = match conn.does_table_exist(LOCK_TABLE)? {
        true => manager.holders(&mut conn)?,
        false => vec![],
    };
    let removed = match force && !holders.is_empty() {
        true => manager.clear(&mut conn)?,
        false => 0,
    };
    conn.close();
    Ok(UnlockReport { holders, removed })
}
