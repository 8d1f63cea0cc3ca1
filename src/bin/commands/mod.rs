pub mod config;
pub mod ddl;
pub mod selftest;
pub mod status;
pub mod unlock;

use anyhow::{anyhow, Result};
use dbikit::database::{DbiConnection, Dialect, DriverContext, SqliteDriver};
use dbikit::DbikitConfig;
use serde::Serialize;

/// Open a plain connection to the configured store, without taking the lock
///
/// An embedded database must already exist; it is never created here.
pub(crate) fn open_connection(config: &DbikitConfig) -> Result<DbiConnection> {
    let options = config.connection_options();
    if config.dialect == Dialect::Sqlite {
        if let Some(path) = SqliteDriver::database_path(&options) {
            if !path.exists() {
                return Err(anyhow!("database file {} does not exist", path.display()));
            }
        }
    }
    let ctx = DriverContext::new();
    let conn = DbiConnection::open(&ctx, config.dialect, &options)?;
    Ok(conn.with_backoff(config.retry_backoff()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}
