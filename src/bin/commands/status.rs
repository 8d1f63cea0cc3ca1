use anyhow::Result;
use clap::Args;
use dbikit::database::{
    DbiConnection, Dialect, LockManager, LockRecord, SchemaManager, SchemaStatus, LOCK_TABLE,
    RESAVE_VERSION, SCHEMA_VERSION,
};
use dbikit::DbikitConfig;
use serde::Serialize;

use super::{open_connection, print_json};

/// Arguments for the Status command
#[derive(Args)]
pub struct StatusArgs {
    /// Also list secondary indexes
    #[clap(short, long)]
    pub indexes: bool,
}

#[derive(Debug, Serialize)]
struct StoreStatus {
    dialect: Dialect,
    database: String,
    tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    indexes: Option<Vec<String>>,
    lock_holders: Vec<LockRecord>,
    schema: SchemaStatus,
    library_version: i64,
}

pub fn run(config: &DbikitConfig, args: StatusArgs, json: bool) {
    let status = match collect(config, args.indexes) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        print_json(&status);
    } else {
        print_status(&status);
    }
}

fn collect(config: &DbikitConfig, with_indexes: bool) -> Result<StoreStatus> {
    let mut conn = open_connection(config)?;
    let tables = conn.get_table_list()?;
    let indexes = match with_indexes {
        true => Some(conn.get_index_list()?),
        false => None,
    };
    let lock_holders = lock_holders(&mut conn, &tables)?;
    let schema = SchemaManager::new(&mut conn).check_status(RESAVE_VERSION)?;
    let database = conn.dbname().to_string();
    conn.close();

    Ok(StoreStatus {
        dialect: config.dialect,
        database,
        tables,
        indexes,
        lock_holders,
        schema,
        library_version: SCHEMA_VERSION,
    })
}

fn lock_holders(conn: &mut DbiConnection, tables: &[String]) -> Result<Vec<LockRecord>> {
    if !tables.iter().any(|t| t == LOCK_TABLE) {
        return Ok(vec![]);
    }
    Ok(LockManager::for_current_process().holders(conn)?)
}

fn print_status(status: &StoreStatus) {
    println!("Dialect:    {}", status.dialect);
    println!("Database:   {}", status.database);
    println!("Schema:     {}", describe_schema(&status.schema));

    if status.lock_holders.is_empty() {
        println!("Lock:       unlocked");
    } else {
        let holders: Vec<String> = status.lock_holders.iter().map(|h| h.to_string()).collect();
        println!("Lock:       held by {}", holders.join(", "));
    }

    println!();
    println!("Tables ({}):", status.tables.len());
    for table in &status.tables {
        println!("  {}", table);
    }

    if let Some(indexes) = &status.indexes {
        println!();
        println!("Indexes ({}):", indexes.len());
        for index in indexes {
            println!("  {}", index);
        }
    }
}

fn describe_schema(status: &SchemaStatus) -> String {
    match status {
        SchemaStatus::NotInitialized => "not initialized".to_string(),
        SchemaStatus::Current => "current".to_string(),
        SchemaStatus::TooOld { stored, required } => {
            format!("too old (written by v{}, v{} required)", stored, required)
        }
        SchemaStatus::TooNew { stored, supported } => format!(
            "too new (requires v{}, this build supports v{})",
            stored, supported
        ),
    }
}
