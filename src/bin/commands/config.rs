use clap::Args;
use dbikit::config::ConnectionOptions;
use dbikit::database::{DriverContext, SqliteDriver};
use dbikit::DbikitConfig;
use serde::Serialize;

use super::print_json;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also show the resolved connection options
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    #[serde(flatten)]
    config: &'a DbikitConfig,
    drivers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<ConnectionOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_file: Option<String>,
}

pub fn run(config: &DbikitConfig, args: ConfigArgs, json: bool) {
    let ConfigArgs { verbose } = args;

    let options = config.connection_options();
    let drivers = DriverContext::new()
        .available()
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>();
    let database_file = SqliteDriver::database_path(&options)
        .filter(|_| options.dbdir.is_some())
        .map(|p| p.display().to_string());

    if json {
        print_json(&ConfigInfo {
            config_file: DbikitConfig::config_file_path(),
            config,
            drivers,
            connection: verbose.then_some(options),
            database_file,
        });
        return;
    }

    println!("{}", config.summary());
    println!("Drivers:            {}", drivers.join(", "));
    if verbose {
        if let Some(file) = &database_file {
            println!("Database File:      {}", file);
        }
        println!("Encoding:           {}", options.encoding);
    }
}
