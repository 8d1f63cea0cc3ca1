use clap::{Parser, Subcommand};
use dbikit::DbikitConfig;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::ddl::DdlArgs;
use commands::status::StatusArgs;
use commands::unlock::UnlockArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.dbikit/dbikit.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tables, lock holders and schema status of the configured store
    Status(StatusArgs),

    /// Check that the engine keeps 64-bit integers and doubles intact
    Selftest,

    /// Remove stale lock records left by a crashed session
    Unlock(UnlockArgs),

    /// Print CREATE TABLE statements for a column list in every dialect
    Ddl(DdlArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // SQL texts are logged at debug level
            .with_max_level(Level::DEBUG)
            .init();
    }

    let config = match DbikitConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Status(args) => commands::status::run(&config, args, cli.json),
        Commands::Selftest => commands::selftest::run(&config, cli.json),
        Commands::Unlock(args) => commands::unlock::run(&config, args, cli.json),
        Commands::Ddl(args) => commands::ddl::run(args, cli.json),
        Commands::Config(args) => commands::config::run(&config, args, cli.json),
    }
}
