//! kv-tables CLI
//!
//! Registers the table definitions found in the schema directory and runs a
//! single table operation against the configured store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kv_tables::{Record, RecordStore, SchemaLoader, TablesConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kv-tables")]
#[command(about = "Schema-validated tables on a Redis-compatible store")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of table definitions (overrides the config)
    #[arg(short, long)]
    schemas: Option<PathBuf>,

    /// Store host (overrides the config)
    #[arg(long)]
    host: Option<String>,

    /// Store port (overrides the config)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List registered tables
    Tables,

    /// Insert a record given as a JSON object
    Insert { table: String, data: String },

    /// Fetch one record
    Get { table: String, pk: String },

    /// Fetch every record of a table
    All { table: String },

    /// Merge fields given as a JSON object into a record
    Update { table: String, pk: String, data: String },

    /// Delete one record
    Delete { table: String, pk: String },

    /// Print the raw index of a table
    Members { table: String },

    /// Delete every record of a table
    Purge { table: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file
    Init {
        #[arg(short, long, default_value = "kv-tables.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = TablesConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.schemas {
        config.schemas.dir = dir;
    }
    if let Some(host) = cli.host {
        config.store.host = host;
    }
    if let Some(port) = cli.port {
        config.store.port = port;
    }

    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show { json } => {
                if *json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
                Ok(())
            }
            ConfigAction::Init { output } => {
                TablesConfig::default().save(output)?;
                println!("✅ Wrote {}", output);
                Ok(())
            }
        };
    }

    let mut store = RecordStore::redis(config.store.clone());
    let loader = SchemaLoader::new(config.schemas_dir());
    loader
        .load_into(store.registry_mut())
        .with_context(|| format!("loading schemas from {}", loader.root().display()))?;

    match cli.command {
        Commands::Config { .. } => Ok(()),

        Commands::Tables => {
            for definition in store.registry().list() {
                println!("{} (primary key: {})", definition.name(), definition.primary_key());
            }
            Ok(())
        }

        Commands::Insert { table, data } => {
            store.insert(&table, parse_record(&data)?).await?;
            println!("✅ Inserted into {}", table);
            Ok(())
        }

        Commands::Get { table, pk } => {
            let record = store.get(&table, &pk).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        Commands::All { table } => {
            let records = store.get_all(&table).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }

        Commands::Update { table, pk, data } => {
            let record = store.update(&table, &pk, parse_record(&data)?).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        Commands::Delete { table, pk } => {
            store.delete(&table, &pk).await?;
            println!("✅ Deleted {}:{}", table, pk);
            Ok(())
        }

        Commands::Members { table } => {
            for key in store.list_members(&table).await? {
                println!("{}", key);
            }
            Ok(())
        }

        Commands::Purge { table } => {
            let count = store.purge(&table).await?;
            println!("✅ Purged {} record(s) from {}", count, table);
            Ok(())
        }
    }
}

fn parse_record(data: &str) -> anyhow::Result<Record> {
    let value: serde_json::Value = serde_json::from_str(data).context("record is not valid JSON")?;
    Ok(Record::from_json(value)?)
}
