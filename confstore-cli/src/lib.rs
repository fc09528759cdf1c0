//! Command-line front end for a confstore database
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use confstore_core::config::{parse_delimiter, Config};
use confstore_core::{Store, Value};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "confstore")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Database file (overrides the config file and CONFSTORE_STORE_PATH)
    #[arg(short, long)]
    pub db: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Create the database if it does not exist
    #[arg(long)]
    pub create: bool,

    /// Name delimiter, a single character
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the value of an entry
    Get { name: String },

    /// Set an entry, creating it if needed
    Set {
        name: String,
        value: String,
        #[arg(short = 't', long = "type", value_enum, default_value_t = Kind::String)]
        kind: Kind,
    },

    /// Create an entry; fails if it exists
    Create {
        name: String,
        value: String,
        #[arg(short = 't', long = "type", value_enum, default_value_t = Kind::String)]
        kind: Kind,
    },

    /// Delete an entry
    Delete {
        name: String,
        /// Also delete all children
        #[arg(short, long)]
        recursive: bool,
    },

    /// List the children of an entry (the root when omitted)
    List { name: Option<String> },

    /// Print the revision of an entry (the root when omitted)
    Revision { name: Option<String> },

    /// Verify the structure of the store
    Check,

    /// Repair structural problems
    Repair,
}

/// How a value given on the command line is interpreted
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Integer,
    String,
    /// Base64 encoded bytes
    Binary,
}

impl Kind {
    pub fn parse_value(self, raw: &str) -> Result<Value> {
        Ok(match self {
            Kind::Integer => Value::Integer(
                raw.parse()
                    .with_context(|| format!("'{}' is not an integer", raw))?,
            ),
            Kind::String => Value::String(raw.to_string()),
            Kind::Binary => Value::Binary(
                STANDARD
                    .decode(raw)
                    .with_context(|| format!("'{}' is not valid base64", raw))?,
            ),
        })
    }
}

/// Configuration from file or environment, with command-line overrides applied
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };

    if let Some(db) = &args.db {
        config.store.path = PathBuf::from(shellexpand::tilde(db).into_owned());
    }
    if args.create {
        config.store.create_if_missing = true;
    }
    if let Some(delimiter) = &args.delimiter {
        config.store.delimiter = parse_delimiter(delimiter)?;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Integer(v) => json!(v),
        Value::String(s) => json!(s),
        Value::Binary(b) => json!(STANDARD.encode(b)),
    }
}

/// Run `command` against an open store, writing its result to `out`
pub fn execute(store: &Store, command: &Command, out: &mut impl Write) -> Result<()> {
    let output = match command {
        Command::Get { name } => {
            let value = store.get(name)?;
            json!({
                "name": name,
                "type": value.value_type().as_str(),
                "value": value_json(&value),
            })
        }
        Command::Set { name, value, kind } => {
            store.set_or_create(name, kind.parse_value(value)?)?;
            json!({ "name": name, "revision": store.get_revision(name)? })
        }
        Command::Create { name, value, kind } => {
            store.create(name, kind.parse_value(value)?)?;
            json!({ "name": name, "revision": store.get_revision(name)? })
        }
        Command::Delete { name, recursive } => {
            store.delete(name, *recursive)?;
            json!({ "deleted": name })
        }
        Command::List { name } => {
            json!(store.get_children(name.as_deref().unwrap_or(""))?)
        }
        Command::Revision { name } => {
            json!(store.get_revision(name.as_deref().unwrap_or(""))?)
        }
        Command::Check => {
            store.check_data_consistency()?;
            json!({ "consistent": true })
        }
        Command::Repair => {
            let repaired = store.repair_data_consistency()?;
            info!(repaired, "repair finished");
            json!({ "repaired": repaired })
        }
    };

    writeln!(out, "{}", output)?;
    Ok(())
}

/// Open the configured store and run the command
pub fn run(args: &Args, config: &Config, out: &mut impl Write) -> Result<()> {
    let store = Store::open_with_config(&config.store)
        .with_context(|| format!("opening {}", config.store.path.display()))?;

    execute(&store, &args.command, out)
}
