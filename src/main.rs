use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use snaplayer::config::{Config, LoggingConfig};
use snaplayer::diff::UnconfiguredNaiveDiff;
use snaplayer::{Driver, LayerDriver};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "snaplayer", version)]
#[command(about = "Copy-on-write layer driver for the snapshot engine", long_about = None)]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "SNAPLAYER_CONFIG")]
    config: Option<PathBuf>,

    /// Layer root directory, overrides the configuration
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    ShowConfig,

    #[command(flatten)]
    Layer(LayerCommand),
}

#[derive(Subcommand)]
enum LayerCommand {
    /// Show driver status
    Status,

    /// Create a read-only layer
    Create {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
    },

    /// Create a writable container layer
    CreateRw {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
    },

    /// Remove a layer
    Remove { id: String },

    /// Mount a layer and print its directory
    Mount {
        id: String,
        #[arg(long, default_value = "")]
        mount_label: String,
    },

    /// Unmount a layer
    Unmount { id: String },

    /// Check whether the engine knows a layer
    Exists { id: String },

    /// Unmount every layer
    Cleanup,

    /// Write the diff of a layer against its parent as a tar archive
    Diff {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a tar archive to a layer
    ApplyDiff {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
        /// Input file, stdin if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List the changes of a layer against its parent
    Changes {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
    },

    /// Print the size of a layer's changes
    DiffSize {
        id: String,
        #[arg(short, long, default_value = "")]
        parent: String,
    },
}

fn init_logging(logging: &LoggingConfig, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if json || logging.json {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(io::stderr)).init();
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.driver.root = root;
    }

    init_logging(&config.logging, cli.json);

    let command = match cli.command {
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Layer(command) => command,
    };

    tracing::debug!(root = %config.driver.root.display(), "Starting snaplayer");
    let driver = Driver::with_engine(&config, Arc::new(UnconfiguredNaiveDiff))
        .with_context(|| format!("Failed to initialise driver on {}", config.driver.root.display()))?;

    run(&driver, command)
}

fn run(driver: &Driver, command: LayerCommand) -> Result<()> {
    match command {
        LayerCommand::Status => {
            let status: Vec<Value> = driver
                .status()
                .into_iter()
                .map(|(label, value)| json!({ "label": label, "value": value }))
                .collect();
            print_json(&json!({ "driver": driver.name(), "status": status }))
        }
        LayerCommand::Create { id, parent } => {
            driver.create(&id, &parent)?;
            print_json(&json!({ "created": id, "parent": parent, "writable": false }))
        }
        LayerCommand::CreateRw { id, parent } => {
            driver.create_read_write(&id, &parent)?;
            print_json(&json!({ "created": id, "parent": parent, "writable": true }))
        }
        LayerCommand::Remove { id } => {
            driver.remove(&id)?;
            print_json(&json!({ "removed": id }))
        }
        LayerCommand::Mount { id, mount_label } => {
            let dir = driver.get(&id, &mount_label)?;
            print_json(&json!({ "id": id, "path": dir }))
        }
        LayerCommand::Unmount { id } => {
            driver.put(&id)?;
            print_json(&json!({ "unmounted": id }))
        }
        LayerCommand::Exists { id } => {
            let exists = driver.exists(&id);
            print_json(&json!({ "id": id, "exists": exists }))
        }
        LayerCommand::Cleanup => {
            driver.cleanup()?;
            print_json(&json!({ "cleanup": true }))
        }
        LayerCommand::Diff { id, parent, output } => {
            let mut stream = driver.diff(&id, &parent)?;
            let written = match output {
                Some(path) => {
                    let mut file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    io::copy(&mut stream, &mut file)?
                }
                None => io::copy(&mut stream, &mut io::stdout().lock())?,
            };
            stream.close();
            tracing::info!(layer_id = %id, bytes = written, "Diff written");
            Ok(())
        }
        LayerCommand::ApplyDiff { id, parent, input } => {
            let archive: Box<dyn Read + Send> = match input {
                Some(path) => Box::new(
                    File::open(&path)
                        .with_context(|| format!("Failed to open {}", path.display()))?,
                ),
                None => Box::new(io::stdin()),
            };
            let size = driver.apply_diff(&id, &parent, archive)?;
            print_json(&json!({ "id": id, "size": size }))
        }
        LayerCommand::Changes { id, parent } => {
            let changes = driver.changes(&id, &parent)?;
            print_json(&serde_json::to_value(changes)?)
        }
        LayerCommand::DiffSize { id, parent } => {
            let size = driver.diff_size(&id, &parent)?;
            print_json(&json!({ "id": id, "size": size }))
        }
    }
}
