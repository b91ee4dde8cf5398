//! Pinceau CLI - run and inspect task DAGs
//!
//! Main entry point for the `pinceau` command-line tool.

mod app;
mod commands;
mod demo;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pinceau_core::ConfigLoader;

use crate::app::App;
use crate::commands::{GraphFormat, RecordFormat, RunRequest};
use crate::logging::LogLevel;

#[derive(Parser)]
#[command(name = "pinceau")]
#[command(about = "Pinceau - build, run and inspect task DAGs", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Extra configuration file, layered over the user and project ones
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides PINCEAU_LOG and the config file)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered DAGs
    List {
        /// Case-insensitive match on id, label or description
        #[arg(short, long)]
        query: Option<String>,
        /// Only DAGs carrying this tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Show a DAG as JSON
    Show {
        /// DAG ID, optionally `id[variant]`
        dag: String,
    },

    /// Render a DAG as a graph
    Graph {
        /// DAG ID
        dag: String,
        #[arg(short, long, value_enum, default_value = "dot")]
        format: GraphFormat,
        /// Label nodes with their task kind
        #[arg(long)]
        kinds: bool,
        /// Label nodes with their status
        #[arg(long)]
        status: bool,
    },

    /// Show the inputs a DAG needs
    Inputs {
        /// DAG ID
        dag: String,
    },

    /// Run a DAG and print its execution memory
    Run {
        /// DAG ID
        dag: String,
        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,
        /// Run a saved variant instead of the default parameters
        #[arg(short, long)]
        variant: Option<String>,
        /// Give up after this many seconds
        #[arg(short, long)]
        deadline: Option<f64>,
        /// Print every event as a JSON line while running
        #[arg(short, long)]
        events: bool,
    },

    /// Write a DAG record
    Export {
        /// DAG ID
        dag: String,
        #[arg(short, long, value_enum, default_value = "json")]
        format: RecordFormat,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Register a DAG record and save it as a definition
    Import {
        /// JSON or YAML file
        file: PathBuf,
    },

    /// Variant management commands
    #[command(subcommand)]
    Variant(VariantCommands),
}

#[derive(Subcommand)]
enum VariantCommands {
    /// List the variants of a DAG
    List {
        /// DAG ID
        dag: String,
    },
    /// Create or replace a variant
    Set {
        /// DAG ID
        dag: String,
        /// Variant name
        variant: String,
        /// JSON object of task ID to parameters
        params: String,
    },
    /// Delete a variant
    Remove {
        /// DAG ID
        dag: String,
        /// Variant name
        variant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_explicit(path);
    }
    let config = loader.load().await?;
    logging::init_logging(cli.log_level, &config)?;

    let app = App::bootstrap(config).await?;

    match cli.command {
        Commands::List { query, tag } => commands::handle_list(&app, query, tag),
        Commands::Show { dag } => commands::handle_show(&app, &dag),
        Commands::Graph {
            dag,
            format,
            kinds,
            status,
        } => commands::handle_graph(&app, &dag, format, kinds, status),
        Commands::Inputs { dag } => commands::handle_inputs(&app, &dag),
        Commands::Run {
            dag,
            input,
            variant,
            deadline,
            events,
        } => {
            let request = RunRequest {
                dag,
                input,
                variant,
                deadline,
                events,
            };
            commands::handle_run(&app, request).await
        }
        Commands::Export { dag, format, out } => {
            commands::handle_export(&app, &dag, format, out).await
        }
        Commands::Import { file } => commands::handle_import(&app, &file).await,
        Commands::Variant(VariantCommands::List { dag }) => {
            commands::handle_variant_list(&app, &dag).await
        }
        Commands::Variant(VariantCommands::Set {
            dag,
            variant,
            params,
        }) => commands::handle_variant_set(&app, &dag, &variant, &params).await,
        Commands::Variant(VariantCommands::Remove { dag, variant }) => {
            commands::handle_variant_remove(&app, &dag, &variant).await
        }
    }
}
