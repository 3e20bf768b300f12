use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use registry_serde::cmd::{AdminArgs, IngestArgs, SchemaArgs};

pub mod admin;
pub mod ingest;
pub mod schema;
pub mod service_management;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum LogMode {
    Full,
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "lobbyreg", author, version, about, long_about = None)]
pub struct Cli {
    /// Turn debugging information on (repeat for higher levels)
    #[arg(short, long, action = clap::ArgAction::Count, env="LOBBYREG_DEBUG")]
    pub debug: u8,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Log output format
    #[clap(long, value_enum)]
    pub log_mode: Option<LogMode>,

    /// File for logs to be written to
    #[arg(long, value_parser)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CliCommands {
    Schema(SchemaArgs),
    Admin(AdminArgs),
    Ingest(IngestArgs),
}

pub async fn execute(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        CliCommands::Schema(args) => schema::Schema::default().execute(args),
        CliCommands::Admin(args) => admin::Admin::default().execute(args),
        CliCommands::Ingest(args) => ingest::Ingest::default().execute(args).await,
    }
}
