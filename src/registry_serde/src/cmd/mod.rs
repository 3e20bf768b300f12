use std::path::PathBuf;

use clap::{Args, Subcommand};

use common::{IdentifierNamer, DEFAULT_MAX_IDENTIFIER_LENGTH};
use registry_schema::RootConfig;

use crate::{
    feed::api::{ApiConfig, DEFAULT_API_URL},
    source::SchemaSource,
    IngestOptions,
};

pub const DEFAULT_STATEDB_FS_PATH: &str = "lobbyregister.sqlite.db";
pub const DEFAULT_ROOT_NAME: &str = "register_entries";
pub const DEFAULT_NATURAL_KEY: &str = "registerNumber";
pub const DEFAULT_VERSIONS_ROOT: &str = "register_entry_versions";
pub const DEFAULT_STATISTICS_ROOT: &str = "statistics_register_entries";

/// Where the table layout is inferred from
#[derive(Debug, Args, Clone)]
pub struct SchemaSourceArgs {
    /// JSON, JSON Lines or YAML sample document(s) to infer tables from
    #[arg(
        short = 's',
        long,
        env = "LOBBYREG_SAMPLE",
        value_delimiter = ',',
        required_unless_present = "openapi",
        conflicts_with = "openapi"
    )]
    pub sample: Vec<PathBuf>,

    /// OpenAPI document (JSON or YAML) declaring the root schemas
    #[arg(short = 'o', long, env = "LOBBYREG_OPENAPI")]
    pub openapi: Option<PathBuf>,

    /// root table name when inferring from samples
    #[arg(long, default_value = DEFAULT_ROOT_NAME)]
    pub root_name: String,

    /// root properties forming the upsert key when inferring from samples
    #[arg(long, default_value = DEFAULT_NATURAL_KEY)]
    pub natural_key: Vec<String>,

    /// OpenAPI roots as NAME=Schema[:key,key]; defaults to the register roots
    #[arg(long, value_parser = parse_root)]
    pub root: Vec<RootConfig>,

    /// longest table or column name to generate
    #[arg(long, default_value_t = DEFAULT_MAX_IDENTIFIER_LENGTH)]
    pub max_identifier_length: usize,
}

fn parse_root(value: &str) -> Result<RootConfig, String> {
    value.parse()
}

impl SchemaSourceArgs {
    pub fn source(&self) -> SchemaSource {
        match &self.openapi {
            Some(path) => SchemaSource::OpenApi {
                path: path.clone(),
                roots: if self.root.is_empty() {
                    RootConfig::register_defaults()
                } else {
                    self.root.clone()
                },
            },
            None => SchemaSource::Samples {
                paths: self.sample.clone(),
                root_name: self.root_name.clone(),
                natural_keys: self.natural_key.clone(),
            },
        }
    }

    pub fn namer(&self) -> IdentifierNamer {
        IdentifierNamer::new(self.max_identifier_length)
    }
}

/// Inspect the tables inferred for a sample or OpenAPI document
#[derive(Debug, Args, Clone)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SchemaCommands {
    /// list the generated tables
    Tables {
        #[command(flatten)]
        source: SchemaSourceArgs,

        /// emit as Markdown instead of an ASCII table
        #[arg(long)]
        markdown: bool,
    },

    /// emit the CREATE statements
    Ddl {
        #[command(flatten)]
        source: SchemaSourceArgs,
    },

    /// emit a Mermaid ER diagram
    Diagram {
        #[command(flatten)]
        source: SchemaSourceArgs,
    },
}

/// Admin / maintenance utilities
#[derive(Debug, Args, Clone)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub command: AdminCommands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum AdminCommands {
    /// create the generated tables in the state database
    Init {
        /// target SQLite database
        #[arg(short='d', long, default_value = DEFAULT_STATEDB_FS_PATH, default_missing_value = "always", env="LOBBYREG_STATEDB_FS_PATH")]
        state_db_fs_path: String,

        #[command(flatten)]
        source: SchemaSourceArgs,

        /// remove the existing database first
        #[arg(short, long)]
        remove_existing_first: bool,
    },

    /// row counts of the generated tables
    Stats {
        /// target SQLite database
        #[arg(short='d', long, default_value = DEFAULT_STATEDB_FS_PATH, default_missing_value = "always", env="LOBBYREG_STATEDB_FS_PATH")]
        state_db_fs_path: String,

        #[command(flatten)]
        source: SchemaSourceArgs,

        /// emit as Markdown instead of an ASCII table
        #[arg(long)]
        markdown: bool,
    },

    /// generate CLI help markdown
    CliHelpMd,
}

/// Ingest register documents into the state database
#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    #[command(subcommand)]
    pub command: IngestCommands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum IngestCommands {
    /// ingest documents from JSON, JSON Lines or YAML files
    Files(IngestFilesArgs),

    /// ingest from the register REST API
    Api(IngestApiArgs),
}

/// Options shared by every ingestion source
#[derive(Debug, Args, Clone)]
pub struct IngestDbArgs {
    /// target SQLite database
    #[arg(short='d', long, default_value = DEFAULT_STATEDB_FS_PATH, default_missing_value = "always", env="LOBBYREG_STATEDB_FS_PATH")]
    pub state_db_fs_path: String,

    #[command(flatten)]
    pub source: SchemaSourceArgs,

    /// documents buffered between the feed and the writer
    #[arg(long, default_value_t = 100, env = "INGEST_QUEUE_SIZE")]
    pub queue_size: usize,

    /// log progress every N written documents
    #[arg(long, default_value_t = 25, env = "PROGRESS_EVERY")]
    pub progress_every: usize,
}

impl IngestDbArgs {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            queue_size: self.queue_size,
            progress_every: self.progress_every,
            ..Default::default()
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct IngestFilesArgs {
    #[command(flatten)]
    pub db: IngestDbArgs,

    /// root table the documents belong to
    #[arg(long, default_value = DEFAULT_ROOT_NAME)]
    pub into: String,

    /// documents to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct IngestApiArgs {
    #[command(flatten)]
    pub db: IngestDbArgs,

    /// base URL of the register API
    #[arg(long, default_value = DEFAULT_API_URL, env = "LOBBY_API_URL")]
    pub api_url: String,

    /// API key sent as `Authorization: ApiKey <key>`
    #[arg(long, env = "LOBBY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// full-text search passed as `q`
    #[arg(long, env = "LOBBY_QUERY")]
    pub query: Option<String>,

    /// request timeout in seconds
    #[arg(long, default_value_t = 60, env = "HTTP_TIMEOUT")]
    pub http_timeout: u64,

    /// retries for network errors, 5xx, 408 and 429
    #[arg(long, default_value_t = 3, env = "HTTP_MAX_RETRIES")]
    pub http_max_retries: u32,

    /// first retry delay in seconds, doubled per retry
    #[arg(long, default_value_t = 0.5, env = "HTTP_BACKOFF_FACTOR")]
    pub http_backoff_factor: f64,

    /// longest retry delay in seconds
    #[arg(long, default_value_t = 8.0, env = "HTTP_BACKOFF_MAX")]
    pub http_backoff_max: f64,

    /// root table for register entries
    #[arg(long, default_value = DEFAULT_ROOT_NAME)]
    pub entries_root: String,

    /// root table for per-entry version documents, fetched when present
    #[arg(long, default_value = DEFAULT_VERSIONS_ROOT)]
    pub versions_root: String,

    /// root table for the statistics document, fetched when present
    #[arg(long, default_value = DEFAULT_STATISTICS_ROOT)]
    pub statistics_root: String,

    /// skip version documents
    #[arg(long)]
    pub no_versions: bool,

    /// skip the statistics document
    #[arg(long)]
    pub no_statistics: bool,
}

impl IngestApiArgs {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            url: self.api_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            timeout: std::time::Duration::from_secs(self.http_timeout),
            max_retries: self.http_max_retries,
            backoff_factor: self.http_backoff_factor,
            backoff_max: self.http_backoff_max,
        }
    }
}
