//! # Corvid CLI Module
//!
//! ## Available Commands
//!
//! - `put` - Create or update an entity
//! - `get` - Read the latest (or one exact) version of an entity
//! - `delete` - Tombstone an entity
//! - `connect` - Connect two entities under a name
//! - `list` - Page through a collection
//! - `connections` - Page through an entity's connections
//! - `search` - Search a collection or an entity's connections
//! - `history` - List every logged version of an entity
//! - `export` - Export a collection archive (runs as a job)
//! - `import` - Import one or more collection archives (runs as a job)
//! - `status` - Show row counts per table

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use corvid_core::{BackendKind, CollectionContext, CorvidError};
use std::path::PathBuf;
use uuid::Uuid;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Corvid - versioned entity store
///
/// Multi-tenant MVCC entities with collections, connections and
/// verified search.
#[derive(Parser, Debug)]
#[command(name = "corvid")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $CORVID_CONFIG, then ./corvid.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database, overriding the config file
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend, overriding the config file
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    /// Tenant the command runs in
    #[arg(short = 'T', long, global = true)]
    pub tenant: Option<Uuid>,

    /// Collection the command runs in
    #[arg(short = 'c', long, global = true, default_value = "default")]
    pub collection: String,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Backend names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Redb,
    Memory,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Redb => Self::Redb,
            BackendArg::Memory => Self::Memory,
        }
    }
}

/// Paging flags shared by read commands.
#[derive(clap::Args, Debug, Clone)]
pub struct PageArgs {
    /// Cursor returned by the previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Maximum results on the page (defaults to the configured page size)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update an entity
    Put {
        /// Entity type
        #[arg(short = 't', long = "type")]
        entity_type: String,

        /// Existing uuid to write a new version of
        #[arg(long)]
        id: Option<Uuid>,

        /// Properties as a JSON object
        #[arg(short, long, conflicts_with = "file")]
        props: Option<String>,

        /// File holding the properties JSON object
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Read an entity
    Get {
        /// Entity id as `type/uuid`
        id: String,

        /// Exact version to read
        #[arg(long)]
        version: Option<u64>,
    },

    /// Tombstone an entity and remove it from the collection
    Delete {
        /// Entity id as `type/uuid`
        id: String,
    },

    /// Connect two entities
    Connect {
        /// Source id as `type/uuid`
        source: String,

        /// Connection name
        connection: String,

        /// Target id as `type/uuid`
        target: String,
    },

    /// Page through the collection
    List {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Page through an entity's connections
    Connections {
        /// Source id as `type/uuid`
        source: String,

        /// Connection name
        connection: String,

        /// Only targets of this type
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Search the collection, or an entity's connections
    Search {
        /// Query: terms, `field:term`, or `*` for everything
        #[arg(short, long, default_value = "*")]
        query: String,

        /// Only hits of this type
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,

        /// Search this entity's connections instead of the collection
        #[arg(long, requires = "connection")]
        source: Option<String>,

        /// Connection name, with --source
        #[arg(long, requires = "source")]
        connection: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List every logged version of an entity
    History {
        /// Entity id as `type/uuid`
        id: String,
    },

    /// Export the collection to an archive file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Connection names to include (repeatable)
        #[arg(long = "connection")]
        connections: Vec<String>,
    },

    /// Import archive files into the collection
    Import {
        /// Input file paths, imported in order (repeatable)
        #[arg(short, long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Import every entity under this type, ignoring the archived types
        #[arg(long = "as-type")]
        as_type: Option<String>,
    },

    /// Show row counts per table
    Status,
}

impl Cli {
    /// The collection context, for commands that need a tenant.
    pub fn context(&self) -> Result<CollectionContext, CorvidError> {
        let tenant = self.tenant.ok_or_else(|| {
            CorvidError::Validation("this command needs --tenant <uuid>".to_string())
        })?;
        let context = CollectionContext::new(tenant, self.collection.clone());
        context.validate()?;
        Ok(context)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CorvidError> {
    let overrides = crate::config::Overrides {
        database: cli.database.clone(),
        backend: cli.backend.map(BackendKind::from),
    };
    let config = crate::config::load(cli.config.as_deref(), &overrides)?;
    let session = Session::open(&config, cli.json_mode)?;

    let Some(command) = &cli.command else {
        // No subcommand - show status by default
        return cmd_status(&session, &config);
    };
    if matches!(command, Commands::Status) {
        return cmd_status(&session, &config);
    }

    let ctx = cli.context()?;
    match command {
        Commands::Put {
            entity_type,
            id,
            props,
            file,
        } => cmd_put(
            &session,
            &ctx,
            entity_type,
            *id,
            props.as_deref(),
            file.as_deref(),
        ),
        Commands::Get { id, version } => cmd_get(&session, &ctx, id, *version),
        Commands::Delete { id } => cmd_delete(&session, &ctx, id),
        Commands::Connect {
            source,
            connection,
            target,
        } => cmd_connect(&session, &ctx, source, connection, target),
        Commands::List { page } => cmd_list(&session, &ctx, page),
        Commands::Connections {
            source,
            connection,
            entity_type,
            page,
        } => cmd_connections(
            &session,
            &ctx,
            source,
            connection,
            entity_type.as_deref(),
            page,
        ),
        Commands::Search {
            query,
            entity_type,
            source,
            connection,
            page,
        } => {
            let target = match (source, connection) {
                (Some(source), Some(connection)) => {
                    SearchTarget::Connections { source, connection }
                }
                _ => SearchTarget::Collection,
            };
            cmd_search(&session, &ctx, query, entity_type.as_deref(), target, page)
        }
        Commands::History { id } => cmd_history(&session, &ctx, id),
        Commands::Export {
            output,
            connections,
        } => cmd_export(&session, &ctx, output, connections).await,
        Commands::Import { inputs, as_type } => {
            cmd_import(&session, &ctx, inputs, as_type.as_deref()).await
        }
        Commands::Status => cmd_status(&session, &config),
    }
}
