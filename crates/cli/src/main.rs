//! Tether CLI — the main entry point.
//!
//! Commands:
//! - `init`        — Write a default config and create the database
//! - `config`      — Show, locate, or validate configuration
//! - `collection`  — Create and inspect collections
//! - `ingest`      — Split a text file into chunks and index it
//! - `search`      — Keyword, similarity, or hybrid search
//! - `history`     — Show a conversation, windowed to a token budget
//! - `say`         — Append a message to a conversation
//! - `forget`      — Soft-delete a message

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tether_core::message::Role;
use tether_core::SearchMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "tether",
    about = "Tether — token-budgeted retrieval and conversation memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.tether/config.toml
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database
    Init,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Index a plain-text file into a collection
    Ingest {
        /// Target collection name
        collection: String,
        /// File to read
        path: PathBuf,
        /// Maximum tokens per chunk
        #[arg(long, default_value_t = tether_context::indexer::DEFAULT_CHUNK_TOKENS)]
        max_tokens: usize,
        /// Owning user id
        #[arg(long)]
        user: Option<i64>,
    },

    /// Search a collection
    Search {
        /// Collection name
        collection: String,
        /// Query text
        query: String,
        /// keyword, similarity, or hybrid
        #[arg(short, long)]
        mode: Option<SearchMode>,
        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Restrict results to one file (by name)
        #[arg(long)]
        file: Option<String>,
        /// Skip the synthetic-question fields
        #[arg(long)]
        no_questions: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a conversation, oldest first
    History {
        /// Conversation id
        conversation: String,
        /// Token budget for the window (defaults to conversation.max_history_tokens)
        #[arg(long)]
        limit_tokens: Option<usize>,
    },

    /// Append a message to a conversation
    Say {
        /// Conversation id
        conversation: String,
        /// Message text
        text: String,
        /// system, assistant, or user
        #[arg(long, default_value = "user", value_parser = parse_role)]
        role: Role,
    },

    /// Soft-delete a message from a conversation
    Forget {
        /// Conversation id
        conversation: String,
        /// Message id
        message_id: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Check the configuration for errors
    Validate,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create a collection pinned to an embedding model
    Create {
        name: String,
        /// Embedding model (defaults to embedding.default_model)
        #[arg(long)]
        model: Option<String>,
    },
    /// List collections
    List,
    /// List the files of a collection
    Files { name: String },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| format!("unknown role '{s}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
        },
        Commands::Collection { action } => match action {
            CollectionAction::Create { name, model } => {
                commands::collection::create(config_path, &name, model.as_deref()).await?
            }
            CollectionAction::List => commands::collection::list(config_path).await?,
            CollectionAction::Files { name } => {
                commands::collection::files(config_path, &name).await?
            }
        },
        Commands::Ingest {
            collection,
            path,
            max_tokens,
            user,
        } => commands::ingest::run(config_path, &collection, &path, max_tokens, user).await?,
        Commands::Search {
            collection,
            query,
            mode,
            top_k,
            file,
            no_questions,
            json,
        } => {
            let options = commands::search::SearchOptions {
                mode,
                top_k,
                file,
                include_questions: !no_questions,
                json,
            };
            commands::search::run(config_path, &collection, &query, options).await?
        }
        Commands::History {
            conversation,
            limit_tokens,
        } => commands::conversation::history(config_path, &conversation, limit_tokens).await?,
        Commands::Say {
            conversation,
            text,
            role,
        } => commands::conversation::say(config_path, &conversation, role, &text).await?,
        Commands::Forget {
            conversation,
            message_id,
        } => commands::conversation::forget(config_path, &conversation, message_id).await?,
    }

    Ok(())
}
