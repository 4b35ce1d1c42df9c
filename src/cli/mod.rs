//! CLI command definitions and parsing
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kbindex",
    version,
    about = "Knowledge-base indexing with hybrid search and zero-downtime reindexing",
    long_about = "kbindex chunks and embeds documents into named knowledge bases, answers \
                  semantic and hybrid (semantic + BM25) queries, and rebuilds a knowledge base \
                  with new settings while the current index keeps serving queries."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/kbindex/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage knowledge bases
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Upload files into a knowledge base
    Add {
        /// Knowledge base name or id
        kb: String,

        /// Files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List documents of a knowledge base
    Docs {
        /// Knowledge base name or id
        kb: String,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a document
    Rm {
        /// Knowledge base name or id
        kb: String,

        /// Document id
        document: String,
    },

    /// Re-extract and re-chunk a document with current settings
    Reprocess {
        /// Knowledge base name or id
        kb: String,

        /// Document id
        document: String,
    },

    /// Search a knowledge base
    Search {
        /// Knowledge base name or id
        kb: String,

        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Force hybrid search for this query
        #[arg(long, conflicts_with = "no_hybrid")]
        hybrid: bool,

        /// Force pure vector search for this query
        #[arg(long)]
        no_hybrid: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Find documents similar to a document
    Similar {
        /// Knowledge base name or id
        kb: String,

        /// Document id
        document: String,

        /// Maximum number of similar documents
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Rebuild a knowledge base with its current settings
    Reindex {
        /// Knowledge base name or id
        kb: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum KbAction {
    /// Create a knowledge base
    Create {
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// List knowledge bases
    List {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a knowledge base and its settings
    Show {
        /// Knowledge base name or id
        kb: String,
    },

    /// Rename or re-describe a knowledge base
    Update {
        /// Knowledge base name or id
        kb: String,

        #[arg(short, long)]
        name: Option<String>,

        /// New description; an empty string clears it
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Change indexing and search settings
    Configure(ConfigureArgs),

    /// Delete a knowledge base with all documents
    Delete {
        /// Knowledge base name or id
        kb: String,
    },

    /// Show knowledge base statistics
    Stats {
        /// Knowledge base name or id
        kb: String,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ConfigureArgs {
    /// Knowledge base name or id
    pub kb: String,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    #[arg(long)]
    pub overlap: Option<bool>,

    #[arg(long)]
    pub hybrid: Option<bool>,

    /// Weight of vector similarity in hybrid scores, 0 to 1
    #[arg(long)]
    pub alpha: Option<f32>,

    #[arg(long)]
    pub k1: Option<f32>,

    #[arg(long)]
    pub b: Option<f32>,
}
