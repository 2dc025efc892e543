//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// blobcache - Remote artifact cache for CI pipelines
///
/// Restores and saves filesystem snapshots keyed by a primary key in
/// Azure Blob Storage.
#[derive(Parser, Debug)]
#[command(name = "blobcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BLOBCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .blobcache.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Run state file shared by the restore and save phases
    #[arg(long, global = true, env = "BLOBCACHE_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore a snapshot for the primary key (first phase of a run)
    Restore(RestoreArgs),

    /// Capture and upload files on a prior miss (second phase)
    Save(SaveArgs),
}

/// Remote store selection, shared by both phases
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Storage account connection string; selects the named-container
    /// binding when non-empty
    #[arg(long, env = "BLOBCACHE_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Storage container name
    #[arg(long, env = "BLOBCACHE_CONTAINER")]
    pub container: Option<String>,

    /// Blob service URL for the default-identity binding
    #[arg(long, env = "BLOBCACHE_URL")]
    pub url: Option<String>,

    /// Managed identity client id for the default-identity binding
    #[arg(long, env = "BLOBCACHE_CLIENT_ID")]
    pub client_id: Option<String>,
}

/// Arguments for the restore command
#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Primary cache key
    #[arg(short, long)]
    pub key: String,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Treat a restore miss or failure as a hard failure
    #[arg(long)]
    pub fail_on_miss: bool,
}

/// Arguments for the save command
#[derive(Parser, Debug)]
pub struct SaveArgs {
    /// Newline-delimited path patterns to capture (falls back to the
    /// configured cache.paths)
    #[arg(short, long)]
    pub path: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,
}
