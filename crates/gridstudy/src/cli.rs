//! Clap derive structures for the `gridstudy` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// gridstudy -- inspect a study's spreadsheet equipment cache
#[derive(Debug, Parser)]
#[command(
    name = "gridstudy",
    version,
    about = "Inspect the equipment cache of a power-grid study",
    long_about = "Loads the equipment tables a study spreadsheet would show for the\n\
        selected tree node and every built alias target, and keeps them in\n\
        sync with the study service's push notifications.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Study profile to use
    #[arg(long, short = 'p', env = "GRIDSTUDY_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Study service URL (overrides profile)
    #[arg(long, short = 's', env = "GRIDSTUDY_SERVER", global = true)]
    pub server: Option<String>,

    /// Study UUID (overrides profile)
    #[arg(long, env = "GRIDSTUDY_STUDY", global = true)]
    pub study: Option<String>,

    /// Root network UUID (overrides profile)
    #[arg(long, env = "GRIDSTUDY_ROOT_NETWORK", global = true)]
    pub root_network: Option<String>,

    /// Bearer token
    #[arg(long, env = "GRIDSTUDY_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "GRIDSTUDY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "GRIDSTUDY_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "GRIDSTUDY_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the modification tree with build status
    Tree,

    /// List node aliases
    Aliases,

    /// Show the set of built nodes the spreadsheet would display
    #[command(alias = "built")]
    BuiltNodes(NodeArgs),

    /// Load the cache once and summarize it per equipment type
    #[command(alias = "snap")]
    Snapshot(SnapshotArgs),

    /// Load one equipment type and list its records on a node
    #[command(alias = "eq")]
    Equipments(EquipmentsArgs),

    /// Keep the cache in sync and print a summary on every change
    Watch(SnapshotArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Arguments ─────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct NodeArgs {
    /// Selected tree node: UUID, node name, or alias (default: root)
    #[arg(long, short = 'n')]
    pub node: Option<String>,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Equipment types to keep loaded (repeatable; default: profile or all)
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub types: Vec<String>,

    /// Types whose optional columns should be loaded (repeatable)
    #[arg(long, value_name = "TYPE")]
    pub optional_fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct EquipmentsArgs {
    /// Equipment type tag (LOAD, LINE, TWO_WINDINGS_TRANSFORMER, ...)
    pub equipment_type: String,

    #[command(flatten)]
    pub node: NodeArgs,

    /// Also load the optional columns
    #[arg(long)]
    pub optional_fields: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile
    Init(ConfigInitArgs),

    /// Show the current configuration (tokens redacted)
    Show,

    /// Print the config file path
    Path,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store the profile's bearer token in the system keyring
    SetToken {
        /// Token value
        token: String,
    },
}

#[derive(Debug, Args)]
pub struct ConfigInitArgs {
    /// Profile name
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Study service URL
    #[arg(long = "server-url")]
    pub server: String,

    /// Study UUID
    #[arg(long = "study-uuid")]
    pub study: String,

    /// Root network UUID
    #[arg(long = "root-network-uuid")]
    pub root_network: String,

    /// Notification service URL (default: the study service URL)
    #[arg(long)]
    pub notify_server: Option<String>,

    /// Environment variable holding the bearer token
    #[arg(long)]
    pub token_env: Option<String>,

    /// Make this the default profile
    #[arg(long)]
    pub default: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
