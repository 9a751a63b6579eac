//! Clap derive structures for the `hotspot` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hotspot -- identify this device to a captive portal and keep it in sync
#[derive(Debug, Parser)]
#[command(
    name = "hotspot",
    version,
    about = "Resolve and sync this device's identity with a hotspot portal",
    long_about = "Operator CLI for hotspot captive portals.\n\n\
        Resolves the client's IP and MAC from the gateway landing URL, local\n\
        interfaces, the portal backend and public-IP services, then checks\n\
        the device's authorization with the backend.",
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
    /// Portal profile to use
    #[arg(long, short = 'p', env = "HOTSPOT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Portal backend URL (overrides profile)
    #[arg(long, short = 'b', env = "HOTSPOT_BACKEND", global = true)]
    pub backend: Option<String>,

    /// Gateway landing URL carrying identity parameters
    #[arg(long, env = "HOTSPOT_PORTAL_URL", global = true)]
    pub portal_url: Option<String>,

    /// Bearer token for an existing session
    #[arg(long, env = "HOTSPOT_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Directory for the cached identity and metrics
    #[arg(long, env = "HOTSPOT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Skip local interface discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HOTSPOT_OUTPUT",
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
    #[arg(long, short = 'k', env = "HOTSPOT_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "HOTSPOT_TIMEOUT", global = true)]
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
    /// Resolve this device's IP and MAC
    #[command(alias = "id")]
    Detect(DetectArgs),

    /// Check the device's authorization with the backend
    Sync(SyncArgs),

    /// Confirm a completed authorization flow and sync again
    Authorize,

    /// Ask the backend to drop its cached view of this device
    ClearCache(ClearCacheArgs),

    /// Follow realtime updates until interrupted
    Watch(WatchArgs),

    /// Show per-endpoint request metrics
    Metrics,

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Ignore the cached identity
    #[arg(long, short = 'f')]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Do not enter the authorization flow for unregistered devices
    #[arg(long)]
    pub no_authorization: bool,
}

#[derive(Debug, Args)]
pub struct ClearCacheArgs {
    /// Ask the backend to re-detect immediately
    #[arg(long)]
    pub force_refresh: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Resolve the identity before connecting so the channel can register
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub identify: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration (secrets redacted)
    Show,

    /// Print the config file path
    Path,

    /// List profile names
    Profiles,

    /// Add or replace a profile
    Add {
        /// Profile name
        name: String,

        /// Portal backend URL
        #[arg(long)]
        backend: String,

        /// Gateway landing URL
        #[arg(long)]
        portal_url: Option<String>,

        /// Gateway/proxy address never reported as the client (repeatable)
        #[arg(long = "deny")]
        denylist: Vec<String>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store a bearer token in the system keyring
    SetToken {
        /// Token value
        token: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
