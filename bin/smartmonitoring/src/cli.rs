use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "smartmonitoring")]
#[command(author, version, about = "Install, update, and supervise the SmartMonitoring container stack")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SMARTMONITORING_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Suppress the human-readable summary line; still exits non-zero on failure.
    #[arg(long, env = "SMARTMONITORING_SILENT", default_value_t = false)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser)]
pub enum Commands {
    /// Fetch the manifest for the configured channel and install the stack.
    Deploy,
    /// Stop and remove every declared container, the private network, and local state.
    Undeploy,
    /// Check the remote manifest for a newer version and replace the running stack.
    Update(UpdateArgs),
    /// Restart every container in the installed stack without touching state.
    Restart,
    /// Reconcile a changed local config against the installed manifest.
    ApplyConfig,
    /// Validate the local config file (and optionally a manifest file) without deploying.
    ValidateConfig(ValidateConfigArgs),
    /// Print the current deployment status.
    Status(StatusArgs),
}

#[derive(Parser, Default)]
pub struct UpdateArgs {
    /// Proceed even if the remote version is not newer than the installed one.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Parser)]
pub struct ValidateConfigArgs {
    /// Path to a local config YAML file; defaults to the installed one.
    #[arg(long)]
    pub config: Option<String>,
    /// Path to a manifest YAML file to validate against the given config's channel.
    #[arg(long)]
    pub manifest: Option<String>,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Print a single static snapshot instead of leaving room for a future live view.
    #[arg(long, default_value_t = false)]
    pub disable_refresh: bool,
    /// Include the agent's own crate version in the printed banner.
    #[arg(long, default_value_t = false)]
    pub banner_version: bool,
}
