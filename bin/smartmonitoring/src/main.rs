//! smartmonitoring is the host-resident agent that installs, updates, and
//! supervises the SmartMonitoring container stack.

mod cli;

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Commands, StatusArgs, UpdateArgs, ValidateConfigArgs};
use smartmonitoring_core::config::AgentConfig;
use smartmonitoring_core::controller::{ConfirmationPrompt, DeploymentController, SilentAuto};
use smartmonitoring_core::manifest_store::ManifestStore;
use smartmonitoring_core::paths::Paths;
use smartmonitoring_core::runtime::DockerRuntime;
use smartmonitoring_core::state_store::StateStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    if !running_as_root() {
        eprintln!("smartmonitoring must run as root to manage the container runtime and /etc/smartmonitoring");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let paths = Paths::production();
    std::fs::create_dir_all(paths.log_dir()).ok();
    let file_appender = tracing_appender::rolling::daily(paths.log_dir(), "smartmonitoring.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive every tracing call for
    // the process's full lifetime, and main() never returns early enough
    // to drop it deterministically.
    std::mem::forget(guard);

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid takes no arguments and never fails.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}

struct StdinConfirm;

impl ConfirmationPrompt for StdinConfirm {
    fn confirm(&self, diff: &str) -> bool {
        println!("The following configuration change will be applied:\n{diff}");
        print!("Proceed? [y/N] ");
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = Paths::production();
    let agent_config = AgentConfig::load(&paths).context("failed to load agent configuration")?;

    match cli.command {
        Commands::ValidateConfig(args) => return validate_config(&paths, args),
        Commands::Status(args) => return print_status(&paths, args).await,
        _ => {}
    }

    let runtime = DockerRuntime::connect().await.context("failed to connect to the Docker runtime")?;
    let controller = DeploymentController::new(paths, agent_config, runtime);

    match cli.command {
        Commands::Deploy => {
            controller.deploy().await.context("deploy failed")?;
            summary(cli.silent, "deployed");
        }
        Commands::Undeploy => {
            controller.undeploy().await.context("undeploy failed")?;
            summary(cli.silent, "undeployed");
        }
        Commands::Update(UpdateArgs { force }) => {
            controller.update(force).await.context("update failed")?;
            summary(cli.silent, "update complete");
        }
        Commands::Restart => {
            controller.restart().await.context("restart failed")?;
            summary(cli.silent, "restarted");
        }
        Commands::ApplyConfig => {
            let prompt: Box<dyn ConfirmationPrompt> = if cli.silent { Box::new(SilentAuto) } else { Box::new(StdinConfirm) };
            controller.apply_config(prompt.as_ref()).await.context("apply-config failed")?;
            summary(cli.silent, "configuration applied");
        }
        Commands::ValidateConfig(_) | Commands::Status(_) => unreachable!("handled above"),
    }

    Ok(())
}

fn summary(silent: bool, message: &str) {
    if !silent {
        println!("{message}");
    }
}

fn validate_config(paths: &Paths, args: ValidateConfigArgs) -> Result<()> {
    let store = ManifestStore::new(paths.clone());
    let raw = match &args.config {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?,
        None => std::fs::read_to_string(paths.local_config_file())
            .context("cannot read the installed local config")?,
    };
    let config = store.parse_local_config(&raw).context("local config is invalid")?;
    println!("local config is valid");

    if let Some(manifest_path) = &args.manifest {
        let raw = std::fs::read_to_string(manifest_path).with_context(|| format!("cannot read {manifest_path}"))?;
        store
            .parse_manifest(&raw, config.update_channel)
            .context("manifest is invalid")?;
        println!("manifest is valid for channel {}", config.update_channel);
    }
    Ok(())
}

async fn print_status(paths: &Paths, args: StatusArgs) -> Result<()> {
    let state_store = StateStore::new(paths.clone());
    let status = state_store.load_status().context("no status recorded yet")?;

    if args.banner_version {
        println!("smartmonitoring {}", env!("CARGO_PKG_VERSION"));
    }
    println!("status: {}", status.status);
    if let Some(version) = &status.package_version {
        println!("version: {version}");
    }
    if let Some(channel) = &status.update_channel {
        println!("channel: {channel}");
    }
    if let Some(err) = &status.error_msg {
        println!("error: {err}");
    }

    if !state_store.is_deployed() {
        return Ok(());
    }

    let stack = state_store.load_installed_stack().context("installed stack is corrupt")?;
    if args.disable_refresh {
        return Ok(());
    }

    let runtime = DockerRuntime::connect().await.context("failed to connect to the Docker runtime")?;
    let names: Vec<String> = stack.manifest.containers.iter().map(|c| c.name.clone()).collect();
    let stats = smartmonitoring_core::runtime::ContainerRuntime::stats_all(&runtime, &names).await;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["container", "image", "status", "mem (mb)", "cpu %"]);
    for stat in stats {
        table.add_row(vec![
            stat.name,
            stat.image.unwrap_or_else(|| "-".to_string()),
            format!("{:?}", stat.status),
            stat.mem_mb.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string()),
            stat.cpu_pct.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");

    Ok(())
}
