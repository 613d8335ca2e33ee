//! CLI front-end for the Process Supervisor: `start`, `stop`, `restart`,
//! `status`, and `maintenance {on,off}`. Exit codes: 0 success, 1 failure.

use clap::{Parser, Subcommand};
use dca_engine::application::supervisor::{ProcessSupervisor, ProcessStatus};
use std::process::{Command, ExitCode};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "dca-supervisor")]
struct Cli {
    #[command(subcommand)]
    command: SupervisorCommand,

    #[arg(long, env = "DCA_PID_FILE", default_value = "/tmp/dca-engine.pid")]
    pid_file: String,

    #[arg(long, env = "DCA_MAINTENANCE_SENTINEL", default_value = "/tmp/dca-engine.maintenance")]
    maintenance_sentinel: String,
}

#[derive(Subcommand)]
enum SupervisorCommand {
    Start,
    Stop,
    Restart,
    Status,
    Maintenance {
        #[arg(value_enum)]
        mode: MaintenanceMode,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum MaintenanceMode {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let supervisor = ProcessSupervisor::new(cli.pid_file, cli.maintenance_sentinel);

    let result = match cli.command {
        SupervisorCommand::Start => start(&supervisor),
        SupervisorCommand::Stop => supervisor.stop(Duration::from_secs(10)).await,
        SupervisorCommand::Restart => {
            if let Err(e) = supervisor.stop(Duration::from_secs(10)).await {
                error!("restart: stop phase failed: {e}");
                return ExitCode::FAILURE;
            }
            start(&supervisor)
        }
        SupervisorCommand::Status => report_status(&supervisor),
        SupervisorCommand::Maintenance { mode } => {
            supervisor.set_maintenance(matches!(mode, MaintenanceMode::On))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn start(supervisor: &ProcessSupervisor) -> anyhow::Result<()> {
    if let ProcessStatus::Running(pid) = supervisor.status()? {
        info!(pid, "dca-server is already running");
        return Ok(());
    }

    let exe = std::env::current_exe()?
        .parent()
        .map(|dir| dir.join("dca-server"))
        .unwrap_or_else(|| "dca-server".into());

    Command::new(exe).spawn().map_err(|e| anyhow::anyhow!("failed to spawn dca-server: {e}"))?;
    info!("dca-server launch requested");
    Ok(())
}

fn report_status(supervisor: &ProcessSupervisor) -> anyhow::Result<()> {
    match supervisor.status()? {
        ProcessStatus::Running(pid) => info!(pid, "dca-server is running"),
        ProcessStatus::NotRunning => info!("dca-server is not running"),
    }
    Ok(())
}
