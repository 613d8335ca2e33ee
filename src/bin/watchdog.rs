//! External watchdog, intended to be scheduled (e.g. by cron) separately
//! from the Live Event Loop. Checks the pid file: if the process is dead
//! and maintenance mode is not active, restarts it and emits an alert.

use clap::Parser;
use dca_engine::application::supervisor::watchdog_should_restart;
use std::process::{Command, ExitCode};
use tracing::{error, info, warn, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "dca-watchdog")]
struct Cli {
    #[arg(long, env = "DCA_PID_FILE", default_value = "/tmp/dca-engine.pid")]
    pid_file: String,

    #[arg(long, env = "DCA_MAINTENANCE_SENTINEL", default_value = "/tmp/dca-engine.maintenance")]
    maintenance_sentinel: String,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let pid_file = std::path::Path::new(&cli.pid_file);
    let maintenance_sentinel = std::path::Path::new(&cli.maintenance_sentinel);

    if !watchdog_should_restart(pid_file, maintenance_sentinel) {
        info!("dca-server is alive or maintenance mode is active; nothing to do");
        return ExitCode::SUCCESS;
    }

    warn!("dca-server is not running and maintenance mode is inactive; restarting");

    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("dca-server")))
        .unwrap_or_else(|| "dca-server".into());

    match Command::new(exe).spawn() {
        Ok(_) => {
            info!("dca-server restart requested by watchdog");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("watchdog failed to restart dca-server: {e}");
            ExitCode::FAILURE
        }
    }
}
