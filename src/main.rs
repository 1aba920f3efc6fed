mod cli;
mod commands;
mod config;
mod error;
mod poll;
mod remote;
mod session;
mod shutdown;
mod state;
mod supervisor;
mod telemetry;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::{ConsoleConfig, Credentials};
use remote::NodeClient;
use session::{Session, SessionOptions};
use supervisor::WorkerLaunch;

fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli, dotenv));
    // the stdin reader sits in a blocking read that cannot be cancelled
    runtime.shutdown_timeout(Duration::from_millis(250));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "node console failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, dotenv: dotenvy::Result<std::path::PathBuf>) -> anyhow::Result<()> {
    let mut config =
        ConsoleConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    telemetry::init_telemetry(cli.verbose, &config.log_level);
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => tracing::debug!("no .env file found"),
        Err(e) => tracing::warn!(error = %e, "failed to read .env"),
    }

    let credentials = Credentials::from_env().context("node credentials are not configured")?;
    tracing::debug!(?credentials, "credentials loaded");

    let client = NodeClient::new(&credentials, config.request_timeout())
        .context("failed to build node API client")?;
    let launch = WorkerLaunch::from_config(&config.worker, &credentials.server_url);
    let options = SessionOptions {
        dashboard: !cli.no_dashboard,
        interactive: true,
    };

    let session = Session::new(config, launch, Arc::new(client), options);
    let trigger = session.run().await?;
    tracing::info!(%trigger, "node console exited");
    Ok(())
}
