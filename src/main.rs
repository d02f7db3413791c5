use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use smc_fand::{
    application::Application,
    cli::{Cli, Commands},
    config::ConfigManager,
    engine::Command,
};

const DAEMON_LOG: &str = "/var/tmp/smc_fand.log";

fn init_log(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "smc_fand".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
    .context("Failed to initialize syslog")
}

fn into_daemon() -> Result<()> {
    File::create(DAEMON_LOG)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
        .context("Failed to daemonize")
}

async fn load_config(cli: &Cli) -> Result<ConfigManager> {
    let config_manager = ConfigManager::load(cli.config.clone()).await?;
    if let Some(target) = cli.target {
        config_manager.override_target_temperature(target).await?;
    }
    Ok(config_manager)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_manager = load_config(&cli).await?;
    let mut app = Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?;

    let one_shot = match cli.action() {
        Commands::Run => return app.run().await,
        Commands::Status => None,
        Commands::SetSpeed { fan, rpm } => Some(Command::SetFanSpeed { index: fan, rpm }),
        Commands::Auto => Some(Command::SetAutomatic(true)),
    };

    let snapshot = app.run_once(one_shot).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.verbose)?;

    // Fork before the runtime starts its worker threads.
    if cli.daemonize && cli.action() == Commands::Run {
        into_daemon()?;
    }

    info!("smc_fand {} starting", env!("CARGO_PKG_VERSION"));
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?
        .block_on(dispatch(cli))
}
