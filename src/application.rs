//! Application entry point and builder pattern implementation.

use crate::{
    config::ConfigManager,
    coordinator::SystemCoordinator,
    engine::{Command, ControlEngine},
    providers::{AsyncProvider, BackendProvider, build_engine},
    snapshot::ControlSnapshot,
};
use anyhow::{Context, Result, anyhow};
use log::info;

/// Main application structure that orchestrates all daemon components.
///
/// # Example
///
/// ```no_run
/// use smc_fand::application::Application;
/// use smc_fand::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()
///     .await?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and run main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await?;

        Ok(())
    }

    /// Samples once, applies `command` if given and returns the resulting
    /// snapshot. No service is started and no automatic control pass runs,
    /// so only the command itself writes to the hardware.
    pub async fn run_once(&self, command: Option<Command>) -> Result<ControlSnapshot> {
        let config = self.config_manager.clone_config().await;
        let backend = BackendProvider::new(self.config_manager.clone())
            .provide()
            .await
            .context("Failed to select telemetry backend")?;

        tokio::task::spawn_blocking(move || one_shot(build_engine(backend, &config), command))
            .await
            .map_err(|e| anyhow!("One-shot control step panicked: {e}"))?
    }
}

fn one_shot(mut engine: ControlEngine, command: Option<Command>) -> Result<ControlSnapshot> {
    let snapshot = engine.sample();
    let Some(command) = command else {
        return Ok(snapshot);
    };

    info!("Applying {command:?}");
    engine
        .execute(command.clone())
        .with_context(|| format!("Failed to apply {command:?}"))?;
    Ok(engine.snapshot())
}

/// Builder pattern for creating Application instances.
///
/// Provides a fluent interface for configuring the application before startup.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    /// Sets the configuration manager for the application.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Builds the Application instance with the provided configuration.
    pub async fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;
        let coordinator = SystemCoordinator::new();

        Ok(Application {
            coordinator,
            config_manager,
        })
    }
}
