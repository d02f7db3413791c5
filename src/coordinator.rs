//! System coordinator for managing service lifecycle and dependency injection.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    config::ConfigManager,
    event::{Event, EventBus},
    providers::{
        AsyncProvider, BackendProvider, ControlLoopServiceProvider, FanControlHandle,
        LoopSettings, ServiceProvider, StatusReportServiceProvider, build_engine,
    },
    task_manager::TaskManager,
};

/// Slack on top of the loop's own grace period before a task counts as stuck.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

/// Owns every service of the daemon.
///
/// Services are started in priority order. A critical service failing to
/// start aborts startup; any other failure is logged and skipped.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    handle: Option<FanControlHandle>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            handle: None,
            service_providers: Vec::new(),
        }
    }

    /// Selects the backend, builds the engine and registers the services.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");
        let config = config_manager.clone_config().await;

        let backend = BackendProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to select telemetry backend")?;
        info!("Telemetry backend: {:?}", backend.kind());

        let engine = build_engine(backend, &config);
        let settings = LoopSettings::from(&config);
        self.task_manager =
            TaskManager::with_shutdown_timeout(settings.shutdown_grace * 2 + SHUTDOWN_MARGIN);

        let (control_loop, handle) =
            ControlLoopServiceProvider::new(engine, settings, self.event_bus.clone());
        let status_report = StatusReportServiceProvider::new(handle.subscribe());
        self.handle = Some(handle);

        let mut providers: Vec<Box<dyn ServiceProvider>> =
            vec![Box::new(control_loop), Box::new(status_report)];
        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started successfully (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {}",
                        provider.name(),
                        e
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a stop signal or a shutdown event, then stops every service.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = shutdown_signal() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received stop signal, initiating graceful shutdown...");
                    break;
                }

                event = event_rx.recv() => {
                    if !self.handle_event(event)? {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `false` once the daemon should stop.
    fn handle_event(&self, event_result: Result<Event, RecvError>) -> Result<bool> {
        match event_result {
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(false);
            }
            Ok(Event::HealthChanged {
                connected: true, ..
            }) => info!("SMC connection healthy"),
            Ok(Event::HealthChanged {
                connected: false,
                reason,
            }) => warn!(
                "SMC connection lost: {}",
                reason.as_deref().unwrap_or("unknown reason")
            ),
            Ok(Event::ModeChanged { automatic }) => {
                info!(
                    "Automatic fan control {}",
                    if automatic { "enabled" } else { "disabled" }
                );
            }
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
            Err(RecvError::Lagged(n)) => warn!("Event bus lagged by {n} messages"),
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {:#}", e);
        }

        info!("Shutdown complete");
    }

    /// Control surface of the running loop; `None` before [`initialize`].
    ///
    /// [`initialize`]: SystemCoordinator::initialize
    pub fn handle(&self) -> Option<&FanControlHandle> {
        self.handle.as_ref()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| anyhow!(e)),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.map_err(|e| anyhow!(e))
}
