use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinError;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    engine::{Command, ControlEngine},
    error::ControlError,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    snapshot::ControlSnapshot,
    task_manager::TaskManager,
};

const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub tick: Duration,
    /// Longest wait for an in-flight tick once stop is requested.
    pub shutdown_grace: Duration,
    pub restore_automatic_on_exit: bool,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
            restore_automatic_on_exit: config.restore_automatic_on_exit,
        }
    }
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), ControlError>>,
}

/// Client side of the control loop: latest snapshot plus manual overrides.
///
/// Commands are queued and run between ticks, one at a time.
#[derive(Clone)]
pub struct FanControlHandle {
    commands: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Arc<ControlSnapshot>>,
}

impl FanControlHandle {
    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlSnapshot>> {
        self.snapshots.clone()
    }

    pub async fn set_target_temperature(&self, celsius: f32) -> Result<(), ControlError> {
        self.send(Command::SetTargetTemperature(celsius)).await
    }

    pub async fn set_automatic(&self, enabled: bool) -> Result<(), ControlError> {
        self.send(Command::SetAutomatic(enabled)).await
    }

    pub async fn set_fan_speed(&self, index: usize, rpm: u32) -> Result<(), ControlError> {
        self.send(Command::SetFanSpeed { index, rpm }).await
    }

    async fn send(&self, command: Command) -> Result<(), ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| ControlError::LoopStopped)?;
        response.await.map_err(|_| ControlError::LoopStopped)?
    }
}

struct LoopState {
    engine: ControlEngine,
    commands: mpsc::Receiver<Request>,
    snapshots: watch::Sender<Arc<ControlSnapshot>>,
}

/// Fan control loop service provider.
///
/// Owns the [`ControlEngine`]: ticks it on a fixed interval, runs queued
/// commands in between and publishes each resulting snapshot.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes (the daemon has no purpose without it)
///
/// # Example
///
/// ```no_run
/// use smc_fand::backend::Backend;
/// use smc_fand::engine::{ControlEngine, EngineSettings};
/// use smc_fand::event::EventBus;
/// use smc_fand::providers::control_loop::{ControlLoopServiceProvider, LoopSettings};
/// use std::time::Duration;
///
/// let engine = ControlEngine::new(
///     Backend::Unavailable { reason: "demo".to_string() },
///     EngineSettings::default(),
/// );
/// let settings = LoopSettings {
///     tick: Duration::from_secs(2),
///     shutdown_grace: Duration::from_secs(3),
///     restore_automatic_on_exit: true,
/// };
/// let (provider, handle) = ControlLoopServiceProvider::new(engine, settings, EventBus::new());
/// // Start `provider` through TaskManager, then use `handle`.
/// ```
pub struct ControlLoopServiceProvider {
    state: Mutex<Option<LoopState>>,
    settings: LoopSettings,
    event_bus: EventBus,
}

impl ControlLoopServiceProvider {
    pub fn new(
        engine: ControlEngine,
        settings: LoopSettings,
        event_bus: EventBus,
    ) -> (Self, FanControlHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshots, snapshots_rx) = watch::channel(Arc::new(engine.snapshot()));

        let provider = Self {
            state: Mutex::new(Some(LoopState {
                engine,
                commands,
                snapshots,
            })),
            settings,
            event_bus,
        };
        let handle = FanControlHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (provider, handle)
    }
}

#[async_trait]
impl ServiceProvider for ControlLoopServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self
            .state
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("Control loop already started"))?;
        let settings = self.settings;
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_control_loop(state, settings, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ControlLoopService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_control_loop(
    state: LoopState,
    settings: LoopSettings,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let LoopState {
        engine,
        mut commands,
        snapshots,
    } = state;
    let mut engine = Some(engine);
    let mut commands_open = true;

    let mut interval = interval(settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !cancel_token.is_cancelled() {
        let Some(current) = engine.take() else {
            break;
        };

        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                engine = Some(current);
            }
            _instant = interval.tick() => {
                let Some((next, snapshot)) = run_on_worker(
                    current,
                    &cancel_token,
                    settings.shutdown_grace,
                    ControlEngine::tick,
                )
                .await?
                else {
                    return Ok(());
                };
                engine = Some(next);
                publish(&snapshots, &event_bus, snapshot);
            }
            request = commands.recv(), if commands_open => match request {
                Some(Request { command, reply }) => {
                    let Some((next, (result, snapshot))) = run_on_worker(
                        current,
                        &cancel_token,
                        settings.shutdown_grace,
                        move |engine| (engine.execute(command), engine.snapshot()),
                    )
                    .await?
                    else {
                        return Ok(());
                    };
                    engine = Some(next);
                    publish(&snapshots, &event_bus, snapshot);
                    if reply.send(result).is_err() {
                        debug!("Command issuer went away before the reply");
                    }
                }
                None => {
                    debug!("All control handles dropped");
                    commands_open = false;
                    engine = Some(current);
                }
            },
        }
    }

    info!("Control loop cancelled");
    if let Some(engine) = engine {
        restore_and_release(engine, &settings).await;
    }
    Ok(())
}

/// Runs `work` on the blocking pool. Returns `Ok(None)` if the stop signal
/// arrived and the work did not finish within `grace`; the engine is then
/// dropped by the worker once it completes.
async fn run_on_worker<T, F>(
    engine: ControlEngine,
    cancel_token: &CancellationToken,
    grace: Duration,
    work: F,
) -> Result<Option<(ControlEngine, T)>>
where
    F: FnOnce(&mut ControlEngine) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let output = work(&mut engine);
        (engine, output)
    });

    tokio::select! {
        joined = &mut handle => return joined_result(joined).map(Some),
        () = cancel_token.cancelled() => {}
    }

    match tokio::time::timeout(grace, handle).await {
        Ok(joined) => joined_result(joined).map(Some),
        Err(_) => {
            warn!(
                "In-flight control step exceeded {}ms shutdown grace; abandoning it",
                grace.as_millis()
            );
            Ok(None)
        }
    }
}

fn joined_result<T>(joined: Result<T, JoinError>) -> Result<T> {
    joined.context("Control engine worker panicked")
}

async fn restore_and_release(engine: ControlEngine, settings: &LoopSettings) {
    if !settings.restore_automatic_on_exit {
        return;
    }
    let restore = tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        engine.set_automatic(true)
    });
    match tokio::time::timeout(settings.shutdown_grace, restore).await {
        Ok(Ok(Ok(()))) => info!("Fans returned to automatic mode"),
        Ok(Ok(Err(e))) => warn!("Could not return fans to automatic mode: {e}"),
        Ok(Err(e)) => error!("Restoring automatic mode panicked: {e}"),
        Err(_) => warn!("Restoring automatic mode timed out"),
    }
}

fn publish(
    snapshots: &watch::Sender<Arc<ControlSnapshot>>,
    event_bus: &EventBus,
    snapshot: ControlSnapshot,
) {
    let (connected, automatic, reason) =
        (snapshot.connected, snapshot.automatic, snapshot.error.clone());
    let previous = snapshots.send_replace(Arc::new(snapshot));

    if previous.connected != connected {
        notify(event_bus, Event::HealthChanged { connected, reason });
    }
    if previous.automatic != automatic {
        notify(event_bus, Event::ModeChanged { automatic });
    }
}

fn notify(event_bus: &EventBus, event: Event) {
    if let Err(e) = event_bus.publish(event) {
        debug!("No event subscribers: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::engine::EngineSettings;
    use crate::error::ChannelError;
    use crate::inventory::HardwareInventory;
    use crate::smc::fake::FakeSmc;
    use crate::smc::{ManagementKey, SmcChannel, TypedValue};
    use crate::snapshot::FanMode;
    use pretty_assertions::assert_eq;
    use std::time::Instant;
    use tokio::time::timeout;

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            tick: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(50),
            restore_automatic_on_exit: true,
        }
    }

    fn engine_for(channel: Box<dyn SmcChannel>) -> ControlEngine {
        ControlEngine::new(
            Backend::Primary(HardwareInventory::new(channel)),
            EngineSettings::default(),
        )
    }

    async fn started(
        smc: &FakeSmc,
        settings: LoopSettings,
        event_bus: EventBus,
    ) -> (TaskManager, FanControlHandle) {
        let (provider, handle) =
            ControlLoopServiceProvider::new(engine_for(smc.channel()), settings, event_bus);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        (task_manager, handle)
    }

    async fn wait_for<F>(handle: &FanControlHandle, predicate: F) -> Arc<ControlSnapshot>
    where
        F: Fn(&ControlSnapshot) -> bool,
    {
        let mut rx = handle.subscribe();
        timeout(Duration::from_secs(2), async {
            loop {
                let current = rx.borrow_and_update().clone();
                if predicate(&current) {
                    return current;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    fn smc() -> FakeSmc {
        FakeSmc::new()
            .with_fan(0, 1000, 6000, 1500)
            .with_fan(1, 1000, 6000, 1600)
            .with_temperature("TC0P", 70.0)
    }

    #[tokio::test]
    async fn first_tick_is_eager() {
        let smc = smc();
        let settings = LoopSettings {
            tick: Duration::from_secs(3600),
            ..fast_settings()
        };
        let (mut task_manager, handle) = started(&smc, settings, EventBus::new()).await;

        let snapshot = wait_for(&handle, |s| s.sequence >= 1).await;
        assert_eq!(snapshot.fans.len(), 2);
        assert_eq!(snapshot.fans[0].target_rpm, Some(3500));

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn override_is_visible_in_next_snapshot() {
        let smc = smc();
        let (mut task_manager, handle) = started(&smc, fast_settings(), EventBus::new()).await;

        handle.set_fan_speed(1, 4500).await.unwrap();
        let snapshot = handle.snapshot();
        assert!(!snapshot.automatic);
        assert_eq!(snapshot.fans[1].mode, FanMode::Manual);
        assert_eq!(smc.value("F1Tg"), Some(TypedValue::fan_speed(4500)));

        assert_eq!(
            handle.set_fan_speed(9, 1000).await,
            Err(ControlError::InvalidFan(9))
        );

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn stop_restores_automatic_mode() {
        let smc = smc();
        let (mut task_manager, handle) = started(&smc, fast_settings(), EventBus::new()).await;
        handle.set_fan_speed(0, 5000).await.unwrap();
        assert_eq!(smc.value("F0Md"), Some(TypedValue::mode(1)));

        task_manager.shutdown_all().await.unwrap();

        assert_eq!(smc.value("F0Md"), Some(TypedValue::mode(0)));
        assert_eq!(smc.value("F1Md"), Some(TypedValue::mode(0)));
        assert_eq!(
            handle.set_automatic(true).await,
            Err(ControlError::LoopStopped)
        );
    }

    #[tokio::test]
    async fn restore_can_be_disabled() {
        let smc = smc();
        let settings = LoopSettings {
            restore_automatic_on_exit: false,
            ..fast_settings()
        };
        let (mut task_manager, handle) = started(&smc, settings, EventBus::new()).await;
        handle.set_fan_speed(0, 5000).await.unwrap();

        task_manager.shutdown_all().await.unwrap();
        assert_eq!(smc.value("F0Md"), Some(TypedValue::mode(1)));
    }

    #[tokio::test]
    async fn publishes_health_and_mode_changes() {
        let smc = smc();
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let (mut task_manager, handle) = started(&smc, fast_settings(), event_bus).await;

        handle.set_automatic(false).await.unwrap();
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::ModeChanged { automatic: false });

        smc.close();
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            Event::HealthChanged {
                connected: false,
                reason: Some(_)
            }
        ));

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn target_change_applies_on_following_tick() {
        let smc = smc();
        let (mut task_manager, handle) = started(&smc, fast_settings(), EventBus::new()).await;

        handle.set_target_temperature(50.0).await.unwrap();
        let snapshot = wait_for(&handle, |s| s.fans[0].target_rpm == Some(6000)).await;
        assert_eq!(snapshot.target_temperature, 50.0);

        task_manager.shutdown_all().await.unwrap();
    }

    /// Delays every read of one key while armed.
    struct SlowSmc {
        inner: FakeSmc,
        slow_key: ManagementKey,
        delay: Arc<std::sync::Mutex<Duration>>,
    }

    impl SmcChannel for SlowSmc {
        fn read(&mut self, key: ManagementKey) -> Result<TypedValue, ChannelError> {
            if key == self.slow_key {
                let delay = *self.delay.lock().unwrap();
                std::thread::sleep(delay);
            }
            self.inner.read(key)
        }

        fn write(&mut self, key: ManagementKey, value: &TypedValue) -> Result<(), ChannelError> {
            self.inner.write(key, value)
        }
    }

    #[tokio::test]
    async fn shutdown_abandons_slow_tick_after_grace() {
        let fake = FakeSmc::new()
            .with_fan(0, 1000, 6000, 1500)
            .with_temperature("TC0P", 40.0);
        let delay = Arc::new(std::sync::Mutex::new(Duration::ZERO));
        let channel = SlowSmc {
            inner: fake.clone(),
            slow_key: ManagementKey::new("F0Ac"),
            delay: delay.clone(),
        };
        let (provider, handle) = ControlLoopServiceProvider::new(
            engine_for(Box::new(channel)),
            fast_settings(),
            EventBus::new(),
        );
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        wait_for(&handle, |s| s.sequence >= 1).await;

        *delay.lock().unwrap() = Duration::from_millis(600);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let started_at = Instant::now();
        task_manager.shutdown_all().await.unwrap();
        assert!(started_at.elapsed() < Duration::from_millis(500));
        assert_eq!(
            handle.set_automatic(true).await,
            Err(ControlError::LoopStopped)
        );
    }

    #[tokio::test]
    async fn provider_starts_only_once() {
        let smc = smc();
        let (provider, _handle) =
            ControlLoopServiceProvider::new(engine_for(smc.channel()), fast_settings(), EventBus::new());
        let mut task_manager = TaskManager::new();

        provider.start(&mut task_manager).await.unwrap();
        assert!(provider.start(&mut task_manager).await.is_err());
        assert_eq!(provider.name(), "ControlLoopService");
        assert!(provider.is_critical());

        task_manager.shutdown_all().await.unwrap();
    }
}
