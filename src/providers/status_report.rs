use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::{StreamExt, wrappers::WatchStream};
use tokio_util::sync::CancellationToken;

use crate::{
    providers::traits::ServiceProvider,
    snapshot::{ControlSnapshot, FanMode},
    task_manager::TaskManager,
};

/// Temperature movement that is worth a log line on its own.
const TEMPERATURE_STEP: f32 = 0.5;

/// Status report service provider.
///
/// Follows published snapshots and logs a one-line summary whenever
/// something an operator would care about changes.
///
/// # Priority and Criticality
///
/// - **Priority**: 3 (low)
/// - **Critical**: No (optional service)
pub struct StatusReportServiceProvider {
    snapshots: watch::Receiver<Arc<ControlSnapshot>>,
}

impl StatusReportServiceProvider {
    pub fn new(snapshots: watch::Receiver<Arc<ControlSnapshot>>) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl ServiceProvider for StatusReportServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let snapshots = self.snapshots.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_status_report(snapshots, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "StatusReportService"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn is_critical(&self) -> bool {
        false
    }
}

async fn run_status_report(
    snapshots: watch::Receiver<Arc<ControlSnapshot>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut stream = WatchStream::new(snapshots);
    let mut last: Option<Arc<ControlSnapshot>> = None;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Status report service cancelled");
                break;
            }
            next = stream.next() => {
                let Some(snapshot) = next else {
                    info!("Control loop gone; status reports stop");
                    break;
                };
                if worth_reporting(last.as_deref(), &snapshot) {
                    report(&snapshot);
                    last = Some(snapshot);
                }
            }
        }
    }
    Ok(())
}

fn report(snapshot: &ControlSnapshot) {
    let line = summarize(snapshot);
    if snapshot.connected {
        info!("{line}");
    } else {
        warn!("{line}");
    }
}

pub fn worth_reporting(previous: Option<&ControlSnapshot>, next: &ControlSnapshot) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if previous.connected != next.connected
        || previous.automatic != next.automatic
        || previous.provider != next.provider
        || previous.error != next.error
    {
        return true;
    }

    let modes = |s: &ControlSnapshot| s.fans.iter().map(|f| f.mode).collect::<Vec<FanMode>>();
    if modes(previous) != modes(next) {
        return true;
    }

    match (previous.hottest(), next.hottest()) {
        (Some(a), Some(b)) => (a.celsius - b.celsius).abs() >= TEMPERATURE_STEP,
        (None, None) => false,
        _ => true,
    }
}

pub fn summarize(snapshot: &ControlSnapshot) -> String {
    let mut line = format!("[{:?}]", snapshot.provider).to_lowercase();

    match snapshot.hottest() {
        Some(t) => line.push_str(&format!(" {} {:.1}°C", t.name, t.celsius)),
        None => line.push_str(" no temperature"),
    }
    line.push_str(&format!(" (target {:.1}°C)", snapshot.target_temperature));

    for fan in &snapshot.fans {
        line.push_str(&format!(" | {} {} RPM", fan.name, fan.current_rpm));
        if fan.mode == FanMode::Manual {
            line.push_str(" manual");
        }
        if fan.stale {
            line.push_str(" stale");
        }
    }

    if !snapshot.automatic {
        line.push_str(" | automatic off");
    }
    if let Some(error) = &snapshot.error {
        line.push_str(&format!(" | {error}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc::ManagementKey;
    use crate::snapshot::{FanState, ProviderKind, TemperatureReading};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn snapshot(celsius: f32) -> ControlSnapshot {
        ControlSnapshot {
            sequence: 1,
            fans: vec![FanState {
                index: 0,
                name: "Left fan".to_string(),
                current_rpm: 2000,
                min_rpm: 1200,
                max_rpm: 6000,
                target_rpm: Some(2000),
                mode: FanMode::Automatic,
                stale: false,
            }],
            temperatures: vec![TemperatureReading {
                key: ManagementKey::new("TC0P"),
                name: "CPU Proximity".to_string(),
                celsius,
            }],
            automatic: true,
            target_temperature: 60.0,
            connected: true,
            provider: ProviderKind::Primary,
            error: None,
        }
    }

    #[test]
    fn first_snapshot_is_reported() {
        assert!(worth_reporting(None, &snapshot(50.0)));
    }

    #[test]
    fn small_temperature_drift_is_quiet() {
        assert!(!worth_reporting(Some(&snapshot(50.0)), &snapshot(50.25)));
        assert!(worth_reporting(Some(&snapshot(50.0)), &snapshot(50.75)));
    }

    #[test]
    fn state_changes_are_reported() {
        let base = snapshot(50.0);

        let mut manual = base.clone();
        manual.fans[0].mode = FanMode::Manual;
        assert!(worth_reporting(Some(&base), &manual));

        let mut lost = base.clone();
        lost.connected = false;
        lost.error = Some("SMC connection closed".to_string());
        assert!(worth_reporting(Some(&base), &lost));

        let mut cooled = base.clone();
        cooled.temperatures.clear();
        assert!(worth_reporting(Some(&base), &cooled));
    }

    #[test]
    fn summary_names_hottest_sensor_and_fans() {
        let mut s = snapshot(71.3);
        s.fans[0].mode = FanMode::Manual;
        s.automatic = false;
        assert_eq!(
            summarize(&s),
            "[primary] CPU Proximity 71.3°C (target 60.0°C) | Left fan 2000 RPM manual | automatic off"
        );
    }

    #[test]
    fn summary_of_unavailable_backend() {
        let mut s = ControlSnapshot::empty(55.0);
        s.error = Some("powermetrics not found".to_string());
        assert_eq!(
            summarize(&s),
            "[unavailable] no temperature (target 55.0°C) | powermetrics not found"
        );
    }

    #[tokio::test]
    async fn service_stops_on_cancel() {
        let (_tx, rx) = watch::channel(Arc::new(snapshot(40.0)));
        let provider = StatusReportServiceProvider::new(rx);
        let mut task_manager = TaskManager::with_shutdown_timeout(Duration::from_secs(1));

        provider.start(&mut task_manager).await.unwrap();
        assert!(task_manager.is_running("StatusReportService"));
        assert_eq!(provider.priority(), 3);
        assert!(!provider.is_critical());

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn service_ends_when_sender_drops() {
        let (tx, rx) = watch::channel(Arc::new(snapshot(40.0)));
        let mut task_manager = TaskManager::new();
        StatusReportServiceProvider::new(rx)
            .start(&mut task_manager)
            .await
            .unwrap();

        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        task_manager.shutdown_all().await.unwrap();
    }
}
