//! Dependency injection providers for service management.
//!
//! Each long-running part of the daemon is a [`ServiceProvider`] started
//! through the [`TaskManager`](crate::task_manager::TaskManager); one-shot
//! components are built by an [`AsyncProvider`].

pub mod backend;
pub mod control_loop;
pub mod status_report;
pub mod traits;

pub use backend::{BackendProvider, build_engine};
pub use control_loop::{ControlLoopServiceProvider, FanControlHandle, LoopSettings};
pub use status_report::StatusReportServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::backend::Backend;
    use crate::engine::{ControlEngine, EngineSettings};
    use crate::event::EventBus;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn providers() -> Vec<Box<dyn ServiceProvider>> {
        let engine = ControlEngine::new(
            Backend::Unavailable {
                reason: "no SMC".to_string(),
            },
            EngineSettings::default(),
        );
        let settings = LoopSettings {
            tick: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(100),
            restore_automatic_on_exit: true,
        };
        let (control, handle) = ControlLoopServiceProvider::new(engine, settings, EventBus::new());
        let report = StatusReportServiceProvider::new(handle.subscribe());
        vec![Box::new(report), Box::new(control)]
    }

    #[test]
    fn control_loop_outranks_status_report() {
        let mut providers = providers();
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));

        let names: Vec<_> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["ControlLoopService", "StatusReportService"]);
        assert!(providers[0].is_critical());
        assert!(!providers[1].is_critical());
    }

    #[tokio::test]
    async fn services_run_without_hardware() {
        let mut task_manager = crate::task_manager::TaskManager::new();
        for provider in providers() {
            provider.start(&mut task_manager).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(task_manager.active_count(), 2);
        task_manager.shutdown_all().await.unwrap();
    }
}
