use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that can create components asynchronously.
///
/// Enables dependency injection pattern with async initialization support.
///
/// # Example
///
/// ```no_run
/// use smc_fand::providers::traits::AsyncProvider;
///
/// struct FixedTarget;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<f32> for FixedTarget {
///     async fn provide(&self) -> anyhow::Result<f32> {
///         Ok(60.0)
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that can be started through TaskManager.
///
/// Provides service lifecycle management with prioritization and
/// criticality classification for graceful degradation.
///
/// # Example
///
/// ```no_run
/// use smc_fand::providers::traits::ServiceProvider;
/// use smc_fand::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct HeartbeatService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for HeartbeatService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("heartbeat".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "HeartbeatService" }
///     fn priority(&self) -> i32 { 5 }
///     fn is_critical(&self) -> bool { false }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    struct CountingProvider {
        value: f32,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl AsyncProvider<f32> for CountingProvider {
        async fn provide(&self) -> Result<f32> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.value)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AsyncProvider<f32> for FailingProvider {
        async fn provide(&self) -> Result<f32> {
            Err(anyhow!("SMC unavailable"))
        }
    }

    struct IdleService {
        name: &'static str,
        priority: i32,
        critical: bool,
    }

    #[async_trait]
    impl ServiceProvider for IdleService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            task_manager
                .spawn_task(self.name.to_string(), |token: CancellationToken| async move {
                    token.cancelled().await;
                    Ok(())
                })
                .await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    struct BareService;

    #[async_trait]
    impl ServiceProvider for BareService {
        async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
            Err(anyhow!("cannot start"))
        }

        fn name(&self) -> &'static str {
            "BareService"
        }
    }

    #[tokio::test]
    async fn provider_is_called_each_time() {
        let calls = Arc::new(Mutex::new(0));
        let provider = CountingProvider {
            value: 62.5,
            calls: calls.clone(),
        };

        assert_eq!(provider.provide().await.unwrap(), 62.5);
        assert_eq!(provider.provide().await.unwrap(), 62.5);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn provider_error_propagates() {
        let providers: Vec<Box<dyn AsyncProvider<f32> + Send + Sync>> =
            vec![Box::new(FailingProvider)];
        let err = providers[0].provide().await.unwrap_err();
        assert_eq!(err.to_string(), "SMC unavailable");
    }

    #[test]
    fn default_metadata() {
        assert_eq!(BareService.priority(), 0);
        assert!(!BareService.is_critical());
    }

    #[tokio::test]
    async fn services_start_in_priority_order() {
        let mut services: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(IdleService {
                name: "report",
                priority: 3,
                critical: false,
            }),
            Box::new(IdleService {
                name: "control",
                priority: 10,
                critical: true,
            }),
        ];
        services.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        assert_eq!(services[0].name(), "control");

        let mut task_manager = TaskManager::new();
        for service in &services {
            service.start(&mut task_manager).await.unwrap();
        }
        assert_eq!(task_manager.active_count(), 2);
        assert!(BareService.start(&mut task_manager).await.is_err());

        task_manager.shutdown_all().await.unwrap();
    }
}
