//! Task management for async service lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages async tasks with proper lifecycle and error handling.
///
/// Every task gets a child of `global_token`; cancelling it (directly, via
/// [`TaskManager::stop`] or [`TaskManager::shutdown_all`]) is the only stop
/// signal a task receives.
pub struct TaskManager {
    tasks: HashMap<String, TaskInfo>,
    pub global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// `timeout` bounds how long each task may take to finish after cancel.
    pub fn with_shutdown_timeout(timeout: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: timeout,
        }
    }

    /// Spawns and registers a task with the given name.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(&name) {
            anyhow::bail!("Task '{}' is already running", name);
        }

        let task_token = self.global_token.child_token();
        let task_token_clone = task_token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {}", task_name);
            match task_fn(task_token_clone).await {
                Ok(()) => {
                    info!("Task '{}' completed successfully", task_name);
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{}' failed: {:#}", task_name, e);
                    Err(e)
                }
            }
        });

        self.tasks.insert(
            name.clone(),
            TaskInfo {
                handle,
                cancel_token: task_token,
            },
        );

        info!("Task '{}' spawned", name);
        Ok(())
    }

    /// Cancels one task and waits for it to finish.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let info = self
            .tasks
            .remove(name)
            .ok_or_else(|| anyhow!("Task '{}' is not running", name))?;
        info!("Stopping task '{}'", name);
        info.cancel_token.cancel();
        self.join(info.handle)
            .await
            .with_context(|| format!("Task '{}' did not stop cleanly", name))
    }

    /// Shuts down all registered tasks gracefully.
    ///
    /// Waits for all tasks to complete and returns the first error, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        let handles: Vec<_> = self.tasks.drain().map(|(_, info)| info.handle).collect();

        for handle in handles {
            if let Err(e) = self.join(handle).await {
                warn!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            info!("All tasks stopped");
            Ok(())
        }
    }

    async fn join(&self, handle: JoinHandle<Result<()>>) -> Result<()> {
        match tokio::time::timeout(self.shutdown_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(anyhow!("Task panicked: {}", e)),
            Err(_) => Err(anyhow!("Task shutdown timeout exceeded")),
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

struct TaskInfo {
    handle: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
}
