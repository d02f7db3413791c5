//! Backend provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::{
    backend::Backend,
    config::{Config, ConfigManager},
    engine::{ControlEngine, EngineSettings},
    providers::traits::AsyncProvider,
    smc,
};

/// Chooses the telemetry backend from configuration.
///
/// Opening the SMC and probing `powermetrics` both block, so selection runs
/// on the blocking pool.
pub struct BackendProvider {
    config_manager: ConfigManager,
}

impl BackendProvider {
    pub const fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }
}

#[async_trait]
impl AsyncProvider<Backend> for BackendProvider {
    async fn provide(&self) -> Result<Backend> {
        let config = self.config_manager.clone_config().await;
        tokio::task::spawn_blocking(move || Backend::select(&config))
            .await
            .context("Backend selection panicked")
    }
}

/// Wraps `backend` in an engine. An SMC backend also gets a reconnect
/// factory for the machine's AppleSMC service.
pub fn build_engine(backend: Backend, config: &Config) -> ControlEngine {
    let reconnect = matches!(backend, Backend::Primary(_));
    let engine = ControlEngine::new(backend, EngineSettings::from(config));
    if reconnect {
        engine.with_reconnect(Box::new(smc::open_default))
    } else {
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderChoice;
    use crate::snapshot::ProviderKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_powermetrics_yields_unavailable_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            provider: ProviderChoice::Powermetrics,
            powermetrics_path: dir.path().join("powermetrics"),
            ..Config::default()
        };
        let provider = BackendProvider::new(ConfigManager::new(config.clone(), None));

        let backend = provider.provide().await.unwrap();
        assert_eq!(backend.kind(), ProviderKind::Unavailable);

        let mut engine = build_engine(backend, &config);
        let snapshot = engine.tick();
        assert!(!snapshot.connected);
        assert!(snapshot.error.unwrap().contains("powermetrics"));
    }
}
