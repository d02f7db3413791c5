//! # smc_fand
//!
//! A macOS daemon that keeps Mac fans matched to the hottest temperature
//! sensor by talking to the System Management Controller (SMC).
//!
//! ## Features
//!
//! - **Direct SMC access**: typed read/write of management keys over IOKit
//! - **Automatic control**: linear speed ramp above a configurable set-point
//! - **Manual overrides**: per-fan fixed speeds and a global resume
//! - **Degraded mode**: read-only fan speeds from `powermetrics` when the SMC
//!   cannot be opened
//! - **Reconnection**: reopens the SMC after the connection is lost
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`ControlEngine`](engine::ControlEngine) - Synchronous sampling and actuation
//! - [`FanControlHandle`](providers::FanControlHandle) - Snapshots and overrides
//! - [`EventBus`](event::EventBus) - Health and mode notifications
//!
//! ## Example
//!
//! ```no_run
//! use smc_fand::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod backend;
pub mod cli;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event;
pub mod inventory;
pub mod powermetrics;
pub mod providers;
pub mod smc;
pub mod snapshot;
pub mod task_manager;
