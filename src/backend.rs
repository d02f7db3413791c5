//! Startup choice between the SMC and the `powermetrics` fallback.

use log::{info, warn};

use crate::config::{Config, ProviderChoice};
use crate::error::ChannelError;
use crate::inventory::HardwareInventory;
use crate::powermetrics::PowermetricsSampler;
use crate::smc::{self, SmcChannel};
use crate::snapshot::ProviderKind;

/// Telemetry source chosen once at startup.
pub enum Backend {
    Primary(HardwareInventory),
    Fallback(PowermetricsSampler),
    Unavailable { reason: String },
}

impl Backend {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Backend::Primary(_) => ProviderKind::Primary,
            Backend::Fallback(_) => ProviderKind::Fallback,
            Backend::Unavailable { .. } => ProviderKind::Unavailable,
        }
    }

    /// Opens the machine's SMC or probes `powermetrics` as configured.
    pub fn select(config: &Config) -> Self {
        let program = config.powermetrics_path.clone();
        Self::select_with(config.provider, smc::open_default, move || {
            PowermetricsSampler::probe(program)
        })
    }

    /// With [`ProviderChoice::Auto`] the SMC wins when it reports fans.
    /// Otherwise a working `powermetrics` is preferred, then a fanless SMC
    /// connection, which still reports temperatures.
    pub fn select_with<O, P>(choice: ProviderChoice, open: O, probe: P) -> Self
    where
        O: FnOnce() -> Result<Box<dyn SmcChannel>, ChannelError>,
        P: FnOnce() -> Result<PowermetricsSampler, ChannelError>,
    {
        match choice {
            ProviderChoice::Smc => match open() {
                Ok(channel) => {
                    info!("Using SMC backend");
                    Backend::Primary(HardwareInventory::new(channel))
                }
                Err(e) => unavailable(format!("SMC: {e}")),
            },
            ProviderChoice::Powermetrics => match probe() {
                Ok(sampler) => {
                    info!(
                        "Using powermetrics backend ({})",
                        sampler.program().display()
                    );
                    Backend::Fallback(sampler)
                }
                Err(e) => unavailable(format!("powermetrics: {e}")),
            },
            ProviderChoice::Auto => Self::select_auto(open, probe),
        }
    }

    fn select_auto<O, P>(open: O, probe: P) -> Self
    where
        O: FnOnce() -> Result<Box<dyn SmcChannel>, ChannelError>,
        P: FnOnce() -> Result<PowermetricsSampler, ChannelError>,
    {
        let (inventory, smc_problem) = match open() {
            Ok(channel) => {
                let mut inventory = HardwareInventory::new(channel);
                match inventory.fan_count() {
                    Ok(count) if count > 0 => {
                        info!("Using SMC backend with {count} fans");
                        return Backend::Primary(inventory);
                    }
                    Ok(_) => (Some(inventory), "SMC reports no fans".to_string()),
                    Err(e) => (Some(inventory), format!("SMC fan count: {e}")),
                }
            }
            Err(e) => (None, format!("SMC: {e}")),
        };

        warn!("{smc_problem}; trying powermetrics");
        match probe() {
            Ok(sampler) => {
                info!(
                    "Using powermetrics backend (read-only, {})",
                    sampler.program().display()
                );
                Backend::Fallback(sampler)
            }
            Err(e) => match inventory {
                Some(inventory) => {
                    warn!("powermetrics unavailable ({e}); keeping fanless SMC connection");
                    Backend::Primary(inventory)
                }
                None => unavailable(format!("{smc_problem}; powermetrics: {e}")),
            },
        }
    }
}

fn unavailable(reason: String) -> Backend {
    warn!("No fan backend available: {reason}");
    Backend::Unavailable { reason }
}
