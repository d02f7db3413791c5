use serde::Serialize;

use crate::smc::ManagementKey;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    #[default]
    Automatic,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FanState {
    pub index: usize,
    pub name: String,
    pub current_rpm: u32,
    pub min_rpm: u32,
    pub max_rpm: u32,
    pub target_rpm: Option<u32>,
    pub mode: FanMode,
    /// The last RPM read failed and `current_rpm` is the previous value.
    pub stale: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub key: ManagementKey,
    pub name: String,
    pub celsius: f32,
}

/// Where telemetry comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The SMC, with full control.
    Primary,
    /// `powermetrics`, read-only.
    Fallback,
    Unavailable,
}

/// State of the control loop after one tick. Never modified once published.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControlSnapshot {
    pub sequence: u64,
    pub fans: Vec<FanState>,
    /// Hottest first.
    pub temperatures: Vec<TemperatureReading>,
    pub automatic: bool,
    pub target_temperature: f32,
    pub connected: bool,
    pub provider: ProviderKind,
    pub error: Option<String>,
}

impl ControlSnapshot {
    pub fn hottest(&self) -> Option<&TemperatureReading> {
        self.temperatures.first()
    }

    pub fn empty(target_temperature: f32) -> Self {
        Self {
            sequence: 0,
            fans: Vec::new(),
            temperatures: Vec::new(),
            automatic: true,
            target_temperature,
            connected: false,
            provider: ProviderKind::Unavailable,
            error: None,
        }
    }
}
