//! Synchronous fan control engine.
//!
//! [`ControlEngine`] owns the backend and all per-fan state. Every call does
//! blocking hardware I/O, so the async service runs it on the blocking pool
//! and never shares it.
//!
//! Each fan is either [`FanMode::Automatic`] (the engine picks its speed from
//! the hottest sensor) or [`FanMode::Manual`] (left alone at the speed the user
//! chose). Only [`ControlEngine::set_fan_speed`] makes a fan manual and only
//! [`ControlEngine::set_automatic`] makes it automatic again.

use log::{debug, info, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::control::{needs_write, target_rpm};
use crate::error::{ChannelError, ControlError};
use crate::inventory::{HardwareInventory, MODE_AUTOMATIC, fan_name};
use crate::powermetrics::PowermetricsSampler;
use crate::smc::SmcChannel;
use crate::snapshot::{ControlSnapshot, FanMode, FanState, TemperatureReading};

/// Opens a fresh SMC channel after the previous one was closed.
pub type ChannelFactory = Box<dyn FnMut() -> Result<Box<dyn SmcChannel>, ChannelError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub target_temperature: f32,
    pub fallback_min_rpm: u32,
    pub fallback_max_rpm: u32,
    pub reconnect_interval_ticks: u32,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            target_temperature: config.target_temperature,
            fallback_min_rpm: config.fallback_min_rpm,
            fallback_max_rpm: config.fallback_max_rpm,
            reconnect_interval_ticks: config.reconnect_interval_ticks.max(1),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Manual request routed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetTargetTemperature(f32),
    SetAutomatic(bool),
    SetFanSpeed { index: usize, rpm: u32 },
}

pub struct ControlEngine {
    backend: Backend,
    settings: EngineSettings,
    fans: Vec<FanState>,
    temperatures: Vec<TemperatureReading>,
    automatic: bool,
    target_temperature: f32,
    connected: bool,
    disconnect_reason: Option<String>,
    notice: Option<String>,
    /// Set after a permission failure; automatic writes stay off until the
    /// user issues an explicit command.
    writes_denied: bool,
    reconnect: Option<ChannelFactory>,
    ticks_disconnected: u32,
    sequence: u64,
}

impl ControlEngine {
    /// Builds the fan list from `backend`. Reads fan layout and current
    /// speeds once; nothing is written.
    pub fn new(mut backend: Backend, settings: EngineSettings) -> Self {
        let mut connected = true;
        let mut disconnect_reason = None;
        let fans = match &mut backend {
            Backend::Primary(inventory) => match load_fans(inventory, &settings) {
                Ok(fans) => fans,
                Err(e) => {
                    warn!("SMC closed while reading fan layout: {e}");
                    connected = false;
                    disconnect_reason = Some(e.to_string());
                    Vec::new()
                }
            },
            Backend::Fallback(sampler) => sampled_fans(sampler, &settings),
            Backend::Unavailable { reason } => {
                connected = false;
                disconnect_reason = Some(reason.clone());
                Vec::new()
            }
        };

        info!(
            "Control engine ready: {:?} backend, {} fans, target {:.1}°C",
            backend.kind(),
            fans.len(),
            settings.target_temperature
        );

        Self {
            backend,
            settings,
            fans,
            temperatures: Vec::new(),
            automatic: true,
            target_temperature: settings.target_temperature,
            connected,
            disconnect_reason,
            notice: None,
            writes_denied: false,
            reconnect: None,
            ticks_disconnected: 0,
            sequence: 0,
        }
    }

    /// Installs the factory used to reopen the SMC after it reports closed.
    pub fn with_reconnect(mut self, factory: ChannelFactory) -> Self {
        self.reconnect = Some(factory);
        self
    }

    pub fn fans(&self) -> &[FanState] {
        &self.fans
    }

    /// Samples, controls and returns the new snapshot.
    pub fn tick(&mut self) -> ControlSnapshot {
        self.refresh();
        if self.connected {
            self.apply_automatic_control();
        }
        self.snapshot()
    }

    /// Like [`tick`](Self::tick) without the control pass: nothing is
    /// written to the hardware.
    pub fn sample(&mut self) -> ControlSnapshot {
        self.refresh();
        self.snapshot()
    }

    fn refresh(&mut self) {
        self.sequence += 1;
        match self.backend {
            Backend::Primary(_) => {
                if !self.connected {
                    self.try_reconnect();
                }
                if self.connected {
                    self.sample_primary();
                }
            }
            Backend::Fallback(_) => self.sample_fallback(),
            Backend::Unavailable { .. } => {}
        }
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            sequence: self.sequence,
            fans: self.fans.clone(),
            temperatures: self.temperatures.clone(),
            automatic: self.automatic,
            target_temperature: self.target_temperature,
            connected: self.connected,
            provider: self.backend.kind(),
            error: self.disconnect_reason.clone().or_else(|| self.notice.clone()),
        }
    }

    /// Takes effect on the next tick.
    pub fn set_target_temperature(&mut self, celsius: f32) {
        info!("Target temperature set to {celsius:.1}°C");
        self.target_temperature = celsius;
    }

    /// Forces fan `index` to `rpm` and takes it out of automatic control.
    /// The value is not clamped to the fan's bounds.
    pub fn set_fan_speed(&mut self, index: usize, rpm: u32) -> Result<(), ControlError> {
        if let Backend::Unavailable { .. } = self.backend {
            return Err(ControlError::NotConnected);
        }
        if index >= self.fans.len() {
            return Err(ControlError::InvalidFan(index));
        }
        let Backend::Primary(inventory) = &mut self.backend else {
            return Err(ControlError::ReadOnly);
        };
        if !self.connected {
            return Err(ControlError::NotConnected);
        }

        match inventory.force_fan_speed(index, rpm) {
            Ok(()) => {
                let fan = &mut self.fans[index];
                fan.mode = FanMode::Manual;
                fan.target_rpm = Some(rpm);
                self.automatic = false;
                self.writes_denied = false;
                self.notice = None;
                info!("{} forced to {rpm} RPM", fan.name);
                Ok(())
            }
            Err(e) => {
                warn!("Setting {} to {rpm} RPM failed: {e}", self.fans[index].name);
                self.note_channel_failure(&e);
                Err(e.into())
            }
        }
    }

    /// `true` hands every fan back to the hardware and resumes automatic
    /// control. Local state is reset even when some fans could not be
    /// switched; those are named in the snapshot error. `false` only stops
    /// automatic control.
    pub fn set_automatic(&mut self, enabled: bool) -> Result<(), ControlError> {
        if !enabled {
            info!("Automatic control paused");
            self.automatic = false;
            return Ok(());
        }

        let result = match &mut self.backend {
            Backend::Primary(inventory) if self.connected => {
                let mut failed = Vec::new();
                let mut first_error = None;
                for fan in &self.fans {
                    if let Err(e) = inventory.set_fan_mode(fan.index, MODE_AUTOMATIC) {
                        warn!("Restoring automatic mode for {} failed: {e}", fan.name);
                        failed.push(fan.name.clone());
                        first_error.get_or_insert(e);
                    }
                }
                match first_error {
                    None => {
                        self.notice = None;
                        Ok(())
                    }
                    Some(e) => {
                        self.notice = Some(format!(
                            "Failed to restore automatic mode for: {}",
                            failed.join(", ")
                        ));
                        if e.is_closed() {
                            self.mark_disconnected(e.to_string());
                        }
                        Err(ControlError::Channel(e))
                    }
                }
            }
            Backend::Primary(_) => Err(ControlError::NotConnected),
            _ => Ok(()),
        };

        for fan in &mut self.fans {
            fan.mode = FanMode::Automatic;
            fan.target_rpm = None;
        }
        self.automatic = true;
        self.writes_denied = false;
        info!("Automatic control resumed");
        result
    }

    pub fn execute(&mut self, command: Command) -> Result<(), ControlError> {
        debug!("Executing {command:?}");
        match command {
            Command::SetTargetTemperature(celsius) => {
                self.set_target_temperature(celsius);
                Ok(())
            }
            Command::SetAutomatic(enabled) => self.set_automatic(enabled),
            Command::SetFanSpeed { index, rpm } => self.set_fan_speed(index, rpm),
        }
    }

    fn sample_primary(&mut self) {
        let Backend::Primary(inventory) = &mut self.backend else {
            return;
        };

        let mut closed = false;
        for fan in &mut self.fans {
            match inventory.fan_rpm(fan.index) {
                Ok(rpm) => {
                    fan.current_rpm = rpm;
                    fan.stale = false;
                }
                Err(ChannelError::Closed) => {
                    closed = true;
                    break;
                }
                Err(e) => {
                    debug!("Reading {} speed failed: {e}", fan.name);
                    fan.stale = true;
                }
            }
        }

        if !closed {
            match inventory.read_temperatures() {
                Ok(readings) => self.temperatures = sorted_readings(readings),
                Err(e) => {
                    debug!("Temperature sweep aborted: {e}");
                    closed = e.is_closed();
                }
            }
        }

        if closed {
            self.mark_disconnected(ChannelError::Closed.to_string());
        }
    }

    fn sample_fallback(&mut self) {
        let Backend::Fallback(sampler) = &mut self.backend else {
            return;
        };

        if let Err(e) = sampler.refresh() {
            warn!("powermetrics refresh failed: {e}");
            self.fans.iter_mut().for_each(|fan| fan.stale = true);
            return;
        }

        for index in 0..sampler.fan_count() {
            let rpm = sampler.fan_rpm(index).unwrap_or_default();
            match self.fans.get_mut(index) {
                Some(fan) => {
                    fan.current_rpm = rpm;
                    fan.stale = false;
                }
                None => self.fans.push(fallback_fan(index, rpm, &self.settings)),
            }
        }
        for fan in self.fans.iter_mut().skip(sampler.fan_count()) {
            fan.stale = true;
        }
    }

    fn apply_automatic_control(&mut self) {
        if !self.automatic || self.writes_denied {
            return;
        }
        let Some(hottest) = self.temperatures.first().map(|t| t.celsius) else {
            return;
        };
        let Backend::Primary(inventory) = &mut self.backend else {
            return;
        };

        let mut failure = None;
        for fan in self.fans.iter_mut().filter(|f| f.mode == FanMode::Automatic) {
            let next = target_rpm(fan.min_rpm, fan.max_rpm, hottest, self.target_temperature);
            if !needs_write(fan.target_rpm, next) {
                continue;
            }
            match inventory.force_fan_speed(fan.index, next) {
                Ok(()) => {
                    debug!("{}: {hottest:.1}°C -> {next} RPM", fan.name);
                    fan.target_rpm = Some(next);
                }
                Err(e @ (ChannelError::PermissionDenied { .. } | ChannelError::Closed)) => {
                    failure = Some(e);
                    break;
                }
                Err(e) => warn!("Writing {} target {next} RPM failed: {e}", fan.name),
            }
        }

        if let Some(e) = failure {
            self.note_channel_failure(&e);
        }
    }

    fn note_channel_failure(&mut self, err: &ChannelError) {
        match err {
            ChannelError::PermissionDenied { key } => {
                warn!("Permission denied writing {key}; automatic control suspended");
                self.writes_denied = true;
                self.notice = Some(format!(
                    "Permission denied writing {key}; fan control needs root"
                ));
            }
            ChannelError::Closed => self.mark_disconnected(err.to_string()),
            _ => {}
        }
    }

    fn mark_disconnected(&mut self, reason: String) {
        warn!("SMC disconnected: {reason}");
        self.connected = false;
        self.disconnect_reason = Some(reason);
        self.ticks_disconnected = 0;
    }

    fn try_reconnect(&mut self) {
        let Some(factory) = self.reconnect.as_mut() else {
            return;
        };
        self.ticks_disconnected += 1;
        if self.ticks_disconnected < self.settings.reconnect_interval_ticks {
            return;
        }
        self.ticks_disconnected = 0;

        let channel = match factory() {
            Ok(channel) => channel,
            Err(e) => {
                debug!("Reconnect attempt failed: {e}");
                return;
            }
        };

        let mut inventory = HardwareInventory::new(channel);
        let fans = match load_fans(&mut inventory, &self.settings) {
            Ok(fans) => fans,
            Err(e) => {
                debug!("Reconnected SMC closed again: {e}");
                return;
            }
        };

        let previous = std::mem::take(&mut self.fans);
        self.fans = fans
            .into_iter()
            .map(|mut fan| {
                if let Some(old) = previous.iter().find(|old| old.index == fan.index) {
                    if old.mode == FanMode::Manual {
                        fan.mode = FanMode::Manual;
                        fan.target_rpm = old.target_rpm;
                    }
                }
                fan
            })
            .collect();

        info!("SMC reconnected with {} fans", self.fans.len());
        self.backend = Backend::Primary(inventory);
        self.connected = true;
        self.disconnect_reason = None;
    }
}

/// Reads the fan layout. Only a closed channel is an error; a machine
/// without `FNum` simply has no fans.
fn load_fans(
    inventory: &mut HardwareInventory,
    settings: &EngineSettings,
) -> Result<Vec<FanState>, ChannelError> {
    let count = match inventory.fan_count() {
        Ok(count) => count,
        Err(ChannelError::Closed) => return Err(ChannelError::Closed),
        Err(e) if e.is_missing() => {
            debug!("No controllable fans: {e}");
            0
        }
        Err(e) => {
            warn!("Fan count unreadable, treating as fanless: {e}");
            0
        }
    };

    let mut fans = Vec::with_capacity(count);
    for index in 0..count {
        let name = fan_name(index);
        let (min_rpm, max_rpm) = match inventory.fan_bounds(index) {
            Ok((min, max)) if min < max => (min, max),
            Ok((min, max)) => {
                warn!("{name} reports invalid bounds {min}..{max}; using fallback");
                (settings.fallback_min_rpm, settings.fallback_max_rpm)
            }
            Err(ChannelError::Closed) => return Err(ChannelError::Closed),
            Err(e) => {
                warn!("{name} bounds unreadable ({e}); using fallback");
                (settings.fallback_min_rpm, settings.fallback_max_rpm)
            }
        };
        let (current_rpm, stale) = match inventory.fan_rpm(index) {
            Ok(rpm) => (rpm, false),
            Err(ChannelError::Closed) => return Err(ChannelError::Closed),
            Err(_) => (0, true),
        };
        fans.push(FanState {
            index,
            name,
            current_rpm,
            min_rpm,
            max_rpm,
            target_rpm: None,
            mode: FanMode::Automatic,
            stale,
        });
    }
    Ok(fans)
}

fn sampled_fans(sampler: &PowermetricsSampler, settings: &EngineSettings) -> Vec<FanState> {
    (0..sampler.fan_count())
        .map(|index| fallback_fan(index, sampler.fan_rpm(index).unwrap_or_default(), settings))
        .collect()
}

fn fallback_fan(index: usize, rpm: u32, settings: &EngineSettings) -> FanState {
    FanState {
        index,
        name: format!("Fan {}", index + 1),
        current_rpm: rpm,
        min_rpm: settings.fallback_min_rpm,
        max_rpm: settings.fallback_max_rpm,
        target_rpm: None,
        mode: FanMode::Automatic,
        stale: false,
    }
}

fn sorted_readings(readings: Vec<crate::inventory::SensorReading>) -> Vec<TemperatureReading> {
    let mut temperatures: Vec<_> = readings
        .into_iter()
        .map(|r| TemperatureReading {
            key: r.sensor.key.into(),
            name: r.sensor.name.to_string(),
            celsius: r.celsius,
        })
        .collect();
    temperatures.sort_by(|a, b| b.celsius.total_cmp(&a.celsius));
    temperatures
}
