//! Fan and temperature layout of the machine, read through an [`SmcChannel`].

use log::debug;

use crate::error::ChannelError;
use crate::smc::{ManagementKey, SmcChannel, TypedValue};

/// Hardware-managed fan speed.
pub const MODE_AUTOMATIC: u8 = 0;
/// Fan follows the target written to `F{i}Tg`.
pub const MODE_FORCED: u8 = 1;

/// A temperature sensor known to exist on some Mac models.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorInfo {
    pub key: &'static str,
    pub name: &'static str,
}

static SENSOR_TABLE: [SensorInfo; 12] = [
    SensorInfo { key: "TC0P", name: "CPU Proximity" },
    SensorInfo { key: "TC0D", name: "CPU Die" },
    SensorInfo { key: "TC0E", name: "CPU Core 1" },
    SensorInfo { key: "TC0F", name: "CPU Core 2" },
    SensorInfo { key: "TG0D", name: "GPU Die" },
    SensorInfo { key: "TG0P", name: "GPU Proximity" },
    SensorInfo { key: "Th0H", name: "HDD Bay 1" },
    SensorInfo { key: "Tm0P", name: "Memory Proximity" },
    SensorInfo { key: "TN0D", name: "Northbridge Die" },
    SensorInfo { key: "TN0P", name: "Northbridge Proximity" },
    SensorInfo { key: "To0P", name: "Optical Drive" },
    SensorInfo { key: "Ts0P", name: "Palm Rest" },
];

/// Sensors probed every cycle, in probe order.
pub fn temperature_sensor_table() -> &'static [SensorInfo] {
    &SENSOR_TABLE
}

/// Display name by convention: the first two fans cool the CPU and GPU.
pub fn fan_name(index: usize) -> String {
    match index {
        0 => "CPU fan".to_string(),
        1 => "GPU fan".to_string(),
        i => format!("Fan {}", i + 1),
    }
}

/// One successful sensor read.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorInfo,
    pub celsius: f32,
}

pub struct HardwareInventory {
    channel: Box<dyn SmcChannel>,
}

impl HardwareInventory {
    pub fn new(channel: Box<dyn SmcChannel>) -> Self {
        Self { channel }
    }

    pub fn fan_count(&mut self) -> Result<usize, ChannelError> {
        let key = ManagementKey::new("FNum");
        let value = self.channel.read(key)?;
        value
            .as_u8()
            .map(usize::from)
            .ok_or_else(|| unsupported(key, &value))
    }

    /// Reports `(min, max)` as stored by the controller. No sanity checks.
    pub fn fan_bounds(&mut self, index: usize) -> Result<(u32, u32), ChannelError> {
        let min = self.read_rpm(ManagementKey::fan(index, "Mn"))?;
        let max = self.read_rpm(ManagementKey::fan(index, "Mx"))?;
        Ok((min, max))
    }

    pub fn fan_rpm(&mut self, index: usize) -> Result<u32, ChannelError> {
        self.read_rpm(ManagementKey::fan(index, "Ac"))
    }

    pub fn set_fan_mode(&mut self, index: usize, mode: u8) -> Result<(), ChannelError> {
        self.channel
            .write(ManagementKey::fan(index, "Md"), &TypedValue::mode(mode))
    }

    pub fn set_fan_target(&mut self, index: usize, rpm: u32) -> Result<(), ChannelError> {
        self.channel
            .write(ManagementKey::fan(index, "Tg"), &TypedValue::fan_speed(rpm))
    }

    /// Forced mode first, then the target; the controller ignores `F{i}Tg`
    /// while the fan is in automatic mode.
    pub fn force_fan_speed(&mut self, index: usize, rpm: u32) -> Result<(), ChannelError> {
        self.set_fan_mode(index, MODE_FORCED)?;
        self.set_fan_target(index, rpm)
    }

    pub fn read_temperature(&mut self, sensor: &SensorInfo) -> Result<f32, ChannelError> {
        let key = ManagementKey::new(sensor.key);
        let value = self.channel.read(key)?;
        value
            .as_temperature()
            .ok_or_else(|| unsupported(key, &value))
    }

    /// Reads every table sensor. Failed sensors are left out; only a closed
    /// connection aborts the sweep.
    pub fn read_temperatures(&mut self) -> Result<Vec<SensorReading>, ChannelError> {
        let mut readings = Vec::new();
        for sensor in temperature_sensor_table() {
            match self.read_temperature(sensor) {
                Ok(celsius) => readings.push(SensorReading {
                    sensor: *sensor,
                    celsius,
                }),
                Err(ChannelError::Closed) => return Err(ChannelError::Closed),
                Err(e) => debug!("Skipping sensor {} ({}): {e}", sensor.key, sensor.name),
            }
        }
        Ok(readings)
    }

    fn read_rpm(&mut self, key: ManagementKey) -> Result<u32, ChannelError> {
        let value = self.channel.read(key)?;
        value
            .as_fan_speed()
            .ok_or_else(|| unsupported(key, &value))
    }
}

fn unsupported(key: ManagementKey, value: &TypedValue) -> ChannelError {
    ChannelError::UnsupportedType {
        key,
        data_type: value.data_type(),
    }
}
