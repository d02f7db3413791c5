//! In-memory SMC used by engine and service tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use super::channel::SmcChannel;
use super::codec::{ManagementKey, TypedValue};
use crate::error::ChannelError;

#[derive(Default)]
struct FakeState {
    values: BTreeMap<ManagementKey, TypedValue>,
    writes: Vec<(ManagementKey, TypedValue)>,
    failing: BTreeMap<ManagementKey, ChannelError>,
    fans: HashSet<usize>,
    closed: bool,
}

/// Shared handle; every [`FakeSmc::channel`] sees the same state.
#[derive(Clone, Default)]
pub struct FakeSmc(Arc<Mutex<FakeState>>);

impl FakeSmc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds fan `index` with the given bounds and current speed. `FNum` follows.
    pub fn with_fan(self, index: usize, min: u32, max: u32, rpm: u32) -> Self {
        {
            let mut state = self.0.lock().unwrap();
            state.fans.insert(index);
            state
                .values
                .insert(ManagementKey::fan(index, "Mn"), TypedValue::fan_speed(min));
            state
                .values
                .insert(ManagementKey::fan(index, "Mx"), TypedValue::fan_speed(max));
            state
                .values
                .insert(ManagementKey::fan(index, "Ac"), TypedValue::fan_speed(rpm));
            state
                .values
                .insert(ManagementKey::fan(index, "Md"), TypedValue::mode(0));
            let count = state.fans.len() as u8;
            state
                .values
                .insert(ManagementKey::new("FNum"), TypedValue::mode(count));
        }
        self
    }

    pub fn with_temperature(self, key: &str, celsius: f32) -> Self {
        self.set_temperature(key, celsius);
        self
    }

    pub fn with_value(self, key: &str, value: TypedValue) -> Self {
        self.0
            .lock()
            .unwrap()
            .values
            .insert(ManagementKey::new(key), value);
        self
    }

    pub fn remove(&self, key: &str) {
        self.0
            .lock()
            .unwrap()
            .values
            .remove(&ManagementKey::new(key));
    }

    pub fn set_temperature(&self, key: &str, celsius: f32) {
        self.0
            .lock()
            .unwrap()
            .values
            .insert(ManagementKey::new(key), TypedValue::temperature(celsius));
    }

    pub fn set_rpm(&self, index: usize, rpm: u32) {
        self.0
            .lock()
            .unwrap()
            .values
            .insert(ManagementKey::fan(index, "Ac"), TypedValue::fan_speed(rpm));
    }

    /// Makes every access to `key` fail with `err` until [`FakeSmc::heal`].
    pub fn fail(&self, key: &str, err: ChannelError) {
        self.0
            .lock()
            .unwrap()
            .failing
            .insert(ManagementKey::new(key), err);
    }

    pub fn heal(&self, key: &str) {
        self.0
            .lock()
            .unwrap()
            .failing
            .remove(&ManagementKey::new(key));
    }

    /// Every subsequent access fails with [`ChannelError::Closed`].
    pub fn close(&self) {
        self.0.lock().unwrap().closed = true;
    }

    pub fn reopen(&self) {
        self.0.lock().unwrap().closed = false;
    }

    pub fn value(&self, key: &str) -> Option<TypedValue> {
        self.0
            .lock()
            .unwrap()
            .values
            .get(&ManagementKey::new(key))
            .cloned()
    }

    pub fn writes(&self) -> Vec<(String, TypedValue)> {
        self.0
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub fn clear_writes(&self) {
        self.0.lock().unwrap().writes.clear();
    }

    pub fn channel(&self) -> Box<dyn SmcChannel> {
        Box::new(self.clone())
    }
}

impl SmcChannel for FakeSmc {
    fn read(&mut self, key: ManagementKey) -> Result<TypedValue, ChannelError> {
        let state = self.0.lock().unwrap();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(err) = state.failing.get(&key) {
            return Err(err.clone());
        }
        state
            .values
            .get(&key)
            .cloned()
            .ok_or(ChannelError::KeyNotSupported { key })
    }

    fn write(&mut self, key: ManagementKey, value: &TypedValue) -> Result<(), ChannelError> {
        let mut state = self.0.lock().unwrap();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(err) = state.failing.get(&key) {
            return Err(err.clone());
        }
        state.writes.push((key, value.clone()));
        state.values.insert(key, value.clone());
        Ok(())
    }
}
