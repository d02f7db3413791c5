//! Temperature to fan-speed mapping for automatic control.
//!
//! The target RPM rises linearly from the fan's minimum at the set-point to
//! its maximum [`SATURATION_DELTA`] degrees above it.
//!
//! # Example
//!
//! ```
//! use smc_fand::control::target_rpm;
//!
//! assert_eq!(target_rpm(1000, 6000, 50.0, 60.0), 1000);
//! assert_eq!(target_rpm(1000, 6000, 70.0, 60.0), 3500);
//! assert_eq!(target_rpm(1000, 6000, 85.0, 60.0), 6000);
//! ```

/// Degrees above the set-point at which fans run at full speed.
pub const SATURATION_DELTA: f32 = 20.0;

/// Smallest target change worth a write.
pub const HYSTERESIS_RPM: u32 = 100;

pub fn target_rpm(min: u32, max: u32, current: f32, target: f32) -> u32 {
    let diff = current - target;
    if diff <= 0.0 {
        min
    } else if diff >= SATURATION_DELTA {
        max
    } else {
        let span = max.saturating_sub(min) as f32;
        let offset = (span * diff / SATURATION_DELTA).round() as u32;
        (min + offset).min(max)
    }
}

/// `false` when a previous target exists within [`HYSTERESIS_RPM`] of `next`.
pub fn needs_write(previous: Option<u32>, next: u32) -> bool {
    previous.is_none_or(|prev| prev.abs_diff(next) >= HYSTERESIS_RPM)
}
