//! Access to the Apple System Management Controller.
//!
//! [`codec`] packs keys and values, [`protocol`] builds the parameter block,
//! [`device_io`] abstracts the privileged call and [`channel`] ties them into
//! keyed reads and writes.

pub mod channel;
pub mod codec;
pub mod device_io;
#[cfg(test)]
pub(crate) mod fake;
#[cfg(target_os = "macos")]
mod iokit;
pub mod protocol;

pub use channel::{ControllerChannel, SmcChannel, open_default};
pub use codec::{ManagementKey, TypedValue};
