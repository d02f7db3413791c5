use thiserror::Error;

use crate::smc::codec::ManagementKey;

/// Failures at the SMC channel boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("SMC channel unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied accessing {key}")]
    PermissionDenied { key: ManagementKey },

    #[error("key {key} not supported on this machine")]
    KeyNotSupported { key: ManagementKey },

    #[error("transient failure reading {key} (code {code:#x})")]
    Transient { key: ManagementKey, code: u32 },

    #[error("write to {key} rejected (code {code:#x})")]
    WriteRejected { key: ManagementKey, code: u32 },

    #[error("SMC connection closed")]
    Closed,

    #[error("key {key} has unexpected type {data_type}")]
    UnsupportedType {
        key: ManagementKey,
        data_type: ManagementKey,
    },
}

impl ChannelError {
    /// Missing keys and keys of an unexpected type are both treated as absent.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::KeyNotSupported { .. } | Self::UnsupportedType { .. }
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Failures returned by fan control commands.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("no fan with index {0}")]
    InvalidFan(usize),

    #[error("hardware not connected")]
    NotConnected,

    #[error("current backend is read-only")]
    ReadOnly,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("control loop is not running")]
    LoopStopped,
}
