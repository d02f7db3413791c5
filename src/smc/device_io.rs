use super::protocol::SmcParams;

/// Struct-method index of the AppleSMC user client.
pub const KERNEL_INDEX_SMC: u32 = 2;

/// Raw `kern_return_t` from a failed privileged call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernReturn(pub u32);

impl KernReturn {
    pub const NO_DEVICE: Self = Self(0xE000_02C0);
    pub const NOT_PRIVILEGED: Self = Self(0xE000_02C1);
    pub const NOT_OPEN: Self = Self(0xE000_02CD);
    pub const NOT_PERMITTED: Self = Self(0xE000_02E2);
    pub const ABORTED: Self = Self(0xE000_02EB);

    pub fn is_permission(self) -> bool {
        self == Self::NOT_PRIVILEGED || self == Self::NOT_PERMITTED
    }

    /// The session is gone and will not come back without reopening.
    pub fn is_disconnect(self) -> bool {
        self == Self::NOT_OPEN || self == Self::NO_DEVICE || self == Self::ABORTED
    }
}

/// One privileged struct call to the SMC.
pub trait SmcIo: Send + 'static {
    fn call(&self, input: &SmcParams) -> Result<SmcParams, KernReturn>;
}
