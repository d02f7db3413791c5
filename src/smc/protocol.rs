use super::codec::{ManagementKey, MAX_VALUE_SIZE, TypedValue};

/// SMC result byte for a successful transaction.
pub const RESULT_SUCCESS: u8 = 0x00;
/// SMC result byte when the key does not exist.
pub const RESULT_KEY_NOT_FOUND: u8 = 0x84;

pub const CMD_READ_BYTES: u8 = 5;
pub const CMD_WRITE_BYTES: u8 = 6;
pub const CMD_READ_KEY_INFO: u8 = 9;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmcVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub reserved: u8,
    pub release: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmcLimitData {
    pub version: u16,
    pub length: u16,
    pub cpu_p_limit: u32,
    pub gpu_p_limit: u32,
    pub mem_p_limit: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmcKeyInfo {
    pub data_size: u32,
    pub data_type: u32,
    pub data_attributes: u8,
}

/// Parameter block exchanged with the AppleSMC user client.
///
/// Layout must match the kernel's `SMCKeyData_t` exactly (80 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmcParams {
    pub key: u32,
    pub vers: SmcVersion,
    pub p_limit_data: SmcLimitData,
    pub key_info: SmcKeyInfo,
    pub result: u8,
    pub status: u8,
    pub data8: u8,
    pub data32: u32,
    pub bytes: [u8; MAX_VALUE_SIZE],
}

const _: () = assert!(std::mem::size_of::<SmcParams>() == 80);

/// Size and type of a key as reported by the SMC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyInfo {
    pub data_size: u32,
    pub data_type: ManagementKey,
}

#[derive(Clone, Debug)]
pub enum Command {
    ReadKeyInfo { key: ManagementKey },
    ReadBytes { key: ManagementKey, info: KeyInfo },
    WriteBytes { key: ManagementKey, value: TypedValue },
}

impl Command {
    pub fn key(&self) -> ManagementKey {
        match *self {
            Command::ReadKeyInfo { key }
            | Command::ReadBytes { key, .. }
            | Command::WriteBytes { key, .. } => key,
        }
    }

    pub fn selector(&self) -> u8 {
        match self {
            Command::ReadKeyInfo { .. } => CMD_READ_KEY_INFO,
            Command::ReadBytes { .. } => CMD_READ_BYTES,
            Command::WriteBytes { .. } => CMD_WRITE_BYTES,
        }
    }

    pub fn to_params(&self) -> SmcParams {
        let mut params = SmcParams {
            key: self.key().code(),
            data8: self.selector(),
            ..SmcParams::default()
        };
        match self {
            Command::ReadKeyInfo { .. } => {}
            Command::ReadBytes { info, .. } => {
                params.key_info.data_size = info.data_size;
            }
            Command::WriteBytes { value, .. } => {
                let payload = value.payload();
                params.key_info.data_size = payload.len() as u32;
                params.bytes[..payload.len()].copy_from_slice(payload);
            }
        }
        params
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    KeyInfo(KeyInfo),
    Bytes(TypedValue),
    Written,
}

impl Response {
    /// Interprets the output block for `cmd`. A non-zero SMC result byte is
    /// returned as the error.
    pub fn parse(cmd: &Command, out: &SmcParams) -> Result<Self, u8> {
        if out.result != RESULT_SUCCESS {
            return Err(out.result);
        }
        match cmd {
            Command::ReadKeyInfo { .. } => Ok(Response::KeyInfo(KeyInfo {
                data_size: out.key_info.data_size,
                data_type: ManagementKey::from_code(out.key_info.data_type),
            })),
            Command::ReadBytes { info, .. } => {
                let size = (info.data_size as usize).min(MAX_VALUE_SIZE);
                Ok(Response::Bytes(TypedValue::new(
                    info.data_type,
                    &out.bytes[..size],
                )))
            }
            Command::WriteBytes { .. } => Ok(Response::Written),
        }
    }
}
