use std::collections::HashMap;

use log::debug;

use super::codec::{ManagementKey, TypedValue};
use super::device_io::{KernReturn, SmcIo};
use super::protocol::{Command, KeyInfo, RESULT_KEY_NOT_FOUND, Response};
use crate::error::ChannelError;

/// Keyed read/write access to the management controller.
#[cfg_attr(test, mockall::automock)]
pub trait SmcChannel: Send {
    fn read(&mut self, key: ManagementKey) -> Result<TypedValue, ChannelError>;
    fn write(&mut self, key: ManagementKey, value: &TypedValue) -> Result<(), ChannelError>;
}

/// [`SmcChannel`] over a privileged struct call.
///
/// Reads query key info first and cache it, so each key costs two calls the
/// first time and one afterwards.
#[derive(Debug)]
pub struct ControllerChannel<Io: SmcIo> {
    io: Io,
    key_info: HashMap<ManagementKey, KeyInfo>,
}

#[derive(Clone, Copy)]
enum Direction {
    Read,
    Write,
}

impl<Io: SmcIo> ControllerChannel<Io> {
    pub fn new(io: Io) -> Self {
        Self {
            io,
            key_info: HashMap::new(),
        }
    }

    fn request(&self, cmd: &Command, direction: Direction) -> Result<Response, ChannelError> {
        let key = cmd.key();
        let out = self
            .io
            .call(&cmd.to_params())
            .map_err(|kr| map_kern_return(key, kr, direction))?;
        Response::parse(cmd, &out).map_err(|result| map_result(key, result, direction))
    }

    fn key_info(&mut self, key: ManagementKey) -> Result<KeyInfo, ChannelError> {
        if let Some(info) = self.key_info.get(&key) {
            return Ok(*info);
        }
        match self.request(&Command::ReadKeyInfo { key }, Direction::Read)? {
            Response::KeyInfo(info) => {
                debug!("Key {key}: {} bytes of {}", info.data_size, info.data_type);
                self.key_info.insert(key, info);
                Ok(info)
            }
            _ => Err(ChannelError::Transient { key, code: 0 }),
        }
    }
}

impl<Io: SmcIo> SmcChannel for ControllerChannel<Io> {
    fn read(&mut self, key: ManagementKey) -> Result<TypedValue, ChannelError> {
        let info = self.key_info(key)?;
        match self.request(&Command::ReadBytes { key, info }, Direction::Read)? {
            Response::Bytes(value) => Ok(value),
            _ => Err(ChannelError::Transient { key, code: 0 }),
        }
    }

    fn write(&mut self, key: ManagementKey, value: &TypedValue) -> Result<(), ChannelError> {
        let cmd = Command::WriteBytes {
            key,
            value: value.clone(),
        };
        self.request(&cmd, Direction::Write).map(|_| ())
    }
}

fn map_kern_return(key: ManagementKey, kr: KernReturn, direction: Direction) -> ChannelError {
    if kr.is_permission() {
        ChannelError::PermissionDenied { key }
    } else if kr.is_disconnect() {
        ChannelError::Closed
    } else {
        failure(key, kr.0, direction)
    }
}

fn map_result(key: ManagementKey, result: u8, direction: Direction) -> ChannelError {
    if result == RESULT_KEY_NOT_FOUND {
        ChannelError::KeyNotSupported { key }
    } else {
        failure(key, u32::from(result), direction)
    }
}

fn failure(key: ManagementKey, code: u32, direction: Direction) -> ChannelError {
    match direction {
        Direction::Read => ChannelError::Transient { key, code },
        Direction::Write => ChannelError::WriteRejected { key, code },
    }
}

/// Opens the machine's AppleSMC service.
#[cfg(target_os = "macos")]
pub fn open_default() -> Result<Box<dyn SmcChannel>, ChannelError> {
    let io = super::iokit::IoKitConnection::open()?;
    Ok(Box::new(ControllerChannel::new(io)))
}

/// Opens the machine's AppleSMC service.
#[cfg(not(target_os = "macos"))]
pub fn open_default() -> Result<Box<dyn SmcChannel>, ChannelError> {
    Err(ChannelError::Unavailable(
        "AppleSMC is only available on macOS".to_string(),
    ))
}
