use std::ffi::{c_char, c_void};
use std::mem::size_of;

use log::debug;

use super::device_io::{KERNEL_INDEX_SMC, KernReturn, SmcIo};
use super::protocol::SmcParams;
use crate::error::ChannelError;

type IoObject = u32;
type MachPort = u32;
type KernReturnT = i32;

const KERN_SUCCESS: KernReturnT = 0;
const MACH_PORT_NULL: MachPort = 0;

#[link(name = "IOKit", kind = "framework")]
unsafe extern "C" {
    fn IOServiceMatching(name: *const c_char) -> *mut c_void;
    fn IOServiceGetMatchingService(main_port: MachPort, matching: *mut c_void) -> IoObject;
    fn IOServiceOpen(
        service: IoObject,
        owning_task: MachPort,
        kind: u32,
        connect: *mut IoObject,
    ) -> KernReturnT;
    fn IOServiceClose(connect: IoObject) -> KernReturnT;
    fn IOObjectRelease(object: IoObject) -> KernReturnT;
    fn IOConnectCallStructMethod(
        connection: IoObject,
        selector: u32,
        input: *const c_void,
        input_size: usize,
        output: *mut c_void,
        output_size: *mut usize,
    ) -> KernReturnT;
}

unsafe extern "C" {
    static mach_task_self_: MachPort;
}

/// Open session with the AppleSMC service. Closed on drop.
#[derive(Debug)]
pub struct IoKitConnection {
    connect: IoObject,
}

impl IoKitConnection {
    pub fn open() -> Result<Self, ChannelError> {
        // SAFETY: the name is a NUL-terminated literal. The returned dictionary
        // is consumed by IOServiceGetMatchingService.
        let matching = unsafe { IOServiceMatching(c"AppleSMC".as_ptr()) };
        if matching.is_null() {
            return Err(ChannelError::Unavailable(
                "IOServiceMatching(AppleSMC) returned null".to_string(),
            ));
        }

        let service = unsafe { IOServiceGetMatchingService(MACH_PORT_NULL, matching) };
        if service == 0 {
            return Err(ChannelError::Unavailable(
                "AppleSMC service not found".to_string(),
            ));
        }

        let mut connect: IoObject = 0;
        // SAFETY: `service` is a valid object reference released right after.
        let kr = unsafe {
            let kr = IOServiceOpen(service, mach_task_self_, 0, &mut connect);
            IOObjectRelease(service);
            kr
        };
        if kr != KERN_SUCCESS {
            return Err(ChannelError::Unavailable(format!(
                "IOServiceOpen failed: {:#x}",
                kr as u32
            )));
        }

        debug!("Opened AppleSMC connection {connect}");
        Ok(Self { connect })
    }
}

impl SmcIo for IoKitConnection {
    fn call(&self, input: &SmcParams) -> Result<SmcParams, KernReturn> {
        let mut output = SmcParams::default();
        let mut output_size = size_of::<SmcParams>();
        // SAFETY: both buffers are live `SmcParams` of the declared size.
        let kr = unsafe {
            IOConnectCallStructMethod(
                self.connect,
                KERNEL_INDEX_SMC,
                (input as *const SmcParams).cast(),
                size_of::<SmcParams>(),
                (&mut output as *mut SmcParams).cast(),
                &mut output_size,
            )
        };
        if kr == KERN_SUCCESS {
            Ok(output)
        } else {
            Err(KernReturn(kr as u32))
        }
    }
}

impl Drop for IoKitConnection {
    fn drop(&mut self) {
        debug!("Closing AppleSMC connection {}", self.connect);
        unsafe {
            IOServiceClose(self.connect);
        }
    }
}
