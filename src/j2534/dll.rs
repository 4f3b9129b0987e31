use std::ffi::{c_char, c_void};
use std::path::{Path, PathBuf};

use crate::j2534::registry::DeviceInfo;
use crate::j2534::types::*;
use crate::j2534::{BindingLoader, LoadError, PassThruApi};

/// Type aliases for J2534 DLL function pointers
type PassThruOpenFn = unsafe extern "system" fn(*const c_void, *mut u32) -> u32;
type PassThruCloseFn = unsafe extern "system" fn(u32) -> u32;
type PassThruConnectFn = unsafe extern "system" fn(u32, u32, u32, u32, *mut u32) -> u32;
type PassThruDisconnectFn = unsafe extern "system" fn(u32) -> u32;
type PassThruReadMsgsFn = unsafe extern "system" fn(u32, *mut PassThruMsg, *mut u32, u32) -> u32;
type PassThruWriteMsgsFn = unsafe extern "system" fn(u32, *const PassThruMsg, *mut u32, u32) -> u32;
type PassThruStartMsgFilterFn =
    unsafe extern "system" fn(u32, u32, *const PassThruMsg, *const PassThruMsg, *const PassThruMsg, *mut u32) -> u32;
type PassThruStopMsgFilterFn = unsafe extern "system" fn(u32, u32) -> u32;
type PassThruIoctlFn = unsafe extern "system" fn(u32, u32, *const c_void, *mut c_void) -> u32;
type PassThruReadVersionFn = unsafe extern "system" fn(u32, *mut u8, *mut u8, *mut u8) -> u32;
type PassThruGetLastErrorFn = unsafe extern "system" fn(*mut c_char) -> u32;
type PassThruSetProgrammingVoltageFn = unsafe extern "system" fn(u32, u32, u32) -> u32;

/// Holds a dynamically loaded J2534 DLL and its function pointers
pub struct J2534Lib {
    _lib: libloading::Library,
    path: PathBuf,
    pub pass_thru_open: PassThruOpenFn,
    pub pass_thru_close: PassThruCloseFn,
    pub pass_thru_connect: PassThruConnectFn,
    pub pass_thru_disconnect: PassThruDisconnectFn,
    pub pass_thru_read_msgs: PassThruReadMsgsFn,
    pub pass_thru_write_msgs: PassThruWriteMsgsFn,
    pub pass_thru_start_msg_filter: PassThruStartMsgFilterFn,
    pub pass_thru_stop_msg_filter: PassThruStopMsgFilterFn,
    pub pass_thru_ioctl: PassThruIoctlFn,
    pub pass_thru_read_version: PassThruReadVersionFn,
    pub pass_thru_get_last_error: PassThruGetLastErrorFn,
    pub pass_thru_set_programming_voltage: PassThruSetProgrammingVoltageFn,
}

impl J2534Lib {
    /// Load a J2534 DLL from the given path and resolve every PassThru export
    pub fn load(dll_path: &Path) -> Result<Self, LoadError> {
        let fail = |reason: String| LoadError {
            path: dll_path.to_path_buf(),
            reason,
        };

        unsafe {
            let lib = libloading::Library::new(dll_path).map_err(|e| fail(e.to_string()))?;

            let pass_thru_open = *lib
                .get::<PassThruOpenFn>(b"PassThruOpen\0")
                .map_err(|e| fail(format!("PassThruOpen not found: {}", e)))?;
            let pass_thru_close = *lib
                .get::<PassThruCloseFn>(b"PassThruClose\0")
                .map_err(|e| fail(format!("PassThruClose not found: {}", e)))?;
            let pass_thru_connect = *lib
                .get::<PassThruConnectFn>(b"PassThruConnect\0")
                .map_err(|e| fail(format!("PassThruConnect not found: {}", e)))?;
            let pass_thru_disconnect = *lib
                .get::<PassThruDisconnectFn>(b"PassThruDisconnect\0")
                .map_err(|e| fail(format!("PassThruDisconnect not found: {}", e)))?;
            let pass_thru_read_msgs = *lib
                .get::<PassThruReadMsgsFn>(b"PassThruReadMsgs\0")
                .map_err(|e| fail(format!("PassThruReadMsgs not found: {}", e)))?;
            let pass_thru_write_msgs = *lib
                .get::<PassThruWriteMsgsFn>(b"PassThruWriteMsgs\0")
                .map_err(|e| fail(format!("PassThruWriteMsgs not found: {}", e)))?;
            let pass_thru_start_msg_filter = *lib
                .get::<PassThruStartMsgFilterFn>(b"PassThruStartMsgFilter\0")
                .map_err(|e| fail(format!("PassThruStartMsgFilter not found: {}", e)))?;
            let pass_thru_stop_msg_filter = *lib
                .get::<PassThruStopMsgFilterFn>(b"PassThruStopMsgFilter\0")
                .map_err(|e| fail(format!("PassThruStopMsgFilter not found: {}", e)))?;
            let pass_thru_ioctl = *lib
                .get::<PassThruIoctlFn>(b"PassThruIoctl\0")
                .map_err(|e| fail(format!("PassThruIoctl not found: {}", e)))?;
            let pass_thru_read_version = *lib
                .get::<PassThruReadVersionFn>(b"PassThruReadVersion\0")
                .map_err(|e| fail(format!("PassThruReadVersion not found: {}", e)))?;
            let pass_thru_get_last_error = *lib
                .get::<PassThruGetLastErrorFn>(b"PassThruGetLastError\0")
                .map_err(|e| fail(format!("PassThruGetLastError not found: {}", e)))?;
            let pass_thru_set_programming_voltage = *lib
                .get::<PassThruSetProgrammingVoltageFn>(b"PassThruSetProgrammingVoltage\0")
                .map_err(|e| fail(format!("PassThruSetProgrammingVoltage not found: {}", e)))?;

            Ok(Self {
                _lib: lib,
                path: dll_path.to_path_buf(),
                pass_thru_open,
                pass_thru_close,
                pass_thru_connect,
                pass_thru_disconnect,
                pass_thru_read_msgs,
                pass_thru_write_msgs,
                pass_thru_start_msg_filter,
                pass_thru_stop_msg_filter,
                pass_thru_ioctl,
                pass_thru_read_version,
                pass_thru_get_last_error,
                pass_thru_set_programming_voltage,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loads vendor DLLs named by registry entries
#[derive(Debug, Default, Clone, Copy)]
pub struct DllLoader;

impl BindingLoader for DllLoader {
    fn load(&self, device: &DeviceInfo) -> Result<Box<dyn PassThruApi>, LoadError> {
        log::debug!(
            "Loading J2534 library for '{}' from {}",
            device.name,
            device.library_path.display()
        );
        let lib = J2534Lib::load(&device.library_path)?;
        Ok(Box::new(lib))
    }
}
