// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic-library provider: loads one handler library with the target
//! platform's loader and calls its C-linkage symbols per spec §4.4/§6.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;

use libloading::{Library, Symbol};

use crate::device::DeviceKey;
use crate::error::ModuleError;
use crate::module::abi::{DisconnectReason, DrainedCommand, ModuleHandle, ModuleLibrary};

/// Wire format for a device id passed across the ABI boundary. `role` and
/// `name` are borrowed, null-terminated C strings valid only for the
/// duration of the call.
#[repr(C)]
struct CDeviceId {
    module_id: u16,
    device_type: u32,
    role: *const c_char,
    name: *const c_char,
    priority: u32,
}

/// `{size, data}` per spec §6. `data` ownership depends on the call: the
/// engine owns buffers it passes in; the library owns buffers it returns.
#[repr(C)]
struct CBuffer {
    size: usize,
    data: *mut u8,
}

impl CBuffer {
    fn borrowing(bytes: &[u8]) -> Self {
        Self { size: bytes.len(), data: bytes.as_ptr() as *mut u8 }
    }

    fn empty() -> Self {
        Self { size: 0, data: std::ptr::null_mut() }
    }
}

type InitFn = unsafe extern "C" fn(*const c_char, usize) -> *mut c_void;
type DeviceConnectedFn = unsafe extern "C" fn(*mut c_void, *const CDeviceId);
type DeviceDisconnectedFn = unsafe extern "C" fn(*mut c_void, i32, *const CDeviceId);
type ForwardFn = unsafe extern "C" fn(*mut c_void, *const CDeviceId, CBuffer) -> i32;
type WaitForCommandFn = unsafe extern "C" fn(*mut c_void, u32) -> i32;
type GetCommandFn = unsafe extern "C" fn(*mut c_void, *mut CDeviceId, *mut CBuffer) -> i32;
type CommandAckFn = unsafe extern "C" fn(*mut c_void, CBuffer, *const CDeviceId) -> i32;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type DeallocateFn = unsafe extern "C" fn(*mut u8, usize);

/// A loaded handler library. `Library` is kept alive for the runtime's
/// lifetime; symbols are resolved by name on every call rather than cached
/// as raw pointers, trading a hash lookup for a much simpler safety story.
pub struct DynamicModuleLibrary {
    lib: Library,
    path: String,
}

impl DynamicModuleLibrary {
    /// # Safety
    /// Loading and calling into an arbitrary shared library is inherently
    /// unsafe: the caller attests that `path` implements the ABI in
    /// spec §4.4/§6 and is crash-free, per spec §4.4's failure semantics.
    pub unsafe fn load(path: &Path) -> Result<Self, ModuleError> {
        let lib = Library::new(path).map_err(|source| ModuleError::LoadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { lib, path: path.display().to_string() })
    }

    unsafe fn symbol<T>(&self, name: &'static [u8]) -> Result<Symbol<'_, T>, ModuleError> {
        self.lib.get(name).map_err(|source| ModuleError::MissingSymbol {
            path: self.path.clone(),
            symbol: std::str::from_utf8(name).unwrap_or("<invalid>"),
            source,
        })
    }

    fn deallocate(&self, data: *mut u8, size: usize) {
        if data.is_null() {
            return;
        }
        // SAFETY: the library promises `deallocate` frees memory it
        // allocated and returned through this same ABI.
        unsafe {
            if let Ok(dealloc) = self.symbol::<DeallocateFn>(b"deallocate\0") {
                dealloc(data, size);
            }
        }
    }
}

fn encode_config(config: &HashMap<String, String>) -> (CString, usize) {
    // Newline-delimited `key=value` pairs, null-terminated overall. Simple
    // and sufficient for the engine's own key/value configuration maps.
    let joined = config.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\n");
    let len = joined.len();
    (CString::new(joined).unwrap_or_default(), len)
}

fn with_c_device<R>(device: &DeviceKey, f: impl FnOnce(&CDeviceId) -> R) -> R {
    let role = CString::new(device.role.as_str()).unwrap_or_default();
    let name = CString::new(device.name.as_str()).unwrap_or_default();
    let c_device = CDeviceId {
        module_id: device.module_id,
        device_type: device.device_type,
        role: role.as_ptr(),
        name: name.as_ptr(),
        priority: device.priority,
    };
    f(&c_device)
}

impl ModuleLibrary for DynamicModuleLibrary {
    fn init(&self, config: &HashMap<String, String>) -> Result<ModuleHandle, String> {
        let init: Symbol<InitFn> = unsafe { self.symbol(b"init\0") }.map_err(|e| e.to_string())?;
        let (c_config, len) = encode_config(config);
        // SAFETY: `c_config` outlives the call; the library must not
        // retain the pointer past it returning.
        let handle = unsafe { init(c_config.as_ptr(), len) };
        if handle.is_null() {
            return Err(format!("module init() at {} returned a null handle", self.path));
        }
        Ok(ModuleHandle(handle))
    }

    fn device_connected(&self, handle: ModuleHandle, device: &DeviceKey) {
        let Ok(f) = (unsafe { self.symbol::<DeviceConnectedFn>(b"device_connected\0") }) else {
            return;
        };
        with_c_device(device, |c_device| unsafe { f(handle.0, c_device) });
    }

    fn device_disconnected(&self, handle: ModuleHandle, reason: DisconnectReason, device: &DeviceKey) {
        let Ok(f) = (unsafe { self.symbol::<DeviceDisconnectedFn>(b"device_disconnected\0") }) else {
            return;
        };
        let reason_code = match reason {
            DisconnectReason::Announced => 0,
            DisconnectReason::Timeout => 1,
            DisconnectReason::Error => 2,
        };
        with_c_device(device, |c_device| unsafe { f(handle.0, reason_code, c_device) });
    }

    fn forward_status(&self, handle: ModuleHandle, device: &DeviceKey, status: &[u8]) -> i32 {
        let Ok(f) = (unsafe { self.symbol::<ForwardFn>(b"forward_status\0") }) else {
            return -1;
        };
        with_c_device(device, |c_device| unsafe { f(handle.0, c_device, CBuffer::borrowing(status)) })
    }

    fn forward_error_message(&self, handle: ModuleHandle, device: &DeviceKey, error: &[u8]) -> i32 {
        let Ok(f) = (unsafe { self.symbol::<ForwardFn>(b"forward_error_message\0") }) else {
            return -1;
        };
        with_c_device(device, |c_device| unsafe { f(handle.0, c_device, CBuffer::borrowing(error)) })
    }

    fn wait_for_command(&self, handle: ModuleHandle, timeout_ms: u32) -> i32 {
        let Ok(f) = (unsafe { self.symbol::<WaitForCommandFn>(b"wait_for_command\0") }) else {
            return -1;
        };
        unsafe { f(handle.0, timeout_ms) }
    }

    fn get_command(&self, handle: ModuleHandle) -> Option<DrainedCommand> {
        let f = unsafe { self.symbol::<GetCommandFn>(b"get_command\0") }.ok()?;
        let mut out_device = CDeviceId {
            module_id: 0,
            device_type: 0,
            role: std::ptr::null(),
            name: std::ptr::null(),
            priority: 0,
        };
        let mut out_command = CBuffer::empty();
        // SAFETY: `out_device`/`out_command` are valid for the duration of
        // the call; the library is expected to populate them in place.
        let remaining = unsafe { f(handle.0, &mut out_device, &mut out_command) };
        if remaining < 0 {
            return None;
        }

        let role = unsafe { c_str_to_string(out_device.role) };
        let name = unsafe { c_str_to_string(out_device.name) };
        let bytes = if out_command.data.is_null() || out_command.size == 0 {
            Vec::new()
        } else {
            let slice = unsafe { std::slice::from_raw_parts(out_command.data, out_command.size) };
            let copied = slice.to_vec();
            self.deallocate(out_command.data, out_command.size);
            copied
        };

        Some(DrainedCommand {
            device: DeviceKey {
                module_id: out_device.module_id,
                device_type: out_device.device_type,
                role,
                name,
                priority: out_device.priority,
            },
            command_bytes: bytes,
            remaining,
        })
    }

    fn command_ack(&self, handle: ModuleHandle, command_bytes: &[u8], device: &DeviceKey) -> i32 {
        let Ok(f) = (unsafe { self.symbol::<CommandAckFn>(b"command_ack\0") }) else {
            return -1;
        };
        with_c_device(device, |c_device| unsafe {
            f(handle.0, CBuffer::borrowing(command_bytes), c_device)
        })
    }

    fn destroy(&self, handle: ModuleHandle) {
        if let Ok(f) = unsafe { self.symbol::<DestroyFn>(b"destroy\0") } {
            unsafe { f(handle.0) };
        }
    }
}

unsafe fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
