// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory stand-in for a handler library, used by the engine's own
//! tests and by `tests/specs` end-to-end scenarios. No FFI, no threads:
//! everything is resolved synchronously against a queue the test fills.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::device::DeviceKey;
use crate::module::abi::{DisconnectReason, DrainedCommand, ModuleHandle, ModuleLibrary};

#[derive(Default)]
struct MockInner {
    initialized: bool,
    destroyed: bool,
    connected: Vec<DeviceKey>,
    disconnected: Vec<(DeviceKey, DisconnectReason)>,
    forwarded_statuses: Vec<(DeviceKey, Vec<u8>)>,
    forwarded_errors: Vec<(DeviceKey, Vec<u8>)>,
    acked: Vec<(DeviceKey, Vec<u8>)>,
    pending: VecDeque<DrainedCommand>,
}

/// A single fake handler library instance. One `MockModuleLibrary` backs
/// one module id in a test's configuration.
pub struct MockModuleLibrary {
    inner: Mutex<MockInner>,
}

impl MockModuleLibrary {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MockInner::default()) }
    }

    /// Queue a command the next `wait_for_command`/`get_command` pair will
    /// drain, as if the library had produced it on its own.
    pub fn enqueue_command(&self, device: DeviceKey, command_bytes: Vec<u8>) {
        self.inner.lock().pending.push_back(DrainedCommand { device, command_bytes, remaining: 0 });
    }

    pub fn forwarded_statuses(&self) -> Vec<(DeviceKey, Vec<u8>)> {
        self.inner.lock().forwarded_statuses.clone()
    }

    pub fn forwarded_errors(&self) -> Vec<(DeviceKey, Vec<u8>)> {
        self.inner.lock().forwarded_errors.clone()
    }

    pub fn acked(&self) -> Vec<(DeviceKey, Vec<u8>)> {
        self.inner.lock().acked.clone()
    }

    pub fn connected_devices(&self) -> Vec<DeviceKey> {
        self.inner.lock().connected.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }
}

impl Default for MockModuleLibrary {
    fn default() -> Self {
        Self::new()
    }
}

const MOCK_HANDLE: usize = 0xF00D;

impl ModuleLibrary for MockModuleLibrary {
    fn init(&self, _config: &HashMap<String, String>) -> Result<ModuleHandle, String> {
        self.inner.lock().initialized = true;
        Ok(ModuleHandle(MOCK_HANDLE as *mut std::ffi::c_void))
    }

    fn device_connected(&self, _handle: ModuleHandle, device: &DeviceKey) {
        self.inner.lock().connected.push(device.clone());
    }

    fn device_disconnected(&self, _handle: ModuleHandle, reason: DisconnectReason, device: &DeviceKey) {
        let mut inner = self.inner.lock();
        inner.connected.retain(|d| d != device);
        inner.disconnected.push((device.clone(), reason));
    }

    fn forward_status(&self, _handle: ModuleHandle, device: &DeviceKey, status: &[u8]) -> i32 {
        self.inner.lock().forwarded_statuses.push((device.clone(), status.to_vec()));
        0
    }

    fn forward_error_message(&self, _handle: ModuleHandle, device: &DeviceKey, error: &[u8]) -> i32 {
        self.inner.lock().forwarded_errors.push((device.clone(), error.to_vec()));
        0
    }

    fn wait_for_command(&self, _handle: ModuleHandle, _timeout_ms: u32) -> i32 {
        if self.inner.lock().pending.is_empty() {
            1
        } else {
            0
        }
    }

    fn get_command(&self, _handle: ModuleHandle) -> Option<DrainedCommand> {
        let mut inner = self.inner.lock();
        let command = inner.pending.pop_front()?;
        Some(DrainedCommand { remaining: inner.pending.len() as i32, ..command })
    }

    fn command_ack(&self, _handle: ModuleHandle, command_bytes: &[u8], device: &DeviceKey) -> i32 {
        self.inner.lock().acked.push((device.clone(), command_bytes.to_vec()));
        0
    }

    fn destroy(&self, _handle: ModuleHandle) {
        self.inner.lock().destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceKey {
        DeviceKey { module_id: 2, device_type: 1, role: "button".into(), name: "left".into(), priority: 0 }
    }

    #[test]
    fn enqueued_command_is_drained_once() {
        let mock = MockModuleLibrary::new();
        let handle = mock.init(&HashMap::new()).unwrap();
        mock.enqueue_command(device(), vec![1, 2, 3]);

        assert_eq!(mock.wait_for_command(handle, 0), 0);
        let drained = mock.get_command(handle).unwrap();
        assert_eq!(drained.command_bytes, vec![1, 2, 3]);
        assert_eq!(drained.remaining, 0);
        assert!(mock.get_command(handle).is_none());
    }

    #[test]
    fn disconnect_removes_device_from_connected_set() {
        let mock = MockModuleLibrary::new();
        let handle = mock.init(&HashMap::new()).unwrap();
        mock.device_connected(handle, &device());
        assert_eq!(mock.connected_devices().len(), 1);

        mock.device_disconnected(handle, DisconnectReason::Timeout, &device());
        assert!(mock.connected_devices().is_empty());
    }
}
