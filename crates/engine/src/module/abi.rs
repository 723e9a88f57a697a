// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine-side handler library ABI (spec §4.4 / §6): a capability
//! trait whose two concrete providers are a dynamic-library loader
//! ([`super::dynamic::DynamicModuleLibrary`]) and an in-memory mock for
//! tests ([`super::mock::MockModuleLibrary`]).

use crate::device::DeviceKey;

/// Opaque handle returned by a module's `init`. The engine never
/// dereferences it; it is only ever passed back into the library.
///
/// Safety: the handler library is required (per spec §5) to make every
/// operation in this trait reentrant-safe with respect to the others, so a
/// handle may be shared between the owning module's command-waiting thread
/// and the session controller thread.
#[derive(Debug, Clone, Copy)]
pub struct ModuleHandle(pub *mut std::ffi::c_void);

unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

/// Why a device was disconnected, passed to `device_disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Announced,
    Timeout,
    Error,
}

/// One command drained from `get_command`, plus the library's count of
/// commands still pending after this one.
#[derive(Debug, Clone)]
pub struct DrainedCommand {
    pub device: DeviceKey,
    pub command_bytes: Vec<u8>,
    pub remaining: i32,
}

/// The capability interface the session engine uses to drive one handler
/// library. Implementations own the handle's lifecycle between `init` and
/// `destroy`.
pub trait ModuleLibrary: Send + Sync {
    fn init(&self, config: &std::collections::HashMap<String, String>) -> Result<ModuleHandle, String>;

    fn device_connected(&self, handle: ModuleHandle, device: &DeviceKey);

    fn device_disconnected(&self, handle: ModuleHandle, reason: DisconnectReason, device: &DeviceKey);

    /// Returns the library's raw status code; `0` is success.
    fn forward_status(&self, handle: ModuleHandle, device: &DeviceKey, status: &[u8]) -> i32;

    /// Returns the library's raw status code; `0` is success.
    fn forward_error_message(&self, handle: ModuleHandle, device: &DeviceKey, error: &[u8]) -> i32;

    /// Blocks until a command is available or `timeout_ms` elapses. Returns
    /// the library's raw status code; negative means the command-waiting
    /// thread should terminate.
    fn wait_for_command(&self, handle: ModuleHandle, timeout_ms: u32) -> i32;

    /// Non-blocking drain. `None` means nothing was available (or the
    /// library reported an error, which is logged by the caller).
    fn get_command(&self, handle: ModuleHandle) -> Option<DrainedCommand>;

    /// Returns the library's raw status code; `0` is success.
    fn command_ack(&self, handle: ModuleHandle, command_bytes: &[u8], device: &DeviceKey) -> i32;

    fn destroy(&self, handle: ModuleHandle);
}
