// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns one loaded module across its lifetime: the `init`..`destroy` span,
//! and the dedicated command-waiting thread spec §4.4 calls for (the ABI's
//! `wait_for_command` is a blocking call, so it cannot run as a plain async
//! task without a `spawn_blocking` wrapper that buys nothing here).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::device::DeviceKey;
use crate::error::EngineError;
use crate::event::{ModuleCommand, SessionEvent};
use crate::event_queue::EventProducer;
use crate::module::abi::{DisconnectReason, ModuleHandle, ModuleLibrary};

/// How long `wait_for_command` may block before the thread re-checks the
/// shutdown flag. Short enough that `shutdown()` returns promptly.
pub const WAIT_FOR_COMMAND_POLL_MS: u32 = 250;

pub struct ModuleRuntime {
    module_id: u16,
    library: Arc<dyn ModuleLibrary>,
    handle: ModuleHandle,
    wait_thread: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ModuleRuntime {
    /// Initializes the library and starts its command-waiting thread.
    pub fn start(
        module_id: u16,
        library: Arc<dyn ModuleLibrary>,
        config: &HashMap<String, String>,
        producer: EventProducer,
    ) -> Result<Self, EngineError> {
        let handle = library
            .init(config)
            .map_err(|reason| EngineError::ModuleInitFailed(module_id, reason))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_library = Arc::clone(&library);
        let thread_shutdown = Arc::clone(&shutdown);

        let wait_thread = std::thread::Builder::new()
            .name(format!("module-{module_id}-wait"))
            .spawn(move || {
                run_wait_loop(module_id, thread_library, handle, thread_shutdown, producer);
            })
            .expect("failed to spawn module command-waiting thread");

        Ok(Self { module_id, library, handle, wait_thread: Some(wait_thread), shutdown })
    }

    pub fn module_id(&self) -> u16 {
        self.module_id
    }

    pub fn device_connected(&self, device: &DeviceKey) {
        self.library.device_connected(self.handle, device);
    }

    pub fn device_disconnected(&self, reason: DisconnectReason, device: &DeviceKey) {
        self.library.device_disconnected(self.handle, reason, device);
    }

    pub fn forward_status(&self, device: &DeviceKey, status: &[u8]) -> i32 {
        self.library.forward_status(self.handle, device, status)
    }

    pub fn forward_error_message(&self, device: &DeviceKey, error: &[u8]) -> i32 {
        self.library.forward_error_message(self.handle, device, error)
    }

    pub fn command_ack(&self, command_bytes: &[u8], device: &DeviceKey) -> i32 {
        self.library.command_ack(self.handle, command_bytes, device)
    }

    /// Signals the command-waiting thread to stop, joins it, then calls
    /// `destroy`. Consumes `self`: a runtime that has been shut down cannot
    /// be used again.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.wait_thread.take() {
            if thread.join().is_err() {
                warn!(module_id = self.module_id, "command-waiting thread panicked");
            }
        }
        self.library.destroy(self.handle);
    }
}

fn run_wait_loop(
    module_id: u16,
    library: Arc<dyn ModuleLibrary>,
    handle: ModuleHandle,
    shutdown: Arc<AtomicBool>,
    producer: EventProducer,
) {
    while !shutdown.load(Ordering::Acquire) {
        let status = library.wait_for_command(handle, WAIT_FOR_COMMAND_POLL_MS);
        if status < 0 {
            debug!(module_id, status, "module command-waiting thread stopping on library request");
            return;
        }
        if status != 0 {
            continue; // timed out this poll interval; re-check shutdown and retry
        }

        loop {
            let Some(drained) = library.get_command(handle) else { break };
            let remaining = drained.remaining;
            let command = ModuleCommand {
                module_id,
                device: drained.device,
                command_bytes: drained.command_bytes,
            };
            if producer.push_blocking(SessionEvent::CommandFromModule(command)).is_err() {
                warn!(module_id, "dropping module command: session event queue is gone");
                return;
            }
            if remaining <= 0 {
                break;
            }
        }
    }
}
