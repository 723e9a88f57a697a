// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command pipeline: the per-module pending FIFO, the session counter that
//! tags every emitted command, and the command-response timeout.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::counter::WrappingCounter;
use crate::device::{DeviceKey, DeviceTable};
use crate::error::EngineError;
use crate::event::ModuleCommand;
use crate::module::ModuleRegistry;
use crate::proto;

struct PendingCommand {
    counter: u32,
    device: DeviceKey,
    command_bytes: Vec<u8>,
    issued_at: Instant,
}

pub struct CommandPipeline {
    session_counter: WrappingCounter,
    per_module: HashMap<u16, VecDeque<PendingCommand>>,
    timeout: Duration,
}

impl CommandPipeline {
    pub fn new(timeout: Duration) -> Self {
        Self::with_starting_counter(timeout, 0)
    }

    /// Like [`CommandPipeline::new`], but seeds the session counter at
    /// `start` instead of `0`. Used by the counter-wrap scenario test, which
    /// needs to observe the transition across `u32::MAX`.
    pub fn with_starting_counter(timeout: Duration, start: u32) -> Self {
        Self { session_counter: WrappingCounter::new(start), per_module: HashMap::new(), timeout }
    }

    /// Emit path: a module produced a command. Returns the wire frame to
    /// publish, or `None` if the target device is no longer connected.
    pub fn emit(
        &mut self,
        session_id: &str,
        cmd: &ModuleCommand,
        devices: &DeviceTable,
    ) -> Option<proto::Command> {
        if !devices.contains(&cmd.device) {
            warn!(
                module_id = cmd.module_id,
                device = ?cmd.device,
                "discarding module-produced command for a device no longer connected"
            );
            return None;
        }

        let counter = self.session_counter.next();
        self.per_module.entry(cmd.module_id).or_default().push_back(PendingCommand {
            counter,
            device: cmd.device.clone(),
            command_bytes: cmd.command_bytes.clone(),
            issued_at: Instant::now(),
        });

        Some(proto::Command {
            session_id: session_id.to_owned(),
            counter,
            device: Some((&cmd.device).into()),
            module_id: u32::from(cmd.module_id),
            payload: cmd.command_bytes.clone(),
        })
    }

    /// Acknowledgement path. `Err` means a protocol violation; the caller
    /// transitions the session to `Error`.
    pub fn acknowledge(
        &mut self,
        session_id: &str,
        frame: &proto::CommandResponse,
        modules: &ModuleRegistry,
    ) -> Result<(), EngineError> {
        if frame.session_id != session_id {
            return Err(EngineError::Protocol(format!(
                "command response carried session id {:?}, expected {session_id:?}",
                frame.session_id
            )));
        }

        let module_id = frame.module_id as u16;
        let fifo = self.per_module.get_mut(&module_id);
        let head_counter = fifo.as_ref().and_then(|f| f.front()).map(|p| p.counter);

        let Some(expected) = head_counter else {
            return Err(EngineError::OutOfOrderAck { module_id, expected: 0, got: frame.counter });
        };
        if expected != frame.counter {
            return Err(EngineError::OutOfOrderAck { module_id, expected, got: frame.counter });
        }

        let fifo = fifo.expect("checked above");
        let head = fifo.pop_front().expect("checked above");
        if let Some(module) = modules.get(module_id) {
            let result = module.command_ack(&head.command_bytes, &head.device);
            if result != 0 {
                warn!(module_id, result, "module rejected command_ack, session continues");
            }
        }
        Ok(())
    }

    /// Returns the first module whose pending FIFO head has exceeded the
    /// command-response timeout, if any.
    pub fn check_timeouts(&self) -> Option<EngineError> {
        for (&module_id, fifo) in &self.per_module {
            if let Some(front) = fifo.front() {
                if front.issued_at.elapsed() > self.timeout {
                    return Some(EngineError::CommandTimeout { module_id, counter: front.counter });
                }
            }
        }
        None
    }

    pub fn pending_count(&self, module_id: u16) -> usize {
        self.per_module.get(&module_id).map(|f| f.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
