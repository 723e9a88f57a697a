// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status pipeline: per-device counter monotonicity, module dispatch, and
//! the absolute last-status-time clock that drives the status timeout.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::counter;
use crate::device::{DeviceIdentity, DeviceKey, DeviceTable};
use crate::error::EngineError;
use crate::module::{DisconnectReason, ModuleRegistry};
use crate::proto::{self, FleetMessage};

/// Result of handling one inbound `Status` frame.
#[derive(Debug)]
pub enum StatusOutcome {
    /// Forwarded to the module; publish `response`.
    Forwarded { response: proto::StatusResponse, newly_connected: bool },
    /// `module_id` was not registered for this car; publish `response`, no
    /// handler call made.
    UnknownModule { response: proto::StatusResponse },
    /// Counter was not strictly greater than the last seen value for this
    /// device; dropped with no response per spec.
    Stale,
}

pub struct StatusPipeline {
    last_seen_counter: HashMap<DeviceIdentity, u32>,
    last_status_at: Instant,
    send_invalid_command: bool,
    /// Modules whose most recent forward call failed validation and whose
    /// next produced command should be suppressed when `send_invalid_command`
    /// is `false`. See DESIGN.md for why this approximates the spec's
    /// per-status validation outcome, which the handler ABI has no separate
    /// signal for.
    invalid_modules: HashSet<u16>,
}

impl StatusPipeline {
    pub fn new(send_invalid_command: bool) -> Self {
        Self {
            last_seen_counter: HashMap::new(),
            last_status_at: Instant::now(),
            send_invalid_command,
            invalid_modules: HashSet::new(),
        }
    }

    /// Consumes the "last forward for this module was invalid" marker.
    /// Always `false` when `send_invalid_command` is `true`.
    pub fn take_suppressed(&mut self, module_id: u16) -> bool {
        if self.send_invalid_command {
            return false;
        }
        self.invalid_modules.remove(&module_id)
    }

    /// Whether `timeout` has elapsed since the last accepted status.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_status_at.elapsed() > timeout
    }

    /// Reinitializes the clock; called when Running begins.
    pub fn arm(&mut self) {
        self.last_status_at = Instant::now();
    }

    pub fn process(
        &mut self,
        session_id: &str,
        frame: &proto::Status,
        devices: &mut DeviceTable,
        modules: &ModuleRegistry,
    ) -> Result<StatusOutcome, EngineError> {
        if frame.session_id != session_id {
            return Err(EngineError::Protocol(format!(
                "status frame carried session id {:?}, expected {session_id:?}",
                frame.session_id
            )));
        }

        let module_id = frame.module_id as u16;
        let Some(module) = modules.get(module_id) else {
            return Ok(StatusOutcome::UnknownModule {
                response: proto::StatusResponse {
                    session_id: session_id.to_owned(),
                    counter: frame.counter,
                    device: frame.device.clone(),
                    error: proto::StatusError::UnknownModule as i32,
                },
            });
        };

        let device_key = device_key_from_frame(frame, module_id);
        let identity = DeviceIdentity::from(&device_key);
        if let Some(&previous) = self.last_seen_counter.get(&identity) {
            if !counter::is_after(frame.counter, previous) {
                return Ok(StatusOutcome::Stale);
            }
        }
        self.last_seen_counter.insert(identity, frame.counter);
        self.last_status_at = Instant::now();

        let newly_connected = devices.upsert(&device_key);
        if newly_connected {
            module.device_connected(&device_key);
        }

        let call_result = if frame.is_error {
            module.forward_error_message(&device_key, &frame.payload)
        } else {
            module.forward_status(&device_key, &frame.payload)
        };
        if call_result != 0 {
            warn!(module_id, call_result, "module call failed forwarding a status, session continues");
            self.invalid_modules.insert(module_id);
        }

        Ok(StatusOutcome::Forwarded {
            response: proto::StatusResponse {
                session_id: session_id.to_owned(),
                counter: frame.counter,
                device: frame.device.clone(),
                error: proto::StatusError::None as i32,
            },
            newly_connected,
        })
    }

    pub fn disconnect_all(&mut self, devices: &mut DeviceTable, modules: &ModuleRegistry, reason: DisconnectReason) {
        for module_id in modules.module_ids().collect::<Vec<_>>() {
            for entry in devices.remove_module(module_id) {
                if let Some(module) = modules.get(module_id) {
                    module.device_disconnected(reason, &entry.key());
                }
            }
        }
        info!("disconnected all devices at session teardown");
    }
}

fn device_key_from_frame(frame: &proto::Status, module_id: u16) -> DeviceKey {
    frame
        .device
        .as_ref()
        .map(|d| DeviceKey { module_id, ..d.key() })
        .unwrap_or(DeviceKey { module_id, device_type: 0, role: String::new(), name: String::new(), priority: 0 })
}

pub fn wrap_response(response: proto::StatusResponse) -> FleetMessage {
    proto::wrap(proto::fleet_message::Payload::StatusResponse(response))
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
