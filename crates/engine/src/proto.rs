// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generated Fleet Protocol wire types, plus small conversions used by the
//! pipelines and bus adapter.

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/fleet.v1.rs"));

use crate::device::DeviceKey;

impl From<&DeviceKey> for DeviceId {
    fn from(key: &DeviceKey) -> Self {
        DeviceId {
            module_id: u32::from(key.module_id),
            device_type: key.device_type,
            role: key.role.clone(),
            name: key.name.clone(),
            priority: key.priority,
        }
    }
}

impl DeviceId {
    /// The subset of fields that identify a device (excludes `priority`,
    /// which is mutable metadata per the data model).
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            module_id: self.module_id as u16,
            device_type: self.device_type,
            role: self.role.clone(),
            name: self.name.clone(),
            priority: self.priority,
        }
    }
}

impl FleetMessage {
    pub fn session_id(&self) -> Option<&str> {
        use fleet_message::Payload;
        match &self.payload {
            Some(Payload::Connect(_)) => None,
            Some(Payload::ConnectResponse(m)) => Some(&m.session_id),
            Some(Payload::Status(m)) => Some(&m.session_id),
            Some(Payload::StatusResponse(m)) => Some(&m.session_id),
            Some(Payload::Command(m)) => Some(&m.session_id),
            Some(Payload::CommandResponse(m)) => Some(&m.session_id),
            Some(Payload::Disconnect(m)) => Some(&m.session_id),
            None => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        use fleet_message::Payload;
        match &self.payload {
            Some(Payload::Connect(_)) => "connect",
            Some(Payload::ConnectResponse(_)) => "connect_response",
            Some(Payload::Status(_)) => "status",
            Some(Payload::StatusResponse(_)) => "status_response",
            Some(Payload::Command(_)) => "command",
            Some(Payload::CommandResponse(_)) => "command_response",
            Some(Payload::Disconnect(_)) => "disconnect",
            None => "empty",
        }
    }
}

pub fn wrap(payload: fleet_message::Payload) -> FleetMessage {
    FleetMessage { payload: Some(payload) }
}
