// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device table. Owned exclusively by the session controller thread, so
//! it is a plain `HashMap` with no internal locking.

use std::collections::HashMap;

/// A device as named on the wire: `(module_id, device_type, role, name)`
/// identify it, `priority` is mutable metadata carried alongside. Two
/// `DeviceKey`s with the same identity but a different `priority` still
/// compare unequal here — callers that need identity-only comparison go
/// through [`DeviceIdentity`], which is what the table actually keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub module_id: u16,
    pub device_type: u32,
    pub role: String,
    pub name: String,
    pub priority: u32,
}

/// Map key used by the device table: identity only, never `priority`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub module_id: u16,
    pub device_type: u32,
    pub role: String,
    pub name: String,
}

impl From<&DeviceKey> for DeviceIdentity {
    fn from(key: &DeviceKey) -> Self {
        Self {
            module_id: key.module_id,
            device_type: key.device_type,
            role: key.role.clone(),
            name: key.name.clone(),
        }
    }
}

/// A device currently tracked by the table.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub module_id: u16,
    pub device_type: u32,
    pub role: String,
    pub name: String,
    pub priority: u32,
}

impl DeviceEntry {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            module_id: self.module_id,
            device_type: self.device_type,
            role: self.role.clone(),
            name: self.name.clone(),
            priority: self.priority,
        }
    }
}

/// Keyed table of currently-connected devices, one entry per
/// `(module_id, device_type, role, name)`.
#[derive(Debug, Default)]
pub struct DeviceTable {
    entries: HashMap<DeviceIdentity, DeviceEntry>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a device. Returns `true` if this is a newly-seen
    /// device (the module's `device_connected` hook must fire).
    pub fn upsert(&mut self, key: &DeviceKey) -> bool {
        let identity = DeviceIdentity::from(key);
        let is_new = !self.entries.contains_key(&identity);
        self.entries.insert(
            identity,
            DeviceEntry {
                module_id: key.module_id,
                device_type: key.device_type,
                role: key.role.clone(),
                name: key.name.clone(),
                priority: key.priority,
            },
        );
        is_new
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.entries.contains_key(&DeviceIdentity::from(key))
    }

    pub fn remove(&mut self, key: &DeviceKey) -> Option<DeviceEntry> {
        self.entries.remove(&DeviceIdentity::from(key))
    }

    pub fn devices_for_module(&self, module_id: u16) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.values().filter(move |e| e.module_id == module_id)
    }

    pub fn remove_module(&mut self, module_id: u16) -> Vec<DeviceEntry> {
        let removed: Vec<DeviceIdentity> = self
            .entries
            .iter()
            .filter(|(_, e)| e.module_id == module_id)
            .map(|(k, _)| k.clone())
            .collect();
        removed.into_iter().filter_map(|k| self.entries.remove(&k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
