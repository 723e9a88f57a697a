// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn key(priority: u32) -> DeviceKey {
    DeviceKey {
        module_id: 2,
        device_type: 7,
        role: "button".to_owned(),
        name: "A".to_owned(),
        priority,
    }
}

#[test]
fn upsert_reports_new_device_once() {
    let mut table = DeviceTable::new();
    assert!(table.upsert(&key(0)));
    assert!(!table.upsert(&key(0)));
    assert_eq!(table.len(), 1);
}

#[test]
fn priority_change_does_not_look_like_a_new_device() {
    let mut table = DeviceTable::new();
    assert!(table.upsert(&key(5)));
    assert!(!table.upsert(&key(1)));
    assert_eq!(table.len(), 1);
    assert!(table.contains(&key(1)));
}

#[test]
fn remove_drops_the_entry() {
    let mut table = DeviceTable::new();
    table.upsert(&key(0));
    assert!(table.remove(&key(0)).is_some());
    assert!(!table.contains(&key(0)));
}

#[test]
fn remove_module_clears_only_that_modules_devices() {
    let mut table = DeviceTable::new();
    table.upsert(&key(0));
    let mut other = key(0);
    other.module_id = 3;
    table.upsert(&other);

    let removed = table.remove_module(2);
    assert_eq!(removed.len(), 1);
    assert_eq!(table.len(), 1);
    assert!(table.contains(&other));
}
