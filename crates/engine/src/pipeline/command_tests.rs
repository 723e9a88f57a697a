// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::event_queue::EventQueue;
use crate::module::{MockModuleLibrary, ModuleRuntime};

fn device() -> DeviceKey {
    DeviceKey { module_id: 2, device_type: 7, role: "button".into(), name: "A".into(), priority: 0 }
}

fn module_command() -> ModuleCommand {
    ModuleCommand { module_id: 2, device: device(), command_bytes: vec![0x0a, 0x02] }
}

#[test]
fn emit_assigns_increasing_counters_and_enqueues_fifo() {
    let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
    let mut devices = DeviceTable::new();
    devices.upsert(&device());

    let first = pipeline.emit("s", &module_command(), &devices).unwrap();
    let second = pipeline.emit("s", &module_command(), &devices).unwrap();
    assert_eq!(first.counter, 0);
    assert_eq!(second.counter, 1);
    assert_eq!(pipeline.pending_count(2), 2);
}

#[test]
fn emit_discards_command_for_a_disconnected_device() {
    let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
    let devices = DeviceTable::new();
    assert!(pipeline.emit("s", &module_command(), &devices).is_none());
}

#[test]
fn acknowledge_out_of_order_counter_is_an_error() {
    let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
    let mut devices = DeviceTable::new();
    devices.upsert(&device());
    pipeline.emit("s", &module_command(), &devices).unwrap();

    let registry = ModuleRegistry::new();
    let response = proto::CommandResponse {
        session_id: "s".into(),
        counter: 7,
        device: Some((&device()).into()),
        module_id: 2,
    };
    let result = pipeline.acknowledge("s", &response, &registry);
    assert!(matches!(result, Err(EngineError::OutOfOrderAck { expected: 0, got: 7, .. })));
}

#[test]
fn acknowledge_in_order_calls_command_ack_and_dequeues() {
    let mock = Arc::new(MockModuleLibrary::new());
    let (_queue, producer) = EventQueue::bounded(16, Duration::from_millis(50));
    let runtime = ModuleRuntime::start(2, mock.clone(), &HashMap::new(), producer).unwrap();
    let mut registry = ModuleRegistry::new();
    registry.insert(runtime);

    let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
    let mut devices = DeviceTable::new();
    devices.upsert(&device());
    let frame = pipeline.emit("s", &module_command(), &devices).unwrap();

    let response = proto::CommandResponse {
        session_id: "s".into(),
        counter: frame.counter,
        device: Some((&device()).into()),
        module_id: 2,
    };
    pipeline.acknowledge("s", &response, &registry).unwrap();
    assert_eq!(pipeline.pending_count(2), 0);
    assert_eq!(mock.acked().len(), 1);
    registry.shutdown_all();
}

#[test]
fn check_timeouts_detects_an_expired_fifo_head() {
    let mut pipeline = CommandPipeline::new(Duration::from_millis(1));
    let mut devices = DeviceTable::new();
    devices.upsert(&device());
    pipeline.emit("s", &module_command(), &devices).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(matches!(pipeline.check_timeouts(), Some(EngineError::CommandTimeout { module_id: 2, .. })));
}
