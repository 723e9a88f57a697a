// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The six end-to-end scenarios: one module with id `2`, `timeout = 5`,
//! `company_name = "acme"`, `car_name = "v1"`.

use std::sync::Arc;
use std::time::Duration;

use fleet_engine::bus::MockBusAdapter;
use fleet_engine::device::{DeviceKey, DeviceTable};
use fleet_engine::event::{ModuleCommand, SessionEvent};
use fleet_engine::module::MockModuleLibrary;
use fleet_engine::pipeline::CommandPipeline;
use fleet_engine::proto::{self, fleet_message::Payload};
use fleet_engine::session::{ConnectionState, SessionController};

use fleet_specs::{button_device, load_library, one_module_car, scenario_config};

#[tokio::test]
async fn happy_path_round_trips_a_status_and_a_command() {
    let module = Arc::new(MockModuleLibrary::new());
    let bus = Arc::new(MockBusAdapter::new());

    let controller =
        SessionController::new(&scenario_config(), one_module_car(), Arc::clone(&bus), load_library(&module))
            .unwrap();
    let producer = controller.producer();
    let stop = controller.stop_handle();
    let handle = tokio::spawn(controller.run());

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::ConnectResponse(proto::ConnectResponse {
            accepted: true,
            session_id: "s".into(),
            error: String::new(),
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::Status(proto::Status {
            session_id: "s".into(),
            counter: 0,
            device: Some(button_device()),
            module_id: 2,
            payload: b"\x0a\x02PRESS".to_vec(),
            is_error: false,
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(module.forwarded_statuses(), vec![(button_device().key(), b"\x0a\x02PRESS".to_vec())]);
    assert!(bus.published().iter().any(|m| matches!(
        &m.payload,
        Some(Payload::StatusResponse(r)) if r.counter == 0 && r.device == Some(button_device())
    )));

    module.enqueue_command(button_device().key(), b"\x0a\x02PRESS".to_vec());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let command_counter = bus
        .published()
        .iter()
        .find_map(|m| match &m.payload {
            Some(Payload::Command(c)) if c.payload == b"\x0a\x02PRESS".to_vec() => Some(c.counter),
            _ => None,
        })
        .expect("module-produced command was not published");
    assert_eq!(command_counter, 1);

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::CommandResponse(proto::CommandResponse {
            session_id: "s".into(),
            counter: command_counter,
            device: Some(button_device()),
            module_id: 2,
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(module.acked(), vec![(button_device().key(), b"\x0a\x02PRESS".to_vec())]);

    stop.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(outcome.is_clean());
    assert!(bus.published().iter().any(|m| matches!(&m.payload, Some(Payload::Disconnect(_)))));
}

#[tokio::test]
async fn out_of_order_acknowledgement_is_a_protocol_error() {
    let module = Arc::new(MockModuleLibrary::new());
    let bus = Arc::new(MockBusAdapter::new());

    let controller =
        SessionController::new(&scenario_config(), one_module_car(), Arc::clone(&bus), load_library(&module))
            .unwrap();
    let producer = controller.producer();
    let handle = tokio::spawn(controller.run());

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::ConnectResponse(proto::ConnectResponse {
            accepted: true,
            session_id: "s".into(),
            error: String::new(),
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::Status(proto::Status {
            session_id: "s".into(),
            counter: 0,
            device: Some(button_device()),
            module_id: 2,
            payload: b"hello".to_vec(),
            is_error: false,
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    module.enqueue_command(button_device().key(), vec![1]);
    module.enqueue_command(button_device().key(), vec![2]);
    tokio::time::sleep(Duration::from_millis(400)).await;

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::CommandResponse(proto::CommandResponse {
            session_id: "s".into(),
            counter: 2,
            device: Some(button_device()),
            module_id: 2,
        }))))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(outcome.state, ConnectionState::Error);
    assert!(matches!(outcome.error, Some(fleet_engine::error::EngineError::OutOfOrderAck { expected: 1, got: 2, .. })));
    assert!(bus.published().iter().any(|m| matches!(&m.payload, Some(Payload::Disconnect(_)))));
}

#[tokio::test]
async fn silence_past_the_status_timeout_transitions_to_error() {
    let module = Arc::new(MockModuleLibrary::new());
    let bus = Arc::new(MockBusAdapter::new());

    let mut config = scenario_config();
    config.timeout = 1; // keep the test fast; the invariant is timeout-relative, not timeout=5-specific
    let controller =
        SessionController::new(&config, one_module_car(), Arc::clone(&bus), load_library(&module))
            .unwrap();
    let producer = controller.producer();
    let handle = tokio::spawn(controller.run());

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::ConnectResponse(proto::ConnectResponse {
            accepted: true,
            session_id: "s".into(),
            error: String::new(),
        }))))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    assert_eq!(outcome.state, ConnectionState::Error);
    assert!(matches!(outcome.error, Some(fleet_engine::error::EngineError::StatusTimeout(_))));
}

#[tokio::test]
async fn status_from_unknown_module_is_rejected_without_a_handler_call() {
    let module = Arc::new(MockModuleLibrary::new());
    let bus = Arc::new(MockBusAdapter::new());

    let controller =
        SessionController::new(&scenario_config(), one_module_car(), Arc::clone(&bus), load_library(&module))
            .unwrap();
    let producer = controller.producer();
    let stop = controller.stop_handle();
    let handle = tokio::spawn(controller.run());

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::ConnectResponse(proto::ConnectResponse {
            accepted: true,
            session_id: "s".into(),
            error: String::new(),
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    producer
        .push(SessionEvent::Inbound(proto::wrap(Payload::Status(proto::Status {
            session_id: "s".into(),
            counter: 0,
            device: Some(proto::DeviceId { module_id: 99, ..button_device() }),
            module_id: 99,
            payload: b"hello".to_vec(),
            is_error: false,
        }))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(module.forwarded_statuses().is_empty());
    assert!(bus.published().iter().any(|m| matches!(
        &m.payload,
        Some(Payload::StatusResponse(r)) if r.error == proto::StatusError::UnknownModule as i32
    )));

    stop.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(outcome.is_clean());
}

#[test]
fn a_command_for_a_disconnected_device_is_discarded_silently() {
    let devices = DeviceTable::new(); // D was never connected (or has since disconnected)
    let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
    let cmd = ModuleCommand { module_id: 2, device: button_device().key(), command_bytes: vec![1, 2, 3] };

    let published = pipeline.emit("s", &cmd, &devices);

    assert!(published.is_none());
    assert_eq!(pipeline.pending_count(2), 0);
}

#[test]
fn the_session_counter_wraps_without_a_protocol_error() {
    let mut devices = DeviceTable::new();
    let device: DeviceKey = button_device().key();
    devices.upsert(&device);

    let mut pipeline = CommandPipeline::with_starting_counter(Duration::from_secs(5), u32::MAX);
    let cmd = ModuleCommand { module_id: 2, device: device.clone(), command_bytes: vec![1] };

    let first = pipeline.emit("s", &cmd, &devices).unwrap();
    assert_eq!(first.counter, u32::MAX);
    let second = pipeline.emit("s", &cmd, &devices).unwrap();
    assert_eq!(second.counter, 0);

    let modules = fleet_engine::module::ModuleRegistry::new();
    pipeline
        .acknowledge("s", &proto::CommandResponse { session_id: "s".into(), counter: u32::MAX, device: None, module_id: 2 }, &modules)
        .unwrap();
    pipeline
        .acknowledge("s", &proto::CommandResponse { session_id: "s".into(), counter: 0, device: None, module_id: 2 }, &modules)
        .unwrap();
    assert_eq!(pipeline.pending_count(2), 0);
}
