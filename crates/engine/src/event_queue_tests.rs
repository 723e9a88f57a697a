// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[tokio::test]
async fn push_then_recv_round_trips() {
    let (mut queue, producer) = EventQueue::bounded(4, Duration::from_millis(100));
    producer.push(SessionEvent::Tick).await.unwrap();
    assert!(matches!(queue.recv().await, Some(SessionEvent::Tick)));
}

#[tokio::test]
async fn overflow_past_capacity_reports_queue_overflow() {
    let (mut _queue, producer) = EventQueue::bounded(1, Duration::from_millis(20));
    producer.push(SessionEvent::Tick).await.unwrap();
    let result = producer.push(SessionEvent::Tick).await;
    assert!(matches!(result, Err(EngineError::QueueOverflow(1))));
}

#[test]
fn push_blocking_detects_a_stuck_consumer() {
    let (queue, producer) = EventQueue::bounded(1, Duration::from_millis(20));
    let blocking = producer.clone();
    // Fill the queue without a consumer draining it.
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(producer.push(SessionEvent::Tick)).unwrap();
    drop(rt);

    let result = blocking.push_blocking(SessionEvent::Tick);
    assert!(matches!(result, Err(EngineError::QueueOverflow(1))));
    drop(queue);
}
