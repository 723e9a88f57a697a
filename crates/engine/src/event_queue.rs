// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bounded, multi-producer single-consumer event queue. Every source —
//! the bus adapter task, each module's command-waiting thread, and the
//! timer task — pushes onto the same queue; the session controller is the
//! sole consumer.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::event::SessionEvent;

/// Default enqueue wait before a stuck consumer is treated as a fatal
/// resource error. Comfortably above the tick granularity so a momentarily
/// busy controller doesn't trip it.
pub const DEFAULT_ENQUEUE_WAIT: Duration = Duration::from_secs(2);
/// Default queue depth. Sized well above the handful of in-flight commands
/// and statuses a single car session produces between controller turns.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Consumer half, owned solely by the session controller. `recv` also
/// drains `fatal_rx`: a producer that gave up waiting for room on the main
/// queue reports the overflow there instead of just vanishing, so a stuck
/// consumer still drives the session to `Error` per spec's Resource error
/// kind rather than leaving the controller waiting on a queue nothing will
/// ever fill again.
pub struct EventQueue {
    rx: mpsc::Receiver<SessionEvent>,
    fatal_rx: mpsc::UnboundedReceiver<EngineError>,
}

/// Producer half. Cheap to clone; every event source holds one.
#[derive(Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<SessionEvent>,
    fatal_tx: mpsc::UnboundedSender<EngineError>,
    enqueue_wait: Duration,
}

impl EventQueue {
    pub fn bounded(capacity: usize, enqueue_wait: Duration) -> (Self, EventProducer) {
        let (tx, rx) = mpsc::channel(capacity);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        (Self { rx, fatal_rx }, EventProducer { tx, fatal_tx, enqueue_wait })
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            event = self.rx.recv() => event,
            fatal = self.fatal_rx.recv() => fatal.map(SessionEvent::Fatal),
        }
    }
}

impl EventProducer {
    /// Enqueue from async context (the bus adapter task, the timer task).
    /// Waits up to `enqueue_wait` for room; past that the consumer is
    /// considered stuck, the overflow is reported on the fatal side
    /// channel, and this returns `QueueOverflow`.
    pub async fn push(&self, event: SessionEvent) -> Result<(), EngineError> {
        self.tx.send_timeout(event, self.enqueue_wait).await.map_err(|_| self.report_overflow())
    }

    /// Enqueue from a plain OS thread (a module's command-waiting thread),
    /// which has no async runtime to await on. Polls `try_send` instead of
    /// blocking forever, so a stuck consumer is still detected.
    pub fn push_blocking(&self, mut event: SessionEvent) -> Result<(), EngineError> {
        use tokio::sync::mpsc::error::TrySendError;

        const POLL_INTERVAL: Duration = Duration::from_millis(5);
        let deadline = std::time::Instant::now() + self.enqueue_wait;

        loop {
            match self.tx.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Ok(()), // session already shutting down
                Err(TrySendError::Full(returned)) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(self.report_overflow());
                    }
                    event = returned;
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Records a `QueueOverflow` on the fatal side channel (which cannot
    /// itself be full) and returns the same error to the caller.
    fn report_overflow(&self) -> EngineError {
        let error = EngineError::QueueOverflow(self.tx.max_capacity());
        let _ = self.fatal_tx.send(error.clone());
        error
    }
}

#[cfg(test)]
#[path = "event_queue_tests.rs"]
mod tests;
