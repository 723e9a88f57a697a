// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event types that flow through the session's single event queue.

use crate::device::DeviceKey;
use crate::error::EngineError;
use crate::proto::FleetMessage;

/// A command drained from a module's command-waiting thread, destined for
/// the command pipeline's emit path.
#[derive(Debug, Clone)]
pub struct ModuleCommand {
    pub module_id: u16,
    pub device: DeviceKey,
    pub command_bytes: Vec<u8>,
}

/// Every event the session controller can observe, tagged by source.
/// This is the literal "discriminated kind" the router switches on.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A frame arrived from the bus.
    Inbound(FleetMessage),
    /// A module produced a command via its command-waiting thread.
    CommandFromModule(ModuleCommand),
    /// Periodic timer tick driving the two timeout checks.
    Tick,
    /// The transport reported an unrecoverable connection loss.
    TransportDown,
    /// A producer gave up waiting for the main queue to free capacity.
    /// Delivered through a side channel that cannot itself overflow, so a
    /// stuck consumer is surfaced instead of just silently losing a
    /// producer; see `EventQueue::recv`.
    Fatal(EngineError),
    /// Graceful termination was requested.
    Stop,
}
