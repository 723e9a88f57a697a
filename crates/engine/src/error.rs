// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy. Mirrors the kinds a session can fail with: configuration
//! errors are fatal before any session starts; every other kind is confined
//! to the one session that raised it.

use thiserror::Error;

use crate::device::DeviceKey;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config file as JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid identifier {0:?}: must match [a-z0-9_]+")]
    InvalidIdentifier(String),

    #[error("module id {0:?} does not parse as an unsigned integer")]
    InvalidModuleId(String),

    #[error("module id {0} is declared in both common_modules and car {1:?}'s specific_modules")]
    DuplicateModuleId(u16, String),

    #[error("car {0:?} has no modules (common or specific)")]
    NoModules(String),

    #[error("`cars` must declare at least one car")]
    NoCars,
}

/// Reasons a session transitions to the terminal `Error` state.
///
/// Every variant is confined to the session that raised it; a fatal error
/// in one car's session never propagates to another.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("status timeout: no status received within {0:?}")]
    StatusTimeout(std::time::Duration),

    #[error("command-response timeout on module {module_id} waiting for counter {counter}")]
    CommandTimeout { module_id: u16, counter: u32 },

    #[error("out-of-order command acknowledgement on module {module_id}: expected counter {expected}, got {got}")]
    OutOfOrderAck { module_id: u16, expected: u32, got: u32 },

    #[error("module {0} failed to initialize: {1}")]
    ModuleInitFailed(u16, String),

    #[error("event queue overflowed (capacity {0}); this indicates a stuck consumer")]
    QueueOverflow(usize),

    #[error("connect handshake rejected: {0}")]
    ConnectRejected(String),

    #[error("connect handshake timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
}

/// Non-fatal failure of a single module operation. Logged and swallowed by
/// the caller; never raised as a session-level `EngineError`.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {module_id} returned error code {code} from {op} for device {device:?}")]
    CallFailed { module_id: u16, op: &'static str, code: i32, device: Option<DeviceKey> },

    #[error("module {0} command-waiting thread terminated: {1}")]
    WaitThreadFailed(u16, String),

    #[error("failed to load handler library at {path:?}: {source}")]
    LoadFailed { path: String, #[source] source: libloading::Error },

    #[error("handler library at {path:?} is missing required symbol {symbol:?}: {source}")]
    MissingSymbol { path: String, symbol: &'static str, source: libloading::Error },
}
