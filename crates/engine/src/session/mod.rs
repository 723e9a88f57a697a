// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-car session controller: the connection state machine and the
//! single-consumer event loop that drives the two pipelines.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bus::BusAdapter;
use crate::config::{CarModules, Config, ModuleConfig};
use crate::device::DeviceTable;
use crate::error::EngineError;
use crate::event::{ModuleCommand, SessionEvent};
use crate::event_queue::{EventProducer, EventQueue, DEFAULT_CAPACITY, DEFAULT_ENQUEUE_WAIT};
use crate::module::{DisconnectReason, ModuleLibrary, ModuleRegistry, ModuleRuntime};
use crate::pipeline::status::{self, StatusOutcome};
use crate::pipeline::{CommandPipeline, StatusPipeline};
use crate::proto::{self, fleet_message::Payload, FleetMessage};

/// How long a quiet period (no new status) must last during `Initialized`
/// before the engine proceeds to `Running`, bounded by `init_timeout`
/// overall. The config has no enumerated device list to count a terminator
/// against, so this approximates "the burst has settled" instead; see
/// DESIGN.md.
const INIT_QUIET_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Initialized,
    Running,
    Stopped,
    Error,
}

/// Requests graceful termination of a running session. Cheap to clone;
/// safe to call from any thread, including from inside a signal handler
/// that has deferred the heavy lifting elsewhere.
#[derive(Clone)]
pub struct StopHandle {
    producer: EventProducer,
}

impl StopHandle {
    /// Idempotent: enqueuing `Stop` after the session has already left
    /// `Running` is a harmless no-op once the queue is gone.
    pub fn stop(&self) {
        let _ = self.producer.push_blocking(SessionEvent::Stop);
    }

    /// A handle whose queue is already closed, for sessions that failed to
    /// start: `stop()` on it is a harmless no-op.
    pub fn noop() -> Self {
        let (queue, producer) = EventQueue::bounded(1, Duration::from_millis(1));
        drop(queue);
        Self { producer }
    }
}

/// The terminal result of one session's `run()`.
#[derive(Debug)]
pub struct SessionOutcome {
    pub company_name: String,
    pub car_name: String,
    pub state: ConnectionState,
    pub error: Option<EngineError>,
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self.state, ConnectionState::Stopped)
    }
}

enum PhaseOutcome {
    Proceed,
    Stopped,
}

pub struct SessionController<B: BusAdapter> {
    company_name: String,
    car_name: String,
    session_id: String,
    state: ConnectionState,
    bus: Arc<B>,
    queue: EventQueue,
    producer: EventProducer,
    modules: ModuleRegistry,
    devices: DeviceTable,
    status_pipeline: StatusPipeline,
    command_pipeline: CommandPipeline,
    timeout: Duration,
    connect_timeout: Duration,
    init_timeout: Duration,
    declared_module_ids: Vec<u16>,
    last_message_counter: u32,
    /// Cancelled in `finish()` to stop the tick-producing task spawned in
    /// `run()`; without it that task would keep pushing `Tick` events
    /// forever through its own cloned producer.
    shutdown: CancellationToken,
}

impl<B: BusAdapter + 'static> SessionController<B> {
    /// Performs the `Uninitialized` entry action: builds the event queue
    /// and starts one `ModuleRuntime` per configured module.
    pub fn new(
        config: &Config,
        car_modules: CarModules,
        bus: Arc<B>,
        load_library: impl Fn(&ModuleConfig) -> Result<Arc<dyn ModuleLibrary>, EngineError>,
    ) -> Result<Self, EngineError> {
        let (queue, producer) = EventQueue::bounded(DEFAULT_CAPACITY, DEFAULT_ENQUEUE_WAIT);

        let mut modules = ModuleRegistry::new();
        let mut declared_module_ids = Vec::with_capacity(car_modules.modules.len());
        for (&module_id, module_config) in &car_modules.modules {
            let library = load_library(module_config)?;
            let runtime = ModuleRuntime::start(module_id, library, &module_config.config, producer.clone())?;
            modules.insert(runtime);
            declared_module_ids.push(module_id);
        }
        declared_module_ids.sort_unstable();

        let timeout = config.timeout();
        Ok(Self {
            company_name: config.company_name.clone(),
            car_name: car_modules.car_name,
            session_id: String::new(),
            state: ConnectionState::Uninitialized,
            bus,
            queue,
            producer,
            modules,
            devices: DeviceTable::new(),
            status_pipeline: StatusPipeline::new(config.send_invalid_command),
            command_pipeline: CommandPipeline::new(timeout),
            timeout,
            connect_timeout: config.mqtt_timeout(),
            init_timeout: timeout,
            declared_module_ids,
            last_message_counter: 0,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { producer: self.producer.clone() }
    }

    /// An extra producer handle for this session's event queue, used by the
    /// bus adapter's feed task to enqueue inbound frames.
    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.company_name, &self.car_name)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives the session through its full state machine to completion.
    pub async fn run(mut self) -> SessionOutcome {
        self.state = ConnectionState::Connecting;
        match self.connect().await {
            Ok(PhaseOutcome::Stopped) => return self.finish(ConnectionState::Stopped, None).await,
            Ok(PhaseOutcome::Proceed) => {}
            Err(error) => return self.finish(ConnectionState::Error, Some(error)).await,
        }

        self.state = ConnectionState::Initialized;
        match self.initialize().await {
            Ok(PhaseOutcome::Stopped) => return self.finish(ConnectionState::Stopped, None).await,
            Ok(PhaseOutcome::Proceed) => {}
            Err(error) => return self.finish(ConnectionState::Error, Some(error)).await,
        }

        self.state = ConnectionState::Running;
        self.status_pipeline.arm();
        tokio::spawn(tick_loop(self.producer.clone(), self.shutdown.clone()));
        let error = self.run_loop().await;
        let final_state = if error.is_some() { ConnectionState::Error } else { ConnectionState::Stopped };
        self.finish(final_state, error).await
    }

    async fn connect(&mut self) -> Result<PhaseOutcome, EngineError> {
        let connect = proto::wrap(Payload::Connect(proto::Connect {
            company_name: self.company_name.clone(),
            car_name: self.car_name.clone(),
            module_ids: self.declared_module_ids.iter().map(|&id| u32::from(id)).collect(),
        }));
        self.bus.publish(connect).await?;

        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::ConnectTimeout(self.connect_timeout));
            }
            let event = match tokio::time::timeout(remaining, self.queue.recv()).await {
                Err(_) => return Err(EngineError::ConnectTimeout(self.connect_timeout)),
                Ok(None) => return Err(EngineError::Transport("event queue closed during connect".into())),
                Ok(Some(event)) => event,
            };
            match event {
                SessionEvent::Stop => return Ok(PhaseOutcome::Stopped),
                SessionEvent::TransportDown => {
                    return Err(EngineError::Transport("transport lost during connect".into()))
                }
                SessionEvent::Fatal(error) => return Err(error),
                SessionEvent::Inbound(FleetMessage { payload: Some(Payload::ConnectResponse(resp)) }) => {
                    if !resp.accepted {
                        return Err(EngineError::ConnectRejected(resp.error));
                    }
                    self.session_id = resp.session_id;
                    return Ok(PhaseOutcome::Proceed);
                }
                _ => continue, // other event kinds during handshake are ignored
            }
        }
    }

    async fn initialize(&mut self) -> Result<PhaseOutcome, EngineError> {
        let deadline = tokio::time::Instant::now() + self.init_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(PhaseOutcome::Proceed);
            }
            let wait = remaining.min(INIT_QUIET_WINDOW);
            match tokio::time::timeout(wait, self.queue.recv()).await {
                Err(_) => return Ok(PhaseOutcome::Proceed), // quiet window elapsed
                Ok(None) => {
                    return Err(EngineError::Transport("event queue closed during initial status burst".into()))
                }
                Ok(Some(SessionEvent::Stop)) => return Ok(PhaseOutcome::Stopped),
                Ok(Some(SessionEvent::TransportDown)) => {
                    return Err(EngineError::Transport("transport lost during initial status burst".into()))
                }
                Ok(Some(SessionEvent::Fatal(error))) => return Err(error),
                Ok(Some(SessionEvent::Inbound(FleetMessage { payload: Some(Payload::Status(status)) }))) => {
                    self.last_message_counter = status.counter;
                    let outcome = self
                        .status_pipeline
                        .process(&self.session_id, &status, &mut self.devices, &self.modules)?;
                    if let Some(response) = status_response_of(outcome) {
                        self.bus.publish(status::wrap_response(response)).await?;
                    }
                    // a status arrived: restart the quiet-window clock by looping
                }
                _ => {} // non-status inbound frames and module commands are ignored here
            }
        }
    }

    async fn run_loop(&mut self) -> Option<EngineError> {
        loop {
            match self.queue.recv().await {
                None => return Some(EngineError::Transport("event queue closed unexpectedly".into())),
                Some(SessionEvent::Stop) => return None,
                Some(SessionEvent::TransportDown) => {
                    return Some(EngineError::Transport("transport reported connection loss".into()))
                }
                Some(SessionEvent::Fatal(error)) => return Some(error),
                Some(SessionEvent::Tick) => {
                    if let Some(error) = self.on_tick() {
                        return Some(error);
                    }
                }
                Some(SessionEvent::Inbound(frame)) => {
                    if let Some(error) = self.on_inbound(frame).await {
                        return Some(error);
                    }
                }
                Some(SessionEvent::CommandFromModule(cmd)) => {
                    if let Some(error) = self.on_command_from_module(cmd).await {
                        return Some(error);
                    }
                }
            }
        }
    }

    fn on_tick(&mut self) -> Option<EngineError> {
        if self.status_pipeline.is_timed_out(self.timeout) {
            return Some(EngineError::StatusTimeout(self.timeout));
        }
        self.command_pipeline.check_timeouts()
    }

    async fn on_inbound(&mut self, frame: FleetMessage) -> Option<EngineError> {
        match frame.payload {
            Some(Payload::Status(status)) => {
                self.last_message_counter = status.counter;
                match self.status_pipeline.process(&self.session_id, &status, &mut self.devices, &self.modules) {
                    Ok(outcome) => {
                        if let Some(response) = status_response_of(outcome) {
                            if let Err(error) = self.bus.publish(status::wrap_response(response)).await {
                                return Some(error);
                            }
                        }
                        None
                    }
                    Err(error) => Some(error),
                }
            }
            Some(Payload::CommandResponse(resp)) => {
                self.last_message_counter = resp.counter;
                self.command_pipeline.acknowledge(&self.session_id, &resp, &self.modules).err()
            }
            other => {
                debug!(kind = other.as_ref().map(kind_of).unwrap_or("empty"), "ignoring frame kind not routed while Running");
                None
            }
        }
    }

    async fn on_command_from_module(&mut self, cmd: ModuleCommand) -> Option<EngineError> {
        if self.status_pipeline.take_suppressed(cmd.module_id) {
            debug!(module_id = cmd.module_id, "suppressing module command after an invalid status payload");
            return None;
        }
        let Some(frame) = self.command_pipeline.emit(&self.session_id, &cmd, &self.devices) else {
            return None;
        };
        self.bus.publish(proto::wrap(Payload::Command(frame))).await.err()
    }

    async fn finish(mut self, state: ConnectionState, error: Option<EngineError>) -> SessionOutcome {
        self.shutdown.cancel();
        self.state = state;
        let disconnect = proto::wrap(Payload::Disconnect(proto::Disconnect {
            session_id: self.session_id.clone(),
            reason: error.as_ref().map(ToString::to_string).unwrap_or_else(|| "stop".into()),
        }));
        if let Err(publish_error) = self.bus.publish(disconnect).await {
            warn!(
                company = %self.company_name, car = %self.car_name, %publish_error,
                "failed to publish best-effort disconnect"
            );
        }

        let reason = if error.is_some() { DisconnectReason::Error } else { DisconnectReason::Announced };
        self.status_pipeline.disconnect_all(&mut self.devices, &self.modules, reason);

        if let Some(ref error) = error {
            error!(
                company = %self.company_name, car = %self.car_name,
                last_message_counter = self.last_message_counter, %error,
                "session transitioned to Error"
            );
        }

        self.modules.shutdown_all();
        SessionOutcome { company_name: self.company_name, car_name: self.car_name, state, error }
    }
}

/// Pushes a `Tick` through the real event queue on a 200ms cadence, the way
/// every other event source reaches the controller, instead of racing a
/// second timer directly in `run_loop`'s select. Stops once `shutdown` is
/// cancelled from `finish()`.
async fn tick_loop(producer: EventProducer, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(200));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                if producer.push(SessionEvent::Tick).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn status_response_of(outcome: StatusOutcome) -> Option<proto::StatusResponse> {
    match outcome {
        StatusOutcome::Forwarded { response, .. } => Some(response),
        StatusOutcome::UnknownModule { response } => Some(response),
        StatusOutcome::Stale => None,
    }
}

fn kind_of(payload: &Payload) -> &'static str {
    match payload {
        Payload::Connect(_) => "connect",
        Payload::ConnectResponse(_) => "connect_response",
        Payload::Status(_) => "status",
        Payload::StatusResponse(_) => "status_response",
        Payload::Command(_) => "command",
        Payload::CommandResponse(_) => "command_response",
        Payload::Disconnect(_) => "disconnect",
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
