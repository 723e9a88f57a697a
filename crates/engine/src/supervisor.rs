// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level supervisor: reads configuration, starts one car session per
//! configured car on its own worker thread, and joins them on shutdown.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{RumqttcBusAdapter, TlsOptions};
use crate::config::{Config, ModuleConfig};
use crate::error::{ConfigError, EngineError};
use crate::module::{DynamicModuleLibrary, ModuleLibrary};
use crate::session::{ConnectionState, SessionController, SessionOutcome, StopHandle};

/// One car's worker thread, plus the handle used to request it stop. The
/// join handle sits behind a `Mutex<Option<_>>` so `join_all` can take it by
/// value through a shared `&Supervisor`, letting a signal handler call
/// `stop_all` concurrently with the thread that's blocked joining.
struct CarWorker {
    car_name: String,
    stop: StopHandle,
    thread: Mutex<Option<std::thread::JoinHandle<SessionOutcome>>>,
}

/// Hosts every configured car for the lifetime of the process.
pub struct Supervisor {
    workers: Vec<CarWorker>,
}

impl Supervisor {
    /// Loads and validates the configuration, then starts every car's
    /// session on its own OS thread. Each thread runs a single-threaded
    /// tokio runtime embedding one `SessionController`.
    pub fn start(config_path: &Path, tls: Option<TlsOptions>) -> Result<Self, ConfigError> {
        let config = Config::load(config_path)?;
        Ok(Self::start_with_config(config, tls))
    }

    pub fn start_with_config(config: Config, tls: Option<TlsOptions>) -> Self {
        let config = Arc::new(config);
        let mut workers = Vec::new();

        for car_name in config.car_names().cloned().collect::<Vec<_>>() {
            let Some(car_modules) = config.modules_for_car(&car_name) else {
                warn!(car_name, "car disappeared from configuration before startup");
                continue;
            };
            let config = Arc::clone(&config);
            let tls = tls.clone();
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<StopHandle>();

            let thread_car_name = car_name.clone();
            let thread = std::thread::Builder::new()
                .name(format!("session-{car_name}"))
                .spawn(move || run_one_car(config, car_modules, tls, stop_tx))
                .expect("failed to spawn car session thread");

            let stop = stop_rx.recv().expect("car session thread dropped its stop handle before sending it");
            workers.push(CarWorker { car_name: thread_car_name, stop, thread: Mutex::new(Some(thread)) });
        }

        Self { workers }
    }

    /// Requests every car session to stop gracefully. Safe to call from a
    /// signal handler task running concurrently with `join`.
    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop.stop();
        }
    }

    /// Joins every car's thread and returns the worst outcome's exit code:
    /// `0` if every session stopped cleanly, `1` otherwise. Blocks the
    /// calling thread; call from `spawn_blocking` in an async context.
    pub fn join(&self) -> i32 {
        let mut worst = 0;
        for worker in &self.workers {
            let handle = worker.thread.lock().expect("car worker mutex poisoned").take();
            let Some(handle) = handle else {
                continue; // already joined
            };
            match handle.join() {
                Ok(outcome) => {
                    if outcome.is_clean() {
                        info!(car_name = %worker.car_name, "session stopped cleanly");
                    } else {
                        error!(
                            car_name = %worker.car_name, error = ?outcome.error,
                            "session terminated in the Error state"
                        );
                        worst = 1;
                    }
                }
                Err(_) => {
                    error!(car_name = %worker.car_name, "session thread panicked");
                    worst = 1;
                }
            }
        }
        worst
    }
}

fn run_one_car(
    config: Arc<Config>,
    car_modules: crate::config::CarModules,
    tls: Option<TlsOptions>,
    stop_tx: std::sync::mpsc::Sender<StopHandle>,
) -> SessionOutcome {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build per-car tokio runtime");

    runtime.block_on(async move {
        let car_name = car_modules.car_name.clone();
        let shutdown = CancellationToken::new();
        let bus = match RumqttcBusAdapter::connect(
            &config.mqtt_address,
            config.mqtt_port,
            &config.company_name,
            &car_name,
            tls,
        )
        .await
        {
            Ok(bus) => bus,
            Err(error) => {
                let _ = stop_tx.send(StopHandle::noop());
                return SessionOutcome {
                    company_name: config.company_name.clone(),
                    car_name,
                    state: ConnectionState::Error,
                    error: Some(error),
                };
            }
        };

        let controller = match SessionController::new(&config, car_modules, Arc::clone(&bus), load_dynamic_library) {
            Ok(controller) => controller,
            Err(error) => {
                let _ = stop_tx.send(StopHandle::noop());
                return SessionOutcome {
                    company_name: config.company_name.clone(),
                    car_name,
                    state: ConnectionState::Error,
                    error: Some(error),
                };
            }
        };

        bus.start_feed_loop(controller.producer(), shutdown.clone());
        let _ = stop_tx.send(controller.stop_handle());
        let outcome = controller.run().await;
        shutdown.cancel();
        outcome
    })
}

fn load_dynamic_library(module_config: &ModuleConfig) -> Result<Arc<dyn ModuleLibrary>, EngineError> {
    // SAFETY: the path comes from a validated configuration file naming a
    // handler library that is expected to implement the documented ABI.
    let library = unsafe { DynamicModuleLibrary::load(&module_config.lib_path) }
        .map_err(|source| EngineError::ModuleInitFailed(0, source.to_string()))?;
    Ok(Arc::new(library))
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
