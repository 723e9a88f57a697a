// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the end-to-end scenario tests under `tests/`. Every
//! scenario uses `timeout = 5`, `company_name = "acme"`, `car_name = "v1"`,
//! one module with id `2`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use fleet_engine::config::{CarModules, Config, ModuleConfig};
use fleet_engine::error::EngineError;
use fleet_engine::module::ModuleLibrary;
use fleet_engine::proto;

pub fn scenario_config() -> Config {
    Config {
        company_name: "acme".into(),
        car_name: None,
        mqtt_address: "broker.local".into(),
        mqtt_port: 1883,
        mqtt_timeout: 5,
        timeout: 5,
        send_invalid_command: true,
        sleep_duration_after_connection_refused: 0.0,
        common_modules: HashMap::new(),
        cars: HashMap::new(),
        logging: serde_json::Value::Null,
    }
}

pub fn one_module_car() -> CarModules {
    let mut modules = HashMap::new();
    modules.insert(2u16, ModuleConfig { lib_path: PathBuf::new(), config: HashMap::new() });
    CarModules { car_name: "v1".into(), modules }
}

pub fn button_device() -> proto::DeviceId {
    proto::DeviceId { module_id: 2, device_type: 7, role: "button".into(), name: "A".into(), priority: 0 }
}

pub fn load_library<L: ModuleLibrary + 'static>(
    library: &Arc<L>,
) -> impl Fn(&ModuleConfig) -> Result<Arc<dyn ModuleLibrary>, EngineError> {
    let library: Arc<dyn ModuleLibrary> = library.clone();
    move |_: &ModuleConfig| Ok(Arc::clone(&library))
}
