// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration file loading and validation. One JSON document describes
//! every car the process will host.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// One module entry under `common_modules` or a car's `specific_modules`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub lib_path: PathBuf,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A single car's own module declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarConfig {
    #[serde(default)]
    pub specific_modules: HashMap<String, ModuleConfig>,
}

/// The full configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub company_name: String,
    /// Legacy/schema-compat field accepted for forward compatibility with
    /// single-car configurations. Session identity always comes from the
    /// `cars` map's keys; see DESIGN.md.
    #[serde(default)]
    pub car_name: Option<String>,
    pub mqtt_address: String,
    pub mqtt_port: u16,
    pub mqtt_timeout: u64,
    pub timeout: u64,
    #[serde(default)]
    pub send_invalid_command: bool,
    #[serde(default)]
    pub sleep_duration_after_connection_refused: f64,
    #[serde(default)]
    pub common_modules: HashMap<String, ModuleConfig>,
    pub cars: HashMap<String, CarConfig>,
    #[serde(default)]
    pub logging: serde_json::Value,
}

/// A fully resolved, per-car module set: disjoint union of common and
/// specific modules, keyed by the parsed numeric module id.
#[derive(Debug, Clone)]
pub struct CarModules {
    pub car_name: String,
    pub modules: HashMap<u16, ModuleConfig>,
}

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn parse_module_id(s: &str) -> Result<u16, ConfigError> {
    s.parse::<u16>().map_err(|_| ConfigError::InvalidModuleId(s.to_owned()))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate identifiers and the disjointness of each car's module set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.company_name) {
            return Err(ConfigError::InvalidIdentifier(self.company_name.clone()));
        }
        if let Some(ref car_name) = self.car_name {
            if !is_valid_identifier(car_name) {
                return Err(ConfigError::InvalidIdentifier(car_name.clone()));
            }
        }
        if self.cars.is_empty() {
            return Err(ConfigError::NoCars);
        }

        let common_ids: HashSet<u16> =
            self.common_modules.keys().map(|s| parse_module_id(s)).collect::<Result<_, _>>()?;

        for (car_name, car) in &self.cars {
            if !is_valid_identifier(car_name) {
                return Err(ConfigError::InvalidIdentifier(car_name.clone()));
            }
            let specific_ids: HashSet<u16> = car
                .specific_modules
                .keys()
                .map(|s| parse_module_id(s))
                .collect::<Result<_, _>>()?;

            if let Some(&dup) = common_ids.intersection(&specific_ids).next() {
                return Err(ConfigError::DuplicateModuleId(dup, car_name.clone()));
            }
            if common_ids.is_empty() && specific_ids.is_empty() {
                return Err(ConfigError::NoModules(car_name.clone()));
            }
        }
        Ok(())
    }

    /// Resolve the disjoint module set for one car (common ∪ specific).
    pub fn modules_for_car(&self, car_name: &str) -> Option<CarModules> {
        let car = self.cars.get(car_name)?;
        let mut modules = HashMap::new();
        for (id, cfg) in &self.common_modules {
            if let Ok(id) = parse_module_id(id) {
                modules.insert(id, cfg.clone());
            }
        }
        for (id, cfg) in &car.specific_modules {
            if let Ok(id) = parse_module_id(id) {
                modules.insert(id, cfg.clone());
            }
        }
        Some(CarModules { car_name: car_name.to_owned(), modules })
    }

    pub fn car_names(&self) -> impl Iterator<Item = &String> {
        self.cars.keys()
    }

    pub fn mqtt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.mqtt_timeout)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }

    pub fn sleep_after_refused(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.sleep_duration_after_connection_refused.max(0.0))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
