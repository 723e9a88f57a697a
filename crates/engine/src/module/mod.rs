// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler library loading and lifecycle.

use std::collections::HashMap;

pub mod abi;
pub mod dynamic;
pub mod mock;
pub mod runtime;

pub use abi::{DisconnectReason, DrainedCommand, ModuleHandle, ModuleLibrary};
pub use dynamic::DynamicModuleLibrary;
pub use mock::MockModuleLibrary;
pub use runtime::ModuleRuntime;

/// One `ModuleRuntime` per configured module id for a single car session.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<u16, ModuleRuntime>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, runtime: ModuleRuntime) {
        self.modules.insert(runtime.module_id(), runtime);
    }

    pub fn get(&self, module_id: u16) -> Option<&ModuleRuntime> {
        self.modules.get(&module_id)
    }

    pub fn contains(&self, module_id: u16) -> bool {
        self.modules.contains_key(&module_id)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.modules.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &ModuleRuntime)> {
        self.modules.iter()
    }

    /// Shuts down every module runtime, consuming the registry.
    pub fn shutdown_all(self) {
        for (_, runtime) in self.modules {
            runtime.shutdown();
        }
    }
}
