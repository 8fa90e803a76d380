use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::config::HostRegistration;
use crate::error::Error;
use crate::import::ImportObject;
use crate::instance::ModuleInstance;

#[derive(Clone)]
pub enum RegisteredModule {
    Guest(Rc<ModuleInstance>),
    Host(Rc<ModuleInstance>),
}

impl RegisteredModule {
    pub fn instance(&self) -> &Rc<ModuleInstance> {
        match self {
            RegisteredModule::Guest(inst) | RegisteredModule::Host(inst) => inst,
        }
    }

    pub fn is_host(&self) -> bool { matches!(self, RegisteredModule::Host(_)) }
}

/// Per-VM bookkeeping of what was registered through that VM.
#[derive(Default)]
pub struct ModuleRegistry {
    named: BTreeMap<String, RegisteredModule>,
    hosts: HashMap<HostRegistration, ImportObject>,
}

impl ModuleRegistry {
    pub fn new() -> Self { Self::default() }

    /// Adds a named entry; an existing entry under `name` is left untouched.
    pub fn register(&mut self, name: &str, module: RegisteredModule) -> Result<(), Error> {
        if self.named.contains_key(name) { return Err(Error::NameCollision(name.to_string())); }
        self.named.insert(name.to_string(), module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModule> { self.named.get(name) }
    pub fn contains(&self, name: &str) -> bool { self.named.contains_key(name) }

    /// Registered names in ascending order.
    pub fn names(&self) -> Vec<String> { self.named.keys().cloned().collect() }

    pub fn set_host(&mut self, kind: HostRegistration, obj: ImportObject) { self.hosts.insert(kind, obj); }
    pub fn host(&self, kind: HostRegistration) -> Option<&ImportObject> { self.hosts.get(&kind) }
    pub fn host_mut(&mut self, kind: HostRegistration) -> Option<&mut ImportObject> { self.hosts.get_mut(&kind) }

    pub fn clear_named(&mut self) { self.named.clear(); }

    pub fn clear(&mut self) {
        self.named.clear();
        self.hosts.clear();
    }
}
