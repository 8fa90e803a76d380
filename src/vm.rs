use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::{Configure, HostRegistration};
use crate::error::Error;
use crate::host;
use crate::import::ImportObject;
use crate::instance::ModuleInstance;
use crate::interpreter::Interpreter;
use crate::module::Module;
use crate::registry::{ModuleRegistry, RegisteredModule};
use crate::statistics::Statistics;
use crate::store::Store;
use crate::types::FuncType;
use crate::validator::Validator;
use crate::value::Value;

/// Lifecycle stage of a [`Vm`]. Stages are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Inited,
    Loaded,
    Validated,
    Instantiated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Load,
    Validate,
    Instantiate,
    Execute,
    Cleanup,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Load => "load",
            Op::Validate => "validate",
            Op::Instantiate => "instantiate",
            Op::Execute => "execute",
            Op::Cleanup => "cleanup",
        }
    }
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Inited => "inited",
            Stage::Loaded => "loaded",
            Stage::Validated => "validated",
            Stage::Instantiated => "instantiated",
        }
    }

    /// Stage reached by a successful `op`, or `WrongWorkflow` when `op` is
    /// not allowed from here.
    pub fn next(self, op: Op) -> Result<Stage, Error> {
        match (op, self) {
            (Op::Load, _) => Ok(Stage::Loaded),
            (Op::Validate, s) if s >= Stage::Loaded => Ok(Stage::Validated),
            (Op::Instantiate, s) if s >= Stage::Validated => Ok(Stage::Instantiated),
            (Op::Execute, Stage::Instantiated) => Ok(Stage::Instantiated),
            (Op::Cleanup, _) => Ok(Stage::Inited),
            (op, stage) => Err(Error::WrongWorkflow { op: op.name(), stage: stage.name() }),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// The store a VM runs against: its own, or one shared with other VMs.
pub enum StoreRef<'a> {
    Owned(Box<Store>),
    Borrowed(&'a Store),
}

impl StoreRef<'_> {
    pub fn is_owned(&self) -> bool { matches!(self, StoreRef::Owned(_)) }
}

impl Deref for StoreRef<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        match self {
            StoreRef::Owned(store) => store,
            StoreRef::Borrowed(store) => store,
        }
    }
}

/// Staged WebAssembly virtual machine.
///
/// A module goes through [`load_wasm_file`](Vm::load_wasm_file) or
/// [`load_wasm_bytes`](Vm::load_wasm_bytes), [`validate`](Vm::validate) and
/// [`instantiate`](Vm::instantiate) before its exports can be
/// [`execute`](Vm::execute)d. Named modules registered on the VM live in its
/// store and can be imported by later instantiations or run directly with
/// [`execute_registered`](Vm::execute_registered).
pub struct Vm<'a> {
    conf: &'a Configure,
    store: StoreRef<'a>,
    registry: ModuleRegistry,
    interpreter: Interpreter,
    stat: Statistics,
    stage: Stage,
    module: Option<Rc<Module>>,
    active: Option<Rc<ModuleInstance>>,
}

impl<'a> Vm<'a> {
    /// Creates a VM with its own store.
    pub fn new(conf: &'a Configure) -> Self {
        Self::build(conf, StoreRef::Owned(Box::default()))
    }

    /// Creates a VM running against a store shared with other VMs.
    pub fn with_store(conf: &'a Configure, store: &'a Store) -> Self {
        Self::build(conf, StoreRef::Borrowed(store))
    }

    fn build(conf: &'a Configure, store: StoreRef<'a>) -> Self {
        let mut vm = Self {
            conf,
            store,
            registry: ModuleRegistry::new(),
            interpreter: Interpreter::new(),
            stat: Statistics::new(),
            stage: Stage::Inited,
            module: None,
            active: None,
        };
        vm.register_hosts();
        vm
    }

    fn register_hosts(&mut self) {
        for kind in self.conf.host_registrations() {
            let obj = host::import_object(kind);
            match Interpreter::instantiate_import_object(&self.store, &obj) {
                Ok(inst) => {
                    match self.registry.register(obj.name(), RegisteredModule::Host(inst)) {
                        Ok(()) => info!(module = obj.name(), "registered host module"),
                        Err(e) => warn!(kind = ?kind, error = %e, "host module already tracked"),
                    }
                    self.registry.set_host(kind, obj);
                }
                Err(e) => warn!(kind = ?kind, error = %e, "host module not registered"),
            }
        }
    }

    fn set_stage(&mut self, stage: Stage) {
        if stage != self.stage {
            debug!(from = %self.stage, to = %stage, "vm stage transition");
        }
        self.stage = stage;
    }

    fn check_name(&self, name: &str) -> Result<(), Error> {
        if self.registry.contains(name) || self.store.contains_module(name) {
            return Err(Error::NameCollision(name.to_string()));
        }
        Ok(())
    }

    // ---------------- Registration ----------------

    pub fn register_module_from_file(&mut self, name: &str, path: impl AsRef<Path>) -> Result<(), Error> {
        self.check_name(name)?;
        let module = Module::from_file(path)?;
        self.register_module(name, module)
    }

    pub fn register_module_from_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        self.check_name(name)?;
        let module = Module::compile(bytes.to_vec())?;
        self.register_module(name, module)
    }

    fn register_module(&mut self, name: &str, mut module: Module) -> Result<(), Error> {
        Validator::new(self.conf).validate(&mut module)?;
        let inst = self.interpreter.instantiate(&self.store, Rc::new(module), Some(name), self.conf, &mut self.stat)?;
        self.registry.register(name, RegisteredModule::Guest(inst))?;
        info!(module = name, "registered module");
        Ok(())
    }

    /// Makes an embedder-built import object importable under its name.
    pub fn register_import_object(&mut self, obj: &ImportObject) -> Result<(), Error> {
        self.check_name(obj.name())?;
        let inst = Interpreter::instantiate_import_object(&self.store, obj)?;
        self.registry.register(obj.name(), RegisteredModule::Host(inst))?;
        info!(module = obj.name(), "registered import object");
        Ok(())
    }

    // ---------------- Lifecycle ----------------

    pub fn load_wasm_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let next = self.stage.next(Op::Load)?;
        let module = Module::from_file(path)?;
        self.loaded(module, next);
        Ok(())
    }

    pub fn load_wasm_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let next = self.stage.next(Op::Load)?;
        let module = Module::compile(bytes.to_vec())?;
        self.loaded(module, next);
        Ok(())
    }

    fn loaded(&mut self, module: Module, next: Stage) {
        self.module = Some(Rc::new(module));
        self.active = None;
        self.set_stage(next);
    }

    pub fn validate(&mut self) -> Result<(), Error> {
        let next = self.stage.next(Op::Validate)?;
        let Some(module) = self.module.as_mut() else { return Err(self.wrong(Op::Validate)) };
        Validator::new(self.conf).validate(Rc::make_mut(module))?;
        self.set_stage(next);
        Ok(())
    }

    pub fn instantiate(&mut self) -> Result<(), Error> {
        let next = self.stage.next(Op::Instantiate)?;
        let Some(module) = self.module.clone() else { return Err(self.wrong(Op::Instantiate)) };
        let inst = self.interpreter.instantiate(&self.store, module, None, self.conf, &mut self.stat)?;
        self.active = Some(inst);
        self.set_stage(next);
        Ok(())
    }

    /// Calls an export of the instantiated module.
    pub fn execute(&mut self, func: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        self.stage.next(Op::Execute)?;
        let Some(inst) = self.active.clone() else { return Err(self.wrong(Op::Execute)) };
        let f = inst.func(func).cloned().ok_or_else(|| Error::FuncNotFound(func.to_string()))?;
        self.interpreter.invoke(&self.store, &f, args, &mut self.stat)
    }

    /// Calls an export of a module registered in the store, at any stage.
    pub fn execute_registered(&mut self, module: &str, func: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let inst = self.store.find_module(module).ok_or_else(|| Error::FuncNotFound(format!("{module}::{func}")))?;
        let f = inst.func(func).cloned().ok_or_else(|| Error::FuncNotFound(format!("{module}::{func}")))?;
        self.interpreter.invoke(&self.store, &f, args, &mut self.stat)
    }

    pub fn run_wasm_file(&mut self, path: impl AsRef<Path>, func: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        self.load_wasm_file(path)?;
        self.validate()?;
        self.instantiate()?;
        self.execute(func, args)
    }

    pub fn run_wasm_bytes(&mut self, bytes: &[u8], func: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        self.load_wasm_bytes(bytes)?;
        self.validate()?;
        self.instantiate()?;
        self.execute(func, args)
    }

    /// Returns the VM to `Inited`.
    ///
    /// An owned store is emptied and the configured host modules are
    /// registered again. A borrowed store is left alone: only this VM's named
    /// registrations are forgotten.
    pub fn cleanup(&mut self) {
        self.module = None;
        self.active = None;
        self.stat.clear();
        self.interpreter = Interpreter::new();
        if self.store.is_owned() {
            self.store.reset();
            self.registry.clear();
            self.register_hosts();
        } else {
            self.registry.clear_named();
        }
        self.set_stage(Stage::Inited);
    }

    fn wrong(&self, op: Op) -> Error { Error::WrongWorkflow { op: op.name(), stage: self.stage.name() } }

    // ---------------- Getters ----------------

    /// Exported functions of the instantiated module, sorted by name.
    pub fn function_list(&self) -> Vec<(String, FuncType)> {
        self.active.as_ref().map(|inst| inst.exported_functions()).unwrap_or_default()
    }

    pub fn import_module(&self, kind: HostRegistration) -> Option<&ImportObject> { self.registry.host(kind) }
    pub fn import_module_mut(&mut self, kind: HostRegistration) -> Option<&mut ImportObject> { self.registry.host_mut(kind) }

    pub fn store(&self) -> &Store { &self.store }
    pub fn config(&self) -> &Configure { self.conf }
    pub fn statistics(&self) -> &Statistics { &self.stat }
    pub fn stage(&self) -> Stage { self.stage }
    pub fn registered_names(&self) -> Vec<String> { self.registry.names() }
    pub fn registered(&self, name: &str) -> Option<&RegisteredModule> { self.registry.get(name) }
}
