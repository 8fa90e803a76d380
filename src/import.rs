use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::host::process::ProcessEnv;
use crate::host::wasi::WasiEnv;
use crate::instance::GlobalInstance;
use crate::memory::MemoryInstance;
use crate::module::Module;
use crate::table::TableInstance;
use crate::types::{FuncType, GlobalType, MemoryType, TableType, ValType};
use crate::value::Value;

/// What a host function can see of its caller.
pub struct CallingFrame {
    memory: Option<Rc<RefCell<MemoryInstance>>>,
}

impl CallingFrame {
    pub(crate) fn new(memory: Option<Rc<RefCell<MemoryInstance>>>) -> Self { Self { memory } }

    /// Memory 0 of the calling instance.
    pub fn memory(&self) -> Option<&Rc<RefCell<MemoryInstance>>> { self.memory.as_ref() }
}

pub type HostCallback = dyn Fn(&CallingFrame, &[Value]) -> Result<Vec<Value>, Error>;

#[derive(Clone)]
pub struct HostFunction {
    ty: FuncType,
    callback: Rc<HostCallback>,
}

impl HostFunction {
    pub fn new(
        params: impl Into<Vec<ValType>>,
        results: impl Into<Vec<ValType>>,
        callback: impl Fn(&CallingFrame, &[Value]) -> Result<Vec<Value>, Error> + 'static,
    ) -> Self {
        Self { ty: FuncType::new(params, results), callback: Rc::new(callback) }
    }

    pub fn ty(&self) -> &FuncType { &self.ty }

    pub fn call(&self, frame: &CallingFrame, args: &[Value]) -> Result<Vec<Value>, Error> {
        (self.callback)(frame, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("ty", &self.ty).finish_non_exhaustive()
    }
}

/// State shared between a built-in host module and its functions.
#[derive(Clone, Debug, Default)]
pub enum HostEnv {
    #[default]
    None,
    Wasi(Rc<RefCell<WasiEnv>>),
    Process(Rc<RefCell<ProcessEnv>>),
}

/// A named bundle of host entities that guest modules can import from.
#[derive(Clone, Debug)]
pub struct ImportObject {
    name: String,
    pub(crate) functions: Vec<(String, HostFunction)>,
    pub(crate) globals: Vec<(String, Rc<GlobalInstance>)>,
    pub(crate) memories: Vec<(String, Rc<RefCell<MemoryInstance>>)>,
    pub(crate) tables: Vec<(String, Rc<RefCell<TableInstance>>)>,
    env: HostEnv,
}

impl ImportObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            memories: Vec::new(),
            tables: Vec::new(),
            env: HostEnv::None,
        }
    }

    pub(crate) fn with_env(name: impl Into<String>, env: HostEnv) -> Self {
        Self { env, ..Self::new(name) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn add_function(&mut self, name: impl Into<String>, func: HostFunction) -> &mut Self {
        self.functions.push((name.into(), func));
        self
    }

    /// Adds a global; `value` must have the global's value type.
    pub fn add_global(&mut self, name: impl Into<String>, ty: GlobalType, value: Value) -> &mut Self {
        self.globals.push((name.into(), Rc::new(GlobalInstance::new(ty, value.to_raw()))));
        self
    }

    pub fn add_memory(&mut self, name: impl Into<String>, ty: MemoryType) -> &mut Self {
        let memory = MemoryInstance::new(&ty, Module::MAX_PAGES);
        self.memories.push((name.into(), Rc::new(RefCell::new(memory))));
        self
    }

    pub fn add_table(&mut self, name: impl Into<String>, ty: TableType) -> &mut Self {
        self.tables.push((name.into(), Rc::new(RefCell::new(TableInstance::new(&ty)))));
        self
    }

    pub fn memory(&self, name: &str) -> Option<&Rc<RefCell<MemoryInstance>>> {
        self.memories.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn env(&self) -> &HostEnv { &self.env }

    pub fn wasi_env(&self) -> Option<&Rc<RefCell<WasiEnv>>> {
        match &self.env {
            HostEnv::Wasi(env) => Some(env),
            _ => None,
        }
    }

    pub fn process_env(&self) -> Option<&Rc<RefCell<ProcessEnv>>> {
        match &self.env {
            HostEnv::Process(env) => Some(env),
            _ => None,
        }
    }
}
