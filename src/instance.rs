use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ops::Range;
use std::rc::{Rc, Weak};

use crate::import::HostFunction;
use crate::memory::MemoryInstance;
use crate::module::Module;
use crate::table::TableInstance;
use crate::types::{FuncType, GlobalType};
use crate::value::{RawValue, Value};

#[derive(Debug)]
pub struct GlobalInstance {
    pub ty: GlobalType,
    pub value: Cell<RawValue>,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, value: RawValue) -> Self { Self { ty, value: Cell::new(value) } }

    pub fn get(&self) -> Value { Value::from_raw(self.value.get(), self.ty.ty) }
}

// --------------- Functions ---------------

pub enum FuncKind {
    Wasm {
        /// Owning instance; the store keeps it alive.
        module: Weak<ModuleInstance>,
        code: Rc<Module>,
        /// Index into `code.functions`.
        def_idx: usize,
    },
    Host(HostFunction),
}

/// A function allocated in a store. `addr` is what a `funcref` carries.
pub struct FunctionInstance {
    pub addr: u32,
    pub ty: FuncType,
    pub kind: FuncKind,
}

impl FunctionInstance {
    pub fn is_host(&self) -> bool { matches!(self.kind, FuncKind::Host(_)) }
}

#[derive(Clone)]
pub enum ExportValue {
    Function(Rc<FunctionInstance>),
    Table(Rc<RefCell<TableInstance>>),
    Memory(Rc<RefCell<MemoryInstance>>),
    Global(Rc<GlobalInstance>),
}

pub type Exports = HashMap<String, ExportValue>;

// --------------- Module Instances ---------------

#[derive(Default)]
pub struct ModuleInstance {
    /// Empty for the anonymous instance of a VM.
    pub name: String,
    /// `None` for host modules.
    pub module: Option<Rc<Module>>,
    pub functions: Vec<Rc<FunctionInstance>>,
    pub tables: Vec<Rc<RefCell<TableInstance>>>,
    pub memories: Vec<Rc<RefCell<MemoryInstance>>>,
    pub globals: Vec<Rc<GlobalInstance>>,
    /// Element segments; dropped segments are empty.
    pub elems: RefCell<Vec<Vec<RawValue>>>,
    /// Byte ranges of data segments in `module.bytes`; dropped segments are empty.
    pub datas: RefCell<Vec<Range<usize>>>,
    pub exports: Exports,
}

impl ModuleInstance {
    pub fn export(&self, name: &str) -> Option<&ExportValue> { self.exports.get(name) }

    pub fn func(&self, name: &str) -> Option<&Rc<FunctionInstance>> {
        match self.exports.get(name) {
            Some(ExportValue::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn memory(&self, name: &str) -> Option<&Rc<RefCell<MemoryInstance>>> {
        match self.exports.get(name) {
            Some(ExportValue::Memory(m)) => Some(m),
            _ => None,
        }
    }

    pub fn global(&self, name: &str) -> Option<&Rc<GlobalInstance>> {
        match self.exports.get(name) {
            Some(ExportValue::Global(g)) => Some(g),
            _ => None,
        }
    }

    /// Exported functions sorted by name.
    pub fn exported_functions(&self) -> Vec<(String, FuncType)> {
        let mut list: Vec<_> = self
            .exports
            .iter()
            .filter_map(|(name, ex)| match ex {
                ExportValue::Function(f) => Some((name.clone(), f.ty.clone())),
                _ => None,
            })
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}
