use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Error;
use crate::instance::{FuncKind, FunctionInstance, ModuleInstance};
use crate::types::FuncType;

#[derive(Default)]
struct StoreInner {
    functions: Vec<Rc<FunctionInstance>>,
    modules: Vec<Rc<ModuleInstance>>,
    named: HashMap<String, Rc<ModuleInstance>>,
}

/// Runtime universe shared by one or more VMs.
///
/// Owns every instantiated module and the function address space that
/// `funcref` values point into. Interior mutability lets several VMs hold a
/// `&Store` at the same time.
#[derive(Default)]
pub struct Store {
    inner: RefCell<StoreInner>,
}

impl Store {
    pub fn new() -> Self { Self::default() }

    pub(crate) fn alloc_function(&self, ty: FuncType, kind: FuncKind) -> Rc<FunctionInstance> {
        let mut inner = self.inner.borrow_mut();
        let f = Rc::new(FunctionInstance { addr: inner.functions.len() as u32, ty, kind });
        inner.functions.push(f.clone());
        f
    }

    pub fn function(&self, addr: u32) -> Option<Rc<FunctionInstance>> {
        self.inner.borrow().functions.get(addr as usize).cloned()
    }

    pub(crate) fn push_module(&self, inst: Rc<ModuleInstance>) {
        self.inner.borrow_mut().modules.push(inst);
    }

    /// Makes `inst` importable and executable under `name`.
    pub fn register_named(&self, name: &str, inst: Rc<ModuleInstance>) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.named.contains_key(name) { return Err(Error::NameCollision(name.to_string())); }
        inner.named.insert(name.to_string(), inst);
        Ok(())
    }

    pub fn find_module(&self, name: &str) -> Option<Rc<ModuleInstance>> {
        self.inner.borrow().named.get(name).cloned()
    }

    pub fn contains_module(&self, name: &str) -> bool { self.inner.borrow().named.contains_key(name) }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.borrow().named.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn module_count(&self) -> usize { self.inner.borrow().modules.len() }
    pub fn function_count(&self) -> usize { self.inner.borrow().functions.len() }

    /// Drops every instance and function.
    pub fn reset(&self) {
        let old = std::mem::take(&mut *self.inner.borrow_mut());
        drop(old);
    }
}
