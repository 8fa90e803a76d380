use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::config::Configure;
use crate::error::*;
use crate::import::ImportObject;
use crate::instance::{ExportValue, FuncKind, FunctionInstance, GlobalInstance, ModuleInstance};
use crate::interpreter::Interpreter;
use crate::memory::MemoryInstance;
use crate::module::{ConstExpr, DataMode, ElemMode, ExternKind, ImportDesc, Module};
use crate::statistics::Statistics;
use crate::store::Store;
use crate::table::TableInstance;
use crate::value::RawValue;

#[derive(Default)]
struct ResolvedImports {
    functions: Vec<Rc<FunctionInstance>>,
    tables: Vec<Rc<RefCell<TableInstance>>>,
    memories: Vec<Rc<RefCell<MemoryInstance>>>,
    globals: Vec<Rc<GlobalInstance>>,
}

/// Evaluates a validated constant expression against the globals and
/// functions visible so far.
pub(crate) fn eval_const(expr: &ConstExpr, globals: &[Rc<GlobalInstance>], functions: &[Rc<FunctionInstance>]) -> RawValue {
    match *expr {
        ConstExpr::I32(v) => RawValue::from_i32(v),
        ConstExpr::I64(v) => RawValue::from_i64(v),
        ConstExpr::F32(bits) => RawValue::from_f32_bits(bits),
        ConstExpr::F64(bits) => RawValue::from_f64_bits(bits),
        ConstExpr::V128(v) => RawValue::from_u128(v),
        ConstExpr::RefNull(_) => RawValue::null_ref(),
        ConstExpr::RefFunc(idx) => functions
            .get(idx as usize)
            .map(|f| RawValue::from_func_ref(f.addr))
            .unwrap_or_default(),
        ConstExpr::GlobalGet(idx) => globals.get(idx as usize).map(|g| g.value.get()).unwrap_or_default(),
    }
}

fn resolve_imports(store: &Store, module: &Module) -> Result<ResolvedImports, Error> {
    let mut resolved = ResolvedImports::default();
    for import in &module.imports {
        let unknown = || Error::UnknownImport { module: import.module.clone(), field: import.field.clone() };
        let provider = store.find_module(&import.module).ok_or_else(unknown)?;
        let export = provider.export(&import.field).ok_or_else(unknown)?;
        match (import.desc, export) {
            (ImportDesc::Func(type_idx), ExportValue::Function(f)) => {
                let expected = module.types.get(type_idx as usize).ok_or(Error::Validation(UNKNOWN_TYPE))?;
                if f.ty != *expected { return link(INCOMPATIBLE_IMPORT); }
                resolved.functions.push(f.clone());
            }
            (ImportDesc::Table(expected), ExportValue::Table(t)) => {
                let actual = t.borrow().ty();
                if actual.elem != expected.elem || !actual.limits.fits(&expected.limits) {
                    return link(INCOMPATIBLE_IMPORT);
                }
                resolved.tables.push(t.clone());
            }
            (ImportDesc::Memory(expected), ExportValue::Memory(m)) => {
                if !m.borrow().ty().limits.fits(&expected.limits) { return link(INCOMPATIBLE_IMPORT); }
                resolved.memories.push(m.clone());
            }
            (ImportDesc::Global(expected), ExportValue::Global(g)) => {
                if g.ty != expected { return link(INCOMPATIBLE_IMPORT); }
                resolved.globals.push(g.clone());
            }
            _ => return link(INCOMPATIBLE_IMPORT),
        }
    }
    Ok(resolved)
}

fn build_exports(module: &Module, inst: &ModuleInstance) -> HashMap<String, ExportValue> {
    module
        .exports
        .iter()
        .filter_map(|ex| {
            let idx = ex.idx as usize;
            let value = match ex.kind {
                ExternKind::Func => ExportValue::Function(inst.functions.get(idx)?.clone()),
                ExternKind::Table => ExportValue::Table(inst.tables.get(idx)?.clone()),
                ExternKind::Mem => ExportValue::Memory(inst.memories.get(idx)?.clone()),
                ExternKind::Global => ExportValue::Global(inst.globals.get(idx)?.clone()),
            };
            Some((ex.name.clone(), value))
        })
        .collect()
}

impl Interpreter {
    /// Instantiates a validated module into `store`.
    ///
    /// With a `name` the instance becomes importable and reachable through
    /// `Store::find_module` once instantiation succeeded. On a segment or start
    /// failure the partially initialized instance stays alive in the store, as
    /// funcrefs written to shared tables may already point into it.
    pub fn instantiate(
        &mut self,
        store: &Store,
        module: Rc<Module>,
        name: Option<&str>,
        conf: &Configure,
        stat: &mut Statistics,
    ) -> Result<Rc<ModuleInstance>, Error> {
        if let Some(name) = name {
            if store.contains_module(name) { return Err(Error::NameCollision(name.to_string())); }
        }
        let imports = resolve_imports(store, &module)?;

        let page_limit = conf.max_memory_page();
        if module.memories.iter().skip(module.imported_memories as usize).any(|m| m.limits.min > page_limit) {
            return uninstantiable(MEMORY_PAGE_LIMIT);
        }

        let inst = Rc::new_cyclic(|weak: &Weak<ModuleInstance>| {
            let mut functions = imports.functions;
            for (def_idx, f) in module.functions.iter().enumerate() {
                let ty = module.types.get(f.type_idx as usize).cloned().unwrap_or_default();
                let kind = FuncKind::Wasm { module: weak.clone(), code: module.clone(), def_idx };
                functions.push(store.alloc_function(ty, kind));
            }

            let mut tables = imports.tables;
            tables.extend(module.tables.iter().skip(module.imported_tables as usize).map(|t| Rc::new(RefCell::new(TableInstance::new(t)))));

            let mut memories = imports.memories;
            memories.extend(module.memories.iter().skip(module.imported_memories as usize).map(|m| Rc::new(RefCell::new(MemoryInstance::new(m, page_limit)))));

            let mut globals = imports.globals;
            let defined = module.globals.iter().skip(module.imported_globals as usize);
            for (ty, init) in defined.zip(&module.global_inits) {
                let value = eval_const(init, &globals, &functions);
                globals.push(Rc::new(GlobalInstance::new(*ty, value)));
            }

            let elems = module
                .elements
                .iter()
                .map(|seg| seg.init.iter().map(|e| eval_const(e, &globals, &functions)).collect())
                .collect();
            let datas = module.data.iter().map(|d| d.data.clone()).collect();

            let mut inst = ModuleInstance {
                name: name.unwrap_or_default().to_string(),
                module: Some(module.clone()),
                functions,
                tables,
                memories,
                globals,
                elems: RefCell::new(elems),
                datas: RefCell::new(datas),
                exports: HashMap::new(),
            };
            inst.exports = build_exports(&module, &inst);
            inst
        });
        store.push_module(inst.clone());

        for (i, seg) in module.elements.iter().enumerate() {
            match &seg.mode {
                ElemMode::Active { table, offset } => {
                    let offset = eval_const(offset, &inst.globals, &inst.functions).as_u32();
                    let values = std::mem::take(&mut inst.elems.borrow_mut()[i]);
                    let table = inst.tables.get(*table as usize).ok_or(Error::Validation(UNKNOWN_TABLE))?;
                    table.borrow_mut().init(offset, &values).map_err(|_| Error::Uninstantiable(OOB_TABLE_ACCESS))?;
                }
                ElemMode::Declarative => inst.elems.borrow_mut()[i].clear(),
                ElemMode::Passive => {}
            }
        }

        for (i, seg) in module.data.iter().enumerate() {
            if let DataMode::Active { memory, offset } = &seg.mode {
                let offset = eval_const(offset, &inst.globals, &inst.functions).as_u32();
                let mem = inst.memories.get(*memory as usize).ok_or(Error::Validation(UNKNOWN_MEMORY))?;
                mem.borrow_mut()
                    .write_bytes(offset, &module.bytes[seg.data.clone()])
                    .map_err(|_| Error::Uninstantiable(OOB_MEMORY_ACCESS))?;
                inst.datas.borrow_mut()[i] = 0..0;
            }
        }

        if let Some(start) = module.start {
            let f = inst.functions.get(start as usize).cloned().ok_or(Error::Validation(START_FUNC))?;
            match self.invoke(store, &f, &[], stat) {
                Ok(_) => {}
                Err(Error::Trap(msg)) => return uninstantiable(msg),
                Err(e) => return Err(e),
            }
        }

        if let Some(name) = name {
            store.register_named(name, inst.clone())?;
        }
        debug!(
            module = name.unwrap_or("<anonymous>"),
            functions = inst.functions.len(),
            exports = inst.exports.len(),
            "instantiated module"
        );
        Ok(inst)
    }

    /// Allocates the entities of an import object and registers them under
    /// the object's name.
    pub fn instantiate_import_object(store: &Store, obj: &ImportObject) -> Result<Rc<ModuleInstance>, Error> {
        let name = obj.name();
        if store.contains_module(name) { return Err(Error::NameCollision(name.to_string())); }

        let mut inst = ModuleInstance { name: name.to_string(), ..Default::default() };
        for (field, host) in &obj.functions {
            let f = store.alloc_function(host.ty().clone(), FuncKind::Host(host.clone()));
            inst.exports.insert(field.clone(), ExportValue::Function(f.clone()));
            inst.functions.push(f);
        }
        for (field, global) in &obj.globals {
            inst.exports.insert(field.clone(), ExportValue::Global(global.clone()));
            inst.globals.push(global.clone());
        }
        for (field, memory) in &obj.memories {
            inst.exports.insert(field.clone(), ExportValue::Memory(memory.clone()));
            inst.memories.push(memory.clone());
        }
        for (field, table) in &obj.tables {
            inst.exports.insert(field.clone(), ExportValue::Table(table.clone()));
            inst.tables.push(table.clone());
        }

        let inst = Rc::new(inst);
        store.push_module(inst.clone());
        store.register_named(name, inst.clone())?;
        debug!(module = name, functions = inst.functions.len(), "registered host module");
        Ok(inst)
    }
}
