use std::collections::HashSet;

use crate::config::{Configure, Proposal};
#[cfg(feature = "wasm_debug")]
use crate::debug_println;
use crate::error::*;
use crate::leb128::{safe_read_leb128, safe_read_sleb128};
use crate::module::*;
use crate::types::*;

use ValType::{F32, F64, I32, I64, V128};

/// Static checker for loaded modules. Also records the block side table the
/// interpreter uses to resolve branch targets.
pub struct Validator<'a> {
    conf: &'a Configure,
}

impl<'a> Validator<'a> {
    pub fn new(conf: &'a Configure) -> Self { Self { conf } }

    pub fn validate(&self, m: &mut Module) -> Result<(), Error> {
        m.blocks.clear();
        self.validate_types(m)?;
        self.validate_imports(m)?;
        for &ty in &m.func_types[m.imported_funcs as usize..] {
            if ty as usize >= m.types.len() { return validation(UNKNOWN_TYPE); }
        }
        self.validate_tables(m)?;
        self.validate_memories(m)?;
        self.validate_globals(m)?;
        self.validate_elements(m)?;
        self.validate_data(m)?;
        self.validate_start(m)?;
        self.validate_exports(m)?;

        let refs = declared_func_refs(m);
        let mut blocks = Vec::new();
        for idx in 0..m.functions.len() {
            blocks.extend(FuncValidator::new(self, m, idx, &refs).run()?);
        }
        m.blocks.extend(blocks);
        Ok(())
    }

    #[inline]
    fn require(&self, p: Proposal, msg: &'static str) -> Result<(), Error> {
        if self.conf.has_proposal(p) { Ok(()) } else { validation(msg) }
    }

    fn check_val_type(&self, ty: ValType) -> Result<(), Error> {
        match ty {
            ValType::V128 => self.require(Proposal::Simd, SIMD_DISABLED),
            ValType::FuncRef | ValType::ExternRef => self.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED),
            _ => Ok(()),
        }
    }

    fn check_table_type(&self, t: &TableType) -> Result<(), Error> {
        if t.elem == RefType::ExternRef { self.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?; }
        check_limits(&t.limits, u32::MAX)
    }

    fn check_memory_type(&self, t: &MemoryType) -> Result<(), Error> {
        check_limits(&t.limits, Module::MAX_PAGES)
    }

    fn validate_types(&self, m: &Module) -> Result<(), Error> {
        for ty in &m.types {
            if ty.results.len() > 1 { self.require(Proposal::MultiValue, MULTI_VALUE_DISABLED)?; }
            for &t in ty.params.iter().chain(&ty.results) { self.check_val_type(t)?; }
        }
        Ok(())
    }

    fn validate_imports(&self, m: &Module) -> Result<(), Error> {
        for import in &m.imports {
            match import.desc {
                ImportDesc::Func(ty) => {
                    if ty as usize >= m.types.len() { return validation(UNKNOWN_TYPE); }
                }
                ImportDesc::Table(t) => self.check_table_type(&t)?,
                ImportDesc::Memory(t) => self.check_memory_type(&t)?,
                ImportDesc::Global(g) => {
                    self.check_val_type(g.ty)?;
                    if g.mutable { self.require(Proposal::ImportExportMutGlobals, MUT_GLOBAL_DISABLED)?; }
                }
            }
        }
        Ok(())
    }

    fn validate_tables(&self, m: &Module) -> Result<(), Error> {
        if m.tables.len() > 1 && !self.conf.has_proposal(Proposal::ReferenceTypes) {
            return validation(MULTIPLE_TABLES);
        }
        for t in &m.tables[m.imported_tables as usize..] { self.check_table_type(t)?; }
        Ok(())
    }

    fn validate_memories(&self, m: &Module) -> Result<(), Error> {
        if m.memories.len() > 1 { return validation(MULTIPLE_MEMORIES); }
        for t in &m.memories[m.imported_memories as usize..] { self.check_memory_type(t)?; }
        Ok(())
    }

    fn validate_globals(&self, m: &Module) -> Result<(), Error> {
        let defined = &m.globals[m.imported_globals as usize..];
        for (g, init) in defined.iter().zip(&m.global_inits) {
            self.check_val_type(g.ty)?;
            if self.const_expr_type(m, init)? != g.ty { return validation(TYPE_MISMATCH); }
        }
        Ok(())
    }

    fn validate_elements(&self, m: &Module) -> Result<(), Error> {
        for seg in &m.elements {
            if seg.ty == RefType::ExternRef { self.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?; }
            match &seg.mode {
                ElemMode::Active { table, offset } => {
                    let t = m.tables.get(*table as usize).ok_or(Error::Validation(UNKNOWN_TABLE))?;
                    if t.elem != seg.ty { return validation(TYPE_MISMATCH); }
                    if self.const_expr_type(m, offset)? != I32 { return validation(TYPE_MISMATCH); }
                }
                ElemMode::Passive => self.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?,
                ElemMode::Declarative => self.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?,
            }
            for expr in &seg.init {
                if self.const_expr_type(m, expr)? != ValType::from(seg.ty) { return validation(TYPE_MISMATCH); }
            }
        }
        Ok(())
    }

    fn validate_data(&self, m: &Module) -> Result<(), Error> {
        for seg in &m.data {
            match &seg.mode {
                DataMode::Active { memory, offset } => {
                    if *memory as usize >= m.memories.len() { return validation(UNKNOWN_MEMORY); }
                    if self.const_expr_type(m, offset)? != I32 { return validation(TYPE_MISMATCH); }
                }
                DataMode::Passive => self.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?,
            }
        }
        Ok(())
    }

    fn validate_start(&self, m: &Module) -> Result<(), Error> {
        if let Some(start) = m.start {
            let ty = m.func_type(start).ok_or(Error::Validation(UNKNOWN_FUNC))?;
            if !ty.params.is_empty() || !ty.results.is_empty() { return validation(START_FUNC); }
        }
        Ok(())
    }

    fn validate_exports(&self, m: &Module) -> Result<(), Error> {
        let mut names = HashSet::new();
        for export in &m.exports {
            if !names.insert(export.name.as_str()) { return validation(DUP_EXPORT_NAME); }
            let idx = export.idx as usize;
            match export.kind {
                ExternKind::Func if idx >= m.func_types.len() => return validation(UNKNOWN_FUNC),
                ExternKind::Table if idx >= m.tables.len() => return validation(UNKNOWN_TABLE),
                ExternKind::Mem if idx >= m.memories.len() => return validation(UNKNOWN_MEMORY),
                ExternKind::Global => {
                    let g = m.globals.get(idx).ok_or(Error::Validation(UNKNOWN_GLOBAL))?;
                    if g.mutable { self.require(Proposal::ImportExportMutGlobals, MUT_GLOBAL_DISABLED)?; }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn const_expr_type(&self, m: &Module, expr: &ConstExpr) -> Result<ValType, Error> {
        Ok(match *expr {
            ConstExpr::I32(_) => I32,
            ConstExpr::I64(_) => I64,
            ConstExpr::F32(_) => F32,
            ConstExpr::F64(_) => F64,
            ConstExpr::V128(_) => {
                self.require(Proposal::Simd, SIMD_DISABLED)?;
                V128
            }
            ConstExpr::RefNull(r) => {
                self.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                r.into()
            }
            ConstExpr::RefFunc(f) => {
                if f as usize >= m.func_types.len() { return validation(UNKNOWN_FUNC); }
                ValType::FuncRef
            }
            ConstExpr::GlobalGet(g) => {
                if g >= m.imported_globals { return validation(UNKNOWN_GLOBAL); }
                let g = m.globals[g as usize];
                if g.mutable { return validation(CONST_EXP_REQUIRED); }
                g.ty
            }
        })
    }
}

fn check_limits(limits: &Limits, upper: u32) -> Result<(), Error> {
    if limits.min > upper || limits.max.is_some_and(|max| max > upper) {
        return validation(MEMORY_SIZE_LIMIT);
    }
    if limits.max.is_some_and(|max| max < limits.min) { return validation(MIN_GREATER_THAN_MAX); }
    Ok(())
}

/// Functions that may be named by `ref.func` inside code.
fn declared_func_refs(m: &Module) -> HashSet<u32> {
    let mut refs = HashSet::new();
    let exprs = m.elements.iter().flat_map(|seg| seg.init.iter()).chain(&m.global_inits);
    for expr in exprs {
        if let ConstExpr::RefFunc(f) = expr { refs.insert(*f); }
    }
    refs.extend(m.exports.iter().filter(|e| e.kind == ExternKind::Func).map(|e| e.idx));
    refs
}

// ---------------- Function Validation ----------------
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

struct ControlFrame {
    kind: FrameKind,
    start_types: Vec<ValType>,
    end_types: Vec<ValType>,
    height: usize,
    unreachable: bool,
    key: usize,
    body: usize,
    else_pc: Option<usize>,
}

impl ControlFrame {
    fn label_types(&self) -> &[ValType] {
        if self.kind == FrameKind::Loop { &self.start_types } else { &self.end_types }
    }
}

/// `None` is the unknown type produced by unreachable code.
type Slot = Option<ValType>;

struct FuncValidator<'a> {
    v: &'a Validator<'a>,
    m: &'a Module,
    func: &'a Function,
    refs: &'a HashSet<u32>,
    locals: Vec<ValType>,
    vals: Vec<Slot>,
    ctrls: Vec<ControlFrame>,
    blocks: Vec<(usize, BlockInfo)>,
}

macro_rules! memarg {
    ($self:ident, $code:ident, $pc:ident, $max_align:expr) => {{
        let align: u32 = safe_read_leb128($code, &mut $pc, 32)?;
        let _offset: u32 = safe_read_leb128($code, &mut $pc, 32)?;
        if $self.m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
        if align > $max_align { return validation(ALIGNMENT_TOO_LARGE); }
    }};
}

macro_rules! zero_byte {
    ($code:ident, $pc:ident) => {{
        let b = *$code.get($pc).ok_or(Error::Malformed(UNEXPECTED_END))?;
        $pc += 1;
        if b != 0 { return malformed(ZERO_BYTE_EXPECTED); }
    }};
}

impl<'a> FuncValidator<'a> {
    fn new(v: &'a Validator<'a>, m: &'a Module, idx: usize, refs: &'a HashSet<u32>) -> Self {
        let func = &m.functions[idx];
        Self {
            v,
            m,
            func,
            refs,
            locals: Vec::new(),
            vals: Vec::with_capacity(64),
            ctrls: Vec::with_capacity(16),
            blocks: Vec::new(),
        }
    }

    fn push(&mut self, ty: ValType) { self.vals.push(Some(ty)); }

    fn push_vals(&mut self, tys: &[ValType]) { self.vals.extend(tys.iter().map(|&t| Some(t))); }

    fn pop(&mut self) -> Result<Slot, Error> {
        let frame = self.ctrls.last().ok_or(Error::Validation(TYPE_MISMATCH))?;
        if self.vals.len() == frame.height {
            return if frame.unreachable { Ok(None) } else { validation(TYPE_MISMATCH) };
        }
        Ok(self.vals.pop().flatten())
    }

    fn pop_expect(&mut self, expected: ValType) -> Result<Slot, Error> {
        match self.pop()? {
            Some(actual) if actual != expected => validation(TYPE_MISMATCH),
            _ => Ok(Some(expected)),
        }
    }

    fn pop_vals(&mut self, tys: &[ValType]) -> Result<Vec<Slot>, Error> {
        let mut popped = vec![None; tys.len()];
        for (i, &t) in tys.iter().enumerate().rev() {
            popped[i] = self.pop_expect(t)?;
        }
        Ok(popped)
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: Vec<ValType>, end_types: Vec<ValType>, key: usize, body: usize) {
        self.push_vals(&start_types);
        self.ctrls.push(ControlFrame {
            kind,
            height: self.vals.len() - start_types.len(),
            start_types,
            end_types,
            unreachable: false,
            key,
            body,
            else_pc: None,
        });
    }

    fn pop_ctrl(&mut self) -> Result<ControlFrame, Error> {
        let end_types = match self.ctrls.last() {
            Some(frame) => frame.end_types.clone(),
            None => return validation(TYPE_MISMATCH),
        };
        self.pop_vals(&end_types)?;
        let frame = self.ctrls.pop().ok_or(Error::Validation(TYPE_MISMATCH))?;
        if self.vals.len() != frame.height { return validation(TYPE_MISMATCH); }
        Ok(frame)
    }

    fn set_unreachable(&mut self) {
        if let Some(frame) = self.ctrls.last_mut() {
            self.vals.truncate(frame.height);
            frame.unreachable = true;
        }
    }

    fn label(&self, depth: u32) -> Result<Vec<ValType>, Error> {
        let n = self.ctrls.len();
        if depth as usize >= n { return validation(UNKNOWN_LABEL); }
        Ok(self.ctrls[n - 1 - depth as usize].label_types().to_vec())
    }

    fn block_sig(&self, bt: BlockType) -> Result<(Vec<ValType>, Vec<ValType>), Error> {
        match bt {
            BlockType::Empty => Ok((vec![], vec![])),
            BlockType::Value(t) => {
                self.v.check_val_type(t)?;
                Ok((vec![], vec![t]))
            }
            BlockType::Index(idx) => {
                let ty = self.m.types.get(idx as usize).ok_or(Error::Validation(UNKNOWN_TYPE))?;
                self.v.require(Proposal::MultiValue, MULTI_VALUE_DISABLED)?;
                Ok((ty.params.clone(), ty.results.clone()))
            }
        }
    }

    fn table(&self, idx: u32) -> Result<TableType, Error> {
        self.m.tables.get(idx as usize).copied().ok_or(Error::Validation(UNKNOWN_TABLE))
    }

    fn data_segment(&self, idx: u32) -> Result<(), Error> {
        let count = self.m.data_count.ok_or(Error::Malformed(DATA_COUNT_REQUIRED))?;
        if idx >= count { return validation(UNKNOWN_DATA); }
        Ok(())
    }

    fn run(mut self) -> Result<Vec<(usize, BlockInfo)>, Error> {
        let ty = self.m.types.get(self.func.type_idx as usize).ok_or(Error::Validation(UNKNOWN_TYPE))?;
        self.locals = ty.params.iter().chain(&self.func.locals).copied().collect();
        for &t in &self.func.locals { self.v.check_val_type(t)?; }
        let results = ty.results.clone();
        self.push_ctrl(FrameKind::Function, vec![], results, self.func.body.start, self.func.body.start);

        let m = self.m;
        let code: &[u8] = &m.bytes[..self.func.body.end];
        let mut pc = self.func.body.start;

        macro_rules! u32_imm { () => { safe_read_leb128::<u32>(code, &mut pc, 32)? } }

        while !self.ctrls.is_empty() {
            if pc >= code.len() { return malformed(END_EXPECTED); }
            let op = code[pc];
            pc += 1;
            match op {
                0x00 => self.set_unreachable(), // unreachable
                0x01 => {} // nop
                0x02..=0x04 => { // block, loop, if
                    let key = pc;
                    let bt = BlockType::read(code, &mut pc)?;
                    let (params, results) = self.block_sig(bt)?;
                    if op == 0x04 { self.pop_expect(I32)?; }
                    self.pop_vals(&params)?;
                    let kind = match op {
                        0x02 => FrameKind::Block,
                        0x03 => FrameKind::Loop,
                        _ => FrameKind::If,
                    };
                    self.push_ctrl(kind, params, results, key, pc);
                }
                0x05 => { // else
                    if self.ctrls.last().map(|f| f.kind) != Some(FrameKind::If) {
                        return validation(ELSE_MUST_CLOSE_IF);
                    }
                    let frame = self.pop_ctrl()?;
                    self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types, frame.key, frame.body);
                    if let Some(f) = self.ctrls.last_mut() { f.else_pc = Some(pc); }
                }
                0x0b => { // end
                    let frame = self.pop_ctrl()?;
                    if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                        return validation(TYPE_MISMATCH);
                    }
                    if frame.kind != FrameKind::Function {
                        debug_println!("[val] block key={} body={} else={:?} end={}", frame.key, frame.body, frame.else_pc, pc);
                        self.blocks.push((frame.key, BlockInfo {
                            body: frame.body,
                            else_pc: frame.else_pc,
                            end: pc,
                            params: frame.start_types.len() as u32,
                            results: frame.end_types.len() as u32,
                        }));
                    }
                    self.push_vals(&frame.end_types);
                }
                0x0c => { // br
                    let tys = self.label(u32_imm!())?;
                    self.pop_vals(&tys)?;
                    self.set_unreachable();
                }
                0x0d => { // br_if
                    let depth = u32_imm!();
                    self.pop_expect(I32)?;
                    let tys = self.label(depth)?;
                    self.pop_vals(&tys)?;
                    self.push_vals(&tys);
                }
                0x0e => { // br_table
                    let n = u32_imm!();
                    let mut targets = Vec::with_capacity(n.min(1024) as usize);
                    for _ in 0..n { targets.push(u32_imm!()); }
                    let default = u32_imm!();
                    self.pop_expect(I32)?;
                    let default_tys = self.label(default)?;
                    for t in targets {
                        let tys = self.label(t)?;
                        if tys.len() != default_tys.len() { return validation(TYPE_MISMATCH); }
                        let popped = self.pop_vals(&tys)?;
                        self.vals.extend(popped);
                    }
                    self.pop_vals(&default_tys)?;
                    self.set_unreachable();
                }
                0x0f => { // return
                    let tys = self.ctrls[0].end_types.clone();
                    self.pop_vals(&tys)?;
                    self.set_unreachable();
                }
                0x10 => { // call
                    let f = u32_imm!();
                    let ty = m.func_type(f).ok_or(Error::Validation(UNKNOWN_FUNC))?;
                    self.pop_vals(&ty.params)?;
                    self.push_vals(&ty.results);
                }
                0x11 => { // call_indirect
                    let type_idx = u32_imm!();
                    let table_idx = u32_imm!();
                    if table_idx != 0 && !self.v.conf.has_proposal(Proposal::ReferenceTypes) {
                        return malformed(ZERO_BYTE_EXPECTED);
                    }
                    if self.table(table_idx)?.elem != RefType::FuncRef { return validation(TYPE_MISMATCH); }
                    let ty = m.types.get(type_idx as usize).ok_or(Error::Validation(UNKNOWN_TYPE))?;
                    self.pop_expect(I32)?;
                    self.pop_vals(&ty.params)?;
                    self.push_vals(&ty.results);
                }
                0x1a => { self.pop()?; } // drop
                0x1b => { // select
                    self.pop_expect(I32)?;
                    let t1 = self.pop()?;
                    let t2 = self.pop()?;
                    if t1.is_some_and(ValType::is_ref) || t2.is_some_and(ValType::is_ref) {
                        return validation(TYPE_MISMATCH);
                    }
                    if let (Some(a), Some(b)) = (t1, t2) {
                        if a != b { return validation(TYPE_MISMATCH); }
                    }
                    self.vals.push(t1.or(t2));
                }
                0x1c => { // select t*
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    if u32_imm!() != 1 { return validation(INVALID_RESULT_ARITY); }
                    let t = ValType::from_byte(*code.get(pc).ok_or(Error::Malformed(UNEXPECTED_END))?)
                        .ok_or(Error::Malformed(INVALID_VALUE_TYPE))?;
                    pc += 1;
                    self.v.check_val_type(t)?;
                    self.pop_expect(I32)?;
                    self.pop_expect(t)?;
                    self.pop_expect(t)?;
                    self.push(t);
                }
                0x20..=0x22 => { // local.get, local.set, local.tee
                    let idx = u32_imm!();
                    let ty = *self.locals.get(idx as usize).ok_or(Error::Validation(UNKNOWN_LOCAL))?;
                    match op {
                        0x20 => self.push(ty),
                        0x21 => { self.pop_expect(ty)?; }
                        _ => {
                            self.pop_expect(ty)?;
                            self.push(ty);
                        }
                    }
                }
                0x23 => { // global.get
                    let g = *m.globals.get(u32_imm!() as usize).ok_or(Error::Validation(UNKNOWN_GLOBAL))?;
                    self.push(g.ty);
                }
                0x24 => { // global.set
                    let g = *m.globals.get(u32_imm!() as usize).ok_or(Error::Validation(UNKNOWN_GLOBAL))?;
                    if !g.mutable { return validation(GLOBAL_IS_IMMUTABLE); }
                    self.pop_expect(g.ty)?;
                }
                0x25 => { // table.get
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    let t = self.table(u32_imm!())?;
                    self.pop_expect(I32)?;
                    self.push(t.elem.into());
                }
                0x26 => { // table.set
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    let t = self.table(u32_imm!())?;
                    self.pop_expect(t.elem.into())?;
                    self.pop_expect(I32)?;
                }
                0x28..=0x35 => { // loads
                    let (ty, max_align) = load_type(op);
                    memarg!(self, code, pc, max_align);
                    self.pop_expect(I32)?;
                    self.push(ty);
                }
                0x36..=0x3e => { // stores
                    let (ty, max_align) = store_type(op);
                    memarg!(self, code, pc, max_align);
                    self.pop_expect(ty)?;
                    self.pop_expect(I32)?;
                }
                0x3f => { // memory.size
                    zero_byte!(code, pc);
                    if m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
                    self.push(I32);
                }
                0x40 => { // memory.grow
                    zero_byte!(code, pc);
                    if m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
                    self.pop_expect(I32)?;
                    self.push(I32);
                }
                0x41 => { // i32.const
                    safe_read_sleb128::<i32>(code, &mut pc, 32)?;
                    self.push(I32);
                }
                0x42 => { // i64.const
                    safe_read_sleb128::<i64>(code, &mut pc, 64)?;
                    self.push(I64);
                }
                0x43 | 0x44 => { // f32.const, f64.const
                    let (ty, width) = if op == 0x43 { (F32, 4) } else { (F64, 8) };
                    if pc + width > code.len() { return malformed(UNEXPECTED_END); }
                    pc += width;
                    self.push(ty);
                }
                0x45..=0xc4 => {
                    if op >= 0xc0 { self.v.require(Proposal::SignExtensionOperators, SIGN_EXT_DISABLED)?; }
                    let (params, result) = numeric_sig(op).ok_or(Error::Malformed(ILLEGAL_OPCODE))?;
                    self.pop_vals(params)?;
                    self.push(result);
                }
                0xd0 => { // ref.null
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    let r = RefType::from_byte(*code.get(pc).ok_or(Error::Malformed(UNEXPECTED_END))?)
                        .ok_or(Error::Malformed(MALFORMED_REF_TYPE))?;
                    pc += 1;
                    self.push(r.into());
                }
                0xd1 => { // ref.is_null
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    if let Some(t) = self.pop()? {
                        if !t.is_ref() { return validation(TYPE_MISMATCH); }
                    }
                    self.push(I32);
                }
                0xd2 => { // ref.func
                    self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                    let f = u32_imm!();
                    if f as usize >= m.func_types.len() { return validation(UNKNOWN_FUNC); }
                    if !self.refs.contains(&f) { return validation(UNDECLARED_FUNC_REF); }
                    self.push(ValType::FuncRef);
                }
                0xfc => self.validate_fc(code, &mut pc)?,
                0xfd => { // SIMD subset
                    self.v.require(Proposal::Simd, SIMD_DISABLED)?;
                    match u32_imm!() {
                        0 => { // v128.load
                            memarg!(self, code, pc, 4);
                            self.pop_expect(I32)?;
                            self.push(V128);
                        }
                        11 => { // v128.store
                            memarg!(self, code, pc, 4);
                            self.pop_expect(V128)?;
                            self.pop_expect(I32)?;
                        }
                        12 => { // v128.const
                            if pc + 16 > code.len() { return malformed(UNEXPECTED_END); }
                            pc += 16;
                            self.push(V128);
                        }
                        _ => return malformed(ILLEGAL_OPCODE),
                    }
                }
                _ => return malformed(ILLEGAL_OPCODE),
            }
        }

        if pc != self.func.body.end { return malformed(SECTION_SIZE_MISMATCH); }
        Ok(self.blocks)
    }

    fn validate_fc(&mut self, code: &[u8], pc: &mut usize) -> Result<(), Error> {
        let m = self.m;
        let sub: u32 = safe_read_leb128(code, pc, 32)?;
        macro_rules! u32_imm { () => { safe_read_leb128::<u32>(code, pc, 32)? } }
        macro_rules! zero { () => {{
            let b = *code.get(*pc).ok_or(Error::Malformed(UNEXPECTED_END))?;
            *pc += 1;
            if b != 0 { return malformed(ZERO_BYTE_EXPECTED); }
        }} }
        match sub {
            0..=7 => { // saturating truncation
                self.v.require(Proposal::NonTrapFloatToIntConversions, SAT_TRUNC_DISABLED)?;
                let src = if sub & 0b010 == 0 { F32 } else { F64 };
                let dst = if sub < 4 { I32 } else { I64 };
                self.pop_expect(src)?;
                self.push(dst);
            }
            8 => { // memory.init
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                let seg = u32_imm!();
                zero!();
                if m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
                self.data_segment(seg)?;
                self.pop_vals(&[I32, I32, I32])?;
            }
            9 => { // data.drop
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                let seg = u32_imm!();
                self.data_segment(seg)?;
            }
            10 => { // memory.copy
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                zero!();
                zero!();
                if m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
                self.pop_vals(&[I32, I32, I32])?;
            }
            11 => { // memory.fill
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                zero!();
                if m.memories.is_empty() { return validation(UNKNOWN_MEMORY); }
                self.pop_vals(&[I32, I32, I32])?;
            }
            12 => { // table.init
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                let seg = u32_imm!();
                let t = self.table(u32_imm!())?;
                let seg = m.elements.get(seg as usize).ok_or(Error::Validation(UNKNOWN_ELEM))?;
                if seg.ty != t.elem { return validation(TYPE_MISMATCH); }
                self.pop_vals(&[I32, I32, I32])?;
            }
            13 => { // elem.drop
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                if u32_imm!() as usize >= m.elements.len() { return validation(UNKNOWN_ELEM); }
            }
            14 => { // table.copy
                self.v.require(Proposal::BulkMemoryOperations, BULK_MEMORY_DISABLED)?;
                let dst = self.table(u32_imm!())?;
                let src = self.table(u32_imm!())?;
                if dst.elem != src.elem { return validation(TYPE_MISMATCH); }
                self.pop_vals(&[I32, I32, I32])?;
            }
            15 => { // table.grow
                self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                let t = self.table(u32_imm!())?;
                self.pop_expect(I32)?;
                self.pop_expect(t.elem.into())?;
                self.push(I32);
            }
            16 => { // table.size
                self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                self.table(u32_imm!())?;
                self.push(I32);
            }
            17 => { // table.fill
                self.v.require(Proposal::ReferenceTypes, REF_TYPES_DISABLED)?;
                let t = self.table(u32_imm!())?;
                self.pop_expect(I32)?;
                self.pop_expect(t.elem.into())?;
                self.pop_expect(I32)?;
            }
            _ => return malformed(ILLEGAL_OPCODE),
        }
        Ok(())
    }
}

/// Result type and maximum alignment exponent of a load opcode.
fn load_type(op: u8) -> (ValType, u32) {
    match op {
        0x28 => (I32, 2),
        0x29 => (I64, 3),
        0x2a => (F32, 2),
        0x2b => (F64, 3),
        0x2c | 0x2d => (I32, 0),
        0x2e | 0x2f => (I32, 1),
        0x30 | 0x31 => (I64, 0),
        0x32 | 0x33 => (I64, 1),
        _ => (I64, 2),
    }
}

fn store_type(op: u8) -> (ValType, u32) {
    match op {
        0x36 => (I32, 2),
        0x37 => (I64, 3),
        0x38 => (F32, 2),
        0x39 => (F64, 3),
        0x3a => (I32, 0),
        0x3b => (I32, 1),
        0x3c => (I64, 0),
        0x3d => (I64, 1),
        _ => (I64, 2),
    }
}

/// Operand and result types of the plain numeric opcodes 0x45..=0xc4.
fn numeric_sig(op: u8) -> Option<(&'static [ValType], ValType)> {
    Some(match op {
        0x45 => (&[I32], I32),
        0x46..=0x4f => (&[I32, I32], I32),
        0x50 => (&[I64], I32),
        0x51..=0x5a => (&[I64, I64], I32),
        0x5b..=0x60 => (&[F32, F32], I32),
        0x61..=0x66 => (&[F64, F64], I32),
        0x67..=0x69 => (&[I32], I32),
        0x6a..=0x78 => (&[I32, I32], I32),
        0x79..=0x7b => (&[I64], I64),
        0x7c..=0x8a => (&[I64, I64], I64),
        0x8b..=0x91 => (&[F32], F32),
        0x92..=0x98 => (&[F32, F32], F32),
        0x99..=0x9f => (&[F64], F64),
        0xa0..=0xa6 => (&[F64, F64], F64),
        0xa7 => (&[I64], I32),
        0xa8 | 0xa9 => (&[F32], I32),
        0xaa | 0xab => (&[F64], I32),
        0xac | 0xad => (&[I32], I64),
        0xae | 0xaf => (&[F32], I64),
        0xb0 | 0xb1 => (&[F64], I64),
        0xb2 | 0xb3 => (&[I32], F32),
        0xb4 | 0xb5 => (&[I64], F32),
        0xb6 => (&[F64], F32),
        0xb7 | 0xb8 => (&[I32], F64),
        0xb9 | 0xba => (&[I64], F64),
        0xbb => (&[F32], F64),
        0xbc => (&[F32], I32),
        0xbd => (&[F64], I64),
        0xbe => (&[I32], F32),
        0xbf => (&[I64], F64),
        0xc0 | 0xc1 => (&[I32], I32),
        0xc2..=0xc4 => (&[I64], I64),
        _ => return None,
    })
}
