use std::fs;
use std::ops::Range;
use std::path::Path;

use nohash_hasher::IntMap;

use crate::byte_iter::ByteIter;
#[cfg(feature = "wasm_debug")]
use crate::debug_println;
use crate::error::*;
use crate::types::*;

// ---------------- Import/Export related ----------------
#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Clone, Copy, Debug)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternKind {
    Func = 0,
    Table = 1,
    Mem = 2,
    Global = 3,
}

impl ExternKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ExternKind::Func),
            1 => Some(ExternKind::Table),
            2 => Some(ExternKind::Mem),
            3 => Some(ExternKind::Global),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub idx: u32,
}

// ---------------- Structures ----------------
/// A function defined in this module. `locals` excludes the parameters.
#[derive(Clone, Debug)]
pub struct Function {
    pub type_idx: u32,
    pub locals: Vec<ValType>,
    pub body: Range<usize>,
}

/// Single-instruction constant expression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128(u128),
    RefNull(RefType),
    RefFunc(u32),
    GlobalGet(u32),
}

#[derive(Clone, Debug)]
pub enum ElemMode {
    Passive,
    Active { table: u32, offset: ConstExpr },
    Declarative,
}

#[derive(Clone, Debug)]
pub struct ElementSegment {
    pub ty: RefType,
    pub init: Vec<ConstExpr>,
    pub mode: ElemMode,
}

#[derive(Clone, Debug)]
pub enum DataMode {
    Passive,
    Active { memory: u32, offset: ConstExpr },
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub data: Range<usize>,
    pub mode: DataMode,
}

/// Control-flow side table entry, keyed by the position of the block type
/// immediate of a `block`, `loop` or `if`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// First instruction of the body.
    pub body: usize,
    /// First instruction after `else`, if any.
    pub else_pc: Option<usize>,
    /// First instruction after the matching `end`.
    pub end: usize,
    pub params: u32,
    pub results: u32,
}

// ---------------- Module Structure ----------------
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub bytes: Vec<u8>,
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type index of every function, imported ones first.
    pub func_types: Vec<u32>,
    /// Bodies of the functions defined in this module.
    pub functions: Vec<Function>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<GlobalType>,
    /// Initializers of the globals defined in this module.
    pub global_inits: Vec<ConstExpr>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
    pub imported_funcs: u32,
    pub imported_tables: u32,
    pub imported_memories: u32,
    pub imported_globals: u32,
    /// Filled in by the validator.
    pub blocks: IntMap<usize, BlockInfo>,
}

impl Module {
    pub const MAX_PAGES: u32 = 65536;
    pub const MAX_LOCALS: u64 = 50000;

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        Self::compile(bytes)
    }

    pub fn compile(bytes: Vec<u8>) -> Result<Self, Error> {
        let mut m = Module::default();
        m.initialize(&bytes)?;
        m.bytes = bytes;
        Ok(m)
    }

    pub fn func_type(&self, func_idx: u32) -> Option<&FuncType> {
        let ty = *self.func_types.get(func_idx as usize)?;
        self.types.get(ty as usize)
    }

    pub fn export(&self, name: &str) -> Option<&Export> { self.exports.iter().find(|e| e.name == name) }

    fn initialize(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() < 4 { return malformed(UNEXPECTED_END); }
        if &bytes[0..4] != MAGIC_HEADER { return malformed(NO_MAGIC_HEADER); }
        let mut it = ByteIter::new(bytes, 4);
        if it.read_u32_le().map_err(|_| Error::Malformed(UNEXPECTED_END))? != BINARY_VERSION {
            return malformed(UNKNOWN_BINARY_VERSION);
        }

        let mut last_rank = 0u8;
        let mut n_declared_funcs: Option<u32> = None;
        let mut saw_code = false;
        while !it.empty() {
            let id = it.read_u8()?;
            let size = it.read_u32()? as usize;
            if !it.has_n_left(size) { return malformed(LENGTH_OUT_OF_BOUNDS); }
            let start = it.cur();
            let end = start + size;
            debug_println!("[load] section id={} size={} at 0x{:x}", id, size, start);
            let mut sec = ByteIter::new(&bytes[..end], start);

            if id == 0 {
                sec.read_name()?;
                it.idx = end;
                continue;
            }
            let rank = section_rank(id).ok_or(Error::Malformed(INVALID_SECTION_ID))?;
            if rank <= last_rank { return malformed(JUNK_AFTER_LAST); }
            last_rank = rank;

            match id {
                1 => self.parse_type_section(&mut sec)?,
                2 => self.parse_import_section(&mut sec)?,
                3 => n_declared_funcs = Some(self.parse_function_section(&mut sec)?),
                4 => self.parse_table_section(&mut sec)?,
                5 => self.parse_memory_section(&mut sec)?,
                6 => self.parse_global_section(&mut sec)?,
                7 => self.parse_export_section(&mut sec)?,
                8 => self.start = Some(sec.read_u32()?),
                9 => self.parse_element_section(&mut sec)?,
                12 => self.data_count = Some(sec.read_u32()?),
                10 => {
                    saw_code = true;
                    self.parse_code_section(bytes, &mut sec)?
                }
                11 => self.parse_data_section(&mut sec)?,
                _ => return malformed(INVALID_SECTION_ID),
            }
            if sec.cur() != end { return malformed(SECTION_SIZE_MISMATCH); }
            it.idx = end;
        }

        let declared = n_declared_funcs.unwrap_or(0) as usize;
        if declared != self.functions.len() || (declared > 0 && !saw_code) {
            return malformed(FUNC_CODE_INCONSISTENT);
        }
        if let Some(n) = self.data_count {
            if n as usize != self.data.len() { return malformed(DATA_COUNT_INCONSISTENT); }
        }
        Ok(())
    }

    fn parse_type_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_types = it.read_u32()?;
        for _ in 0..n_types {
            if it.read_u8()? != 0x60 { return malformed(INT_TOO_LONG); }
            let n_params = it.read_u32()?;
            let mut params = Vec::with_capacity(n_params.min(1024) as usize);
            for _ in 0..n_params { params.push(ValType::read(it)?); }
            let n_results = it.read_u32()?;
            let mut results = Vec::with_capacity(n_results.min(1024) as usize);
            for _ in 0..n_results { results.push(ValType::read(it)?); }
            self.types.push(FuncType { params, results });
        }
        Ok(())
    }

    fn parse_import_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_imports = it.read_u32()?;
        for _ in 0..n_imports {
            let module = it.read_name()?;
            let field = it.read_name()?;
            let kind = ExternKind::from_byte(it.read_u8()?).ok_or(Error::Malformed(MALFORMED_IMPORT_KIND))?;
            let desc = match kind {
                ExternKind::Func => {
                    let type_idx = it.read_u32()?;
                    self.func_types.push(type_idx);
                    self.imported_funcs += 1;
                    ImportDesc::Func(type_idx)
                }
                ExternKind::Table => {
                    let elem = RefType::read(it)?;
                    let table = TableType { elem, limits: Limits::read(it)? };
                    self.tables.push(table);
                    self.imported_tables += 1;
                    ImportDesc::Table(table)
                }
                ExternKind::Mem => {
                    let memory = MemoryType { limits: Limits::read(it)? };
                    self.memories.push(memory);
                    self.imported_memories += 1;
                    ImportDesc::Memory(memory)
                }
                ExternKind::Global => {
                    let global = GlobalType::read(it)?;
                    self.globals.push(global);
                    self.imported_globals += 1;
                    ImportDesc::Global(global)
                }
            };
            self.imports.push(Import { module, field, desc });
        }
        Ok(())
    }

    fn parse_function_section(&mut self, it: &mut ByteIter) -> Result<u32, Error> {
        let n_functions = it.read_u32()?;
        for _ in 0..n_functions {
            let type_idx = it.read_u32()?;
            self.func_types.push(type_idx);
        }
        Ok(n_functions)
    }

    fn parse_table_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_tables = it.read_u32()?;
        for _ in 0..n_tables {
            let elem = RefType::read(it)?;
            self.tables.push(TableType { elem, limits: Limits::read(it)? });
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_memories = it.read_u32()?;
        for _ in 0..n_memories {
            self.memories.push(MemoryType { limits: Limits::read(it)? });
        }
        Ok(())
    }

    fn parse_global_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_globals = it.read_u32()?;
        for _ in 0..n_globals {
            let global = GlobalType::read(it)?;
            let init = read_const_expr(it)?;
            self.globals.push(global);
            self.global_inits.push(init);
        }
        Ok(())
    }

    fn parse_export_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_exports = it.read_u32()?;
        for _ in 0..n_exports {
            let name = it.read_name()?;
            let kind = ExternKind::from_byte(it.read_u8()?).ok_or(Error::Malformed(MALFORMED_EXPORT_KIND))?;
            let idx = it.read_u32()?;
            self.exports.push(Export { name, kind, idx });
        }
        Ok(())
    }

    fn parse_element_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_segments = it.read_u32()?;
        for _ in 0..n_segments {
            let flags = it.read_u32()?;
            if flags > 7 { return malformed(INVALID_ELEM_SEG_FLAG); }
            let uses_exprs = flags & 0b100 != 0;

            let mode = if flags & 0b001 == 0 {
                let table = if flags & 0b010 != 0 { it.read_u32()? } else { 0 };
                ElemMode::Active { table, offset: read_const_expr(it)? }
            } else if flags & 0b010 == 0 {
                ElemMode::Passive
            } else {
                ElemMode::Declarative
            };

            // Forms 0 and 4 have an implicit funcref element type.
            let ty = if flags & 0b011 == 0 {
                RefType::FuncRef
            } else if uses_exprs {
                RefType::read(it)?
            } else {
                if it.read_u8()? != 0x00 { return malformed(INVALID_ELEM_KIND); }
                RefType::FuncRef
            };

            let n_items = it.read_u32()?;
            let mut init = Vec::with_capacity(n_items.min(4096) as usize);
            for _ in 0..n_items {
                init.push(if uses_exprs { read_const_expr(it)? } else { ConstExpr::RefFunc(it.read_u32()?) });
            }
            self.elements.push(ElementSegment { ty, init, mode });
        }
        Ok(())
    }

    fn parse_code_section(&mut self, bytes: &[u8], it: &mut ByteIter) -> Result<(), Error> {
        let n_bodies = it.read_u32()?;
        let n_declared = self.func_types.len() - self.imported_funcs as usize;
        if n_bodies as usize != n_declared { return malformed(FUNC_CODE_INCONSISTENT); }

        for i in 0..n_declared {
            let size = it.read_u32()? as usize;
            if !it.has_n_left(size) { return malformed(UNEXPECTED_END); }
            let end = it.cur() + size;
            let mut body_it = ByteIter::new(&bytes[..end], it.cur());

            let mut locals = Vec::new();
            let mut total: u64 = 0;
            let n_decls = body_it.read_u32()?;
            for _ in 0..n_decls {
                let n = body_it.read_u32()?;
                total += n as u64;
                if total > Module::MAX_LOCALS { return malformed(TOO_MANY_LOCALS); }
                let ty = ValType::read(&mut body_it)?;
                locals.extend(std::iter::repeat(ty).take(n as usize));
            }

            let type_idx = self.func_types[self.imported_funcs as usize + i];
            self.functions.push(Function { type_idx, locals, body: body_it.cur()..end });
            it.idx = end;
        }
        Ok(())
    }

    fn parse_data_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n_segments = it.read_u32()?;
        for _ in 0..n_segments {
            let mode = match it.read_u32()? {
                0 => DataMode::Active { memory: 0, offset: read_const_expr(it)? },
                1 => DataMode::Passive,
                2 => {
                    let memory = it.read_u32()?;
                    DataMode::Active { memory, offset: read_const_expr(it)? }
                }
                _ => return malformed(INVALID_DATA_SEG_FLAG),
            };
            let len = it.read_u32()? as usize;
            if !it.has_n_left(len) { return malformed(UNEXPECTED_END_SHORT); }
            let start = it.cur();
            it.advance(len);
            self.data.push(DataSegment { data: start..start + len, mode });
        }
        Ok(())
    }
}

// ---------------- Helper Functions ----------------
/// Canonical position of a non-custom section; the data count section sits
/// between the element and code sections.
fn section_rank(id: u8) -> Option<u8> {
    match id {
        1..=9 => Some(id),
        12 => Some(10),
        10 => Some(11),
        11 => Some(12),
        _ => None,
    }
}

fn read_const_expr(it: &mut ByteIter) -> Result<ConstExpr, Error> {
    let expr = match it.read_u8()? {
        0x41 => ConstExpr::I32(it.read_i32()?),
        0x42 => ConstExpr::I64(it.read_i64()?),
        0x43 => ConstExpr::F32(it.read_u32_le()?),
        0x44 => ConstExpr::F64(it.read_u64_le()?),
        0x23 => ConstExpr::GlobalGet(it.read_u32()?),
        0xd0 => ConstExpr::RefNull(RefType::read(it)?),
        0xd2 => ConstExpr::RefFunc(it.read_u32()?),
        0xfd => {
            if it.read_u32()? != 12 { return validation(CONST_EXP_REQUIRED); }
            ConstExpr::V128(it.read_u128_le()?)
        }
        0x0b => return validation(TYPE_MISMATCH),
        _ => return validation(CONST_EXP_REQUIRED),
    };
    if it.read_u8()? != 0x0b { return validation(CONST_EXP_REQUIRED); }
    Ok(expr)
}
