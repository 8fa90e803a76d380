#![allow(dead_code)]

//! Minimal WebAssembly binary writer used by the integration tests.

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const F32: u8 = 0x7d;
pub const F64: u8 = 0x7c;
pub const FUNCREF: u8 = 0x70;

pub fn leb_u32(mut v: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn leb_i64(mut v: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn i32_const(v: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    leb_i64(v as i64, &mut out);
    out
}

pub fn i64_const(v: i64) -> Vec<u8> {
    let mut out = vec![0x42];
    leb_i64(v, &mut out);
    out
}

pub fn f64_const(v: f64) -> Vec<u8> {
    let mut out = vec![0x44];
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// Concatenates instruction fragments.
pub fn code(parts: &[&[u8]]) -> Vec<u8> { parts.concat() }

fn name(s: &str, out: &mut Vec<u8>) {
    leb_u32(s.len() as u32, out);
    out.extend_from_slice(s.as_bytes());
}

fn section(id: u8, count: usize, body: Vec<u8>, out: &mut Vec<u8>) {
    if count == 0 { return; }
    let mut content = Vec::new();
    leb_u32(count as u32, &mut content);
    content.extend(body);
    out.push(id);
    leb_u32(content.len() as u32, out);
    out.extend(content);
}

struct Func {
    type_idx: u32,
    locals: Vec<u8>,
    body: Vec<u8>,
}

#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<(Vec<u8>, Vec<u8>)>,
    imports: Vec<(String, String, u32)>,
    funcs: Vec<Func>,
    table: Option<u32>,
    memory: Option<(u32, Option<u32>)>,
    globals: Vec<(u8, bool, Vec<u8>)>,
    exports: Vec<(String, u8, u32)>,
    start: Option<u32>,
    elems: Vec<(i32, Vec<u32>)>,
    datas: Vec<(i32, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn ty(&mut self, params: &[u8], results: &[u8]) -> u32 {
        let key = (params.to_vec(), results.to_vec());
        if let Some(i) = self.types.iter().position(|t| *t == key) {
            return i as u32;
        }
        self.types.push(key);
        self.types.len() as u32 - 1
    }

    /// Imports a function; must precede every `func` call.
    pub fn import_func(&mut self, module: &str, field: &str, params: &[u8], results: &[u8]) -> u32 {
        assert!(self.funcs.is_empty(), "imports must come first");
        let type_idx = self.ty(params, results);
        self.imports.push((module.into(), field.into(), type_idx));
        self.imports.len() as u32 - 1
    }

    /// Defines a function; `body` excludes the final `end`.
    pub fn func(&mut self, params: &[u8], results: &[u8], locals: &[u8], body: &[u8]) -> u32 {
        let type_idx = self.ty(params, results);
        self.funcs.push(Func { type_idx, locals: locals.to_vec(), body: body.to_vec() });
        (self.imports.len() + self.funcs.len()) as u32 - 1
    }

    pub fn export_func(&mut self, name: &str, idx: u32) -> &mut Self {
        self.exports.push((name.into(), 0x00, idx));
        self
    }

    pub fn table(&mut self, min: u32) -> &mut Self {
        self.table = Some(min);
        self
    }

    pub fn memory(&mut self, min: u32, max: Option<u32>) -> &mut Self {
        self.memory = Some((min, max));
        self
    }

    pub fn export_memory(&mut self, name: &str) -> &mut Self {
        self.exports.push((name.into(), 0x02, 0));
        self
    }

    /// Adds a global initialized by `init` (a constant instruction without `end`).
    pub fn global(&mut self, ty: u8, mutable: bool, init: &[u8]) -> u32 {
        self.globals.push((ty, mutable, init.to_vec()));
        self.globals.len() as u32 - 1
    }

    pub fn export_global(&mut self, name: &str, idx: u32) -> &mut Self {
        self.exports.push((name.into(), 0x03, idx));
        self
    }

    pub fn start(&mut self, idx: u32) -> &mut Self {
        self.start = Some(idx);
        self
    }

    pub fn elem(&mut self, offset: i32, funcs: &[u32]) -> &mut Self {
        self.elems.push((offset, funcs.to_vec()));
        self
    }

    pub fn data(&mut self, offset: i32, bytes: &[u8]) -> &mut Self {
        self.datas.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"\0asm".to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());

        let mut body = Vec::new();
        for (params, results) in &self.types {
            body.push(0x60);
            leb_u32(params.len() as u32, &mut body);
            body.extend(params);
            leb_u32(results.len() as u32, &mut body);
            body.extend(results);
        }
        section(1, self.types.len(), body, &mut out);

        let mut body = Vec::new();
        for (module, field, type_idx) in &self.imports {
            name(module, &mut body);
            name(field, &mut body);
            body.push(0x00);
            leb_u32(*type_idx, &mut body);
        }
        section(2, self.imports.len(), body, &mut out);

        let mut body = Vec::new();
        for f in &self.funcs {
            leb_u32(f.type_idx, &mut body);
        }
        section(3, self.funcs.len(), body, &mut out);

        if let Some(min) = self.table {
            let mut body = vec![FUNCREF, 0x00];
            leb_u32(min, &mut body);
            section(4, 1, body, &mut out);
        }

        if let Some((min, max)) = self.memory {
            let mut body = Vec::new();
            match max {
                Some(max) => {
                    body.push(0x01);
                    leb_u32(min, &mut body);
                    leb_u32(max, &mut body);
                }
                None => {
                    body.push(0x00);
                    leb_u32(min, &mut body);
                }
            }
            section(5, 1, body, &mut out);
        }

        let mut body = Vec::new();
        for (ty, mutable, init) in &self.globals {
            body.push(*ty);
            body.push(*mutable as u8);
            body.extend(init);
            body.push(0x0b);
        }
        section(6, self.globals.len(), body, &mut out);

        let mut body = Vec::new();
        for (field, kind, idx) in &self.exports {
            name(field, &mut body);
            body.push(*kind);
            leb_u32(*idx, &mut body);
        }
        section(7, self.exports.len(), body, &mut out);

        if let Some(start) = self.start {
            let mut content = Vec::new();
            leb_u32(start, &mut content);
            out.push(8);
            leb_u32(content.len() as u32, &mut out);
            out.extend(content);
        }

        let mut body = Vec::new();
        for (offset, funcs) in &self.elems {
            body.push(0x00);
            body.extend(i32_const(*offset));
            body.push(0x0b);
            leb_u32(funcs.len() as u32, &mut body);
            for f in funcs {
                leb_u32(*f, &mut body);
            }
        }
        section(9, self.elems.len(), body, &mut out);

        let mut body = Vec::new();
        for f in &self.funcs {
            let mut func = Vec::new();
            leb_u32(f.locals.len() as u32, &mut func);
            for local in &f.locals {
                func.push(0x01);
                func.push(*local);
            }
            func.extend(&f.body);
            func.push(0x0b);
            leb_u32(func.len() as u32, &mut body);
            body.extend(func);
        }
        section(10, self.funcs.len(), body, &mut out);

        let mut body = Vec::new();
        for (offset, bytes) in &self.datas {
            body.push(0x00);
            body.extend(i32_const(*offset));
            body.push(0x0b);
            leb_u32(bytes.len() as u32, &mut body);
            body.extend(bytes);
        }
        section(11, self.datas.len(), body, &mut out);

        out
    }
}

/// `add(i32, i32) -> i32`, exported as "add".
pub fn add_module() -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let add = b.func(&[I32, I32], &[I32], &[], &[0x20, 0x00, 0x20, 0x01, 0x6a]);
    b.export_func("add", add);
    b.build()
}
