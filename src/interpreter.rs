use std::rc::Rc;
use std::time::Instant;

use paste::paste;

#[cfg(feature = "wasm_debug")]
use crate::debug_println;
use crate::error::*;
use crate::import::{CallingFrame, HostFunction};
use crate::instance::{FuncKind, FunctionInstance, ModuleInstance};
use crate::leb128::{read_leb128, read_sleb128};
use crate::module::Module;
use crate::statistics::Statistics;
use crate::store::Store;
use crate::value::{RawValue, Value};

/// Upper bound on nested calls before `call stack exhausted` is raised.
pub const MAX_CALL_DEPTH: usize = 10_000;

#[derive(Clone, Copy, Debug)]
struct Label {
    /// Operand stack height below the label's parameters.
    height: usize,
    /// Number of values a branch to this label carries.
    arity: usize,
    /// Where a branch continues: past `end` for blocks, the `loop` opcode for loops.
    cont: usize,
}

struct Frame {
    inst: Rc<ModuleInstance>,
    code: Rc<Module>,
    /// Saved program counter while a callee runs.
    pc: usize,
    locals_base: usize,
    label_base: usize,
    arity: usize,
}

/// Stack machine shared by every invocation of one VM.
#[derive(Default)]
pub struct Interpreter {
    stack: Vec<RawValue>,
    labels: Vec<Label>,
    frames: Vec<Frame>,
}

impl Interpreter {
    pub fn new() -> Self { Self::default() }

    /// Calls `func` with typed arguments and returns its typed results.
    pub fn invoke(
        &mut self,
        store: &Store,
        func: &FunctionInstance,
        args: &[Value],
        stat: &mut Statistics,
    ) -> Result<Vec<Value>, Error> {
        let params = &func.ty.params;
        if args.len() != params.len() || args.iter().zip(params).any(|(a, t)| a.ty() != *t) {
            return Err(Error::SignatureMismatch);
        }
        self.reset();
        self.stack.extend(args.iter().map(|v| v.to_raw()));

        let host_before = stat.host_time;
        let start = Instant::now();
        let res = match self.enter(func, None, 0, stat) {
            Ok(true) => self.run(store, stat),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        let host_spent = stat.host_time.saturating_sub(host_before);
        stat.wasm_time += start.elapsed().saturating_sub(host_spent);

        if let Err(e) = res {
            self.reset();
            return Err(e);
        }
        let n = func.ty.results.len();
        let base = self.stack.len().checked_sub(n).ok_or(Error::Trap(STACK_UNDERFLOW))?;
        let results = self.stack[base..]
            .iter()
            .zip(&func.ty.results)
            .map(|(raw, ty)| Value::from_raw(*raw, *ty))
            .collect();
        self.reset();
        Ok(results)
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.labels.clear();
        self.frames.clear();
    }

    /// Pushes a frame for a guest function, or runs a host function to
    /// completion. Returns true when a new frame must be executed.
    fn enter(
        &mut self,
        f: &FunctionInstance,
        caller: Option<&ModuleInstance>,
        return_pc: usize,
        stat: &mut Statistics,
    ) -> Result<bool, Error> {
        match &f.kind {
            FuncKind::Host(host) => {
                self.call_host(host, caller, stat)?;
                Ok(false)
            }
            FuncKind::Wasm { module, code, def_idx } => {
                let inst = module.upgrade().ok_or(Error::Trap(FUNC_NO_IMPL))?;
                if self.frames.len() >= MAX_CALL_DEPTH { return trap(STACK_EXHAUSTED); }
                let body = code.functions.get(*def_idx).ok_or(Error::Trap(FUNC_NO_IMPL))?;
                let locals_base = self.stack.len().checked_sub(f.ty.params.len()).ok_or(Error::Trap(STACK_UNDERFLOW))?;
                self.stack.resize(self.stack.len() + body.locals.len(), RawValue::default());
                if let Some(cur) = self.frames.last_mut() { cur.pc = return_pc; }
                debug_println!("[exec] enter func addr={} depth={} pc={}", f.addr, self.frames.len() + 1, body.body.start);
                self.frames.push(Frame {
                    inst,
                    code: code.clone(),
                    pc: body.body.start,
                    locals_base,
                    label_base: self.labels.len(),
                    arity: f.ty.results.len(),
                });
                Ok(true)
            }
        }
    }

    fn call_host(&mut self, host: &HostFunction, caller: Option<&ModuleInstance>, stat: &mut Statistics) -> Result<(), Error> {
        let ty = host.ty();
        let base = self.stack.len().checked_sub(ty.params.len()).ok_or(Error::Trap(STACK_UNDERFLOW))?;
        let args: Vec<Value> = self.stack[base..].iter().zip(&ty.params).map(|(raw, t)| Value::from_raw(*raw, *t)).collect();
        self.stack.truncate(base);

        let frame = CallingFrame::new(caller.and_then(|m| m.memories.first().cloned()));
        let start = Instant::now();
        let res = host.call(&frame, &args);
        stat.host_time += start.elapsed();
        stat.host_call_count += 1;

        let results = res?;
        if results.len() != ty.results.len() || results.iter().zip(&ty.results).any(|(v, t)| v.ty() != *t) {
            return trap(HOST_RESULT_MISMATCH);
        }
        self.stack.extend(results.iter().map(|v| v.to_raw()));
        Ok(())
    }

    /// Pops the current frame and moves its results to where its locals began.
    fn leave(&mut self) {
        if let Some(frame) = self.frames.pop() {
            let top = self.stack.len();
            let arity = frame.arity;
            if top - arity > frame.locals_base {
                self.stack.copy_within(top - arity..top, frame.locals_base);
            }
            self.stack.truncate(frame.locals_base + arity);
            self.labels.truncate(frame.label_base);
        }
    }

    /// Returns true when the branch targets the function body itself.
    #[inline]
    fn branch(&mut self, depth: u32, label_base: usize, pc: &mut usize) -> bool {
        let n = self.labels.len() - label_base;
        if depth as usize >= n { return true; }
        let idx = self.labels.len() - 1 - depth as usize;
        let Label { height, arity, cont } = self.labels[idx];
        let top = self.stack.len();
        if arity > 0 && top - arity > height {
            self.stack.copy_within(top - arity..top, height);
        }
        self.stack.truncate(height + arity);
        self.labels.truncate(idx);
        *pc = cont;
        false
    }

    fn run(&mut self, store: &Store, stat: &mut Statistics) -> Result<(), Error> {
        let mut instrs: u64 = 0;
        let res = self.run_frames(store, stat, &mut instrs);
        stat.instr_count += instrs;
        res
    }

    fn run_frames(&mut self, store: &Store, stat: &mut Statistics, instrs: &mut u64) -> Result<(), Error> {
        'frames: loop {
            let Some(frame) = self.frames.last() else { return Ok(()); };
            let inst = frame.inst.clone();
            let code = frame.code.clone();
            let mut pc = frame.pc;
            let locals_base = frame.locals_base;
            let label_base = frame.label_base;
            let bytes: &[u8] = &code.bytes;
            let mem = inst.memories.first().cloned();

            macro_rules! next_op { () => {{ let byte = bytes[pc]; pc += 1; byte }} }
            macro_rules! imm { () => { read_leb128(bytes, &mut pc)? } }
            macro_rules! pop_val { () => {{
                match self.stack.pop() { Some(v) => v, None => return trap(STACK_UNDERFLOW) }
            }} }
            macro_rules! block_info { () => {
                *code.blocks.get(&pc).ok_or(Error::Malformed(END_EXPECTED))?
            } }
            macro_rules! memory { () => {
                mem.as_ref().ok_or(Error::Validation(UNKNOWN_MEMORY))?
            } }
            macro_rules! binary {
                ($type:ident, $op:tt) => {{
                    paste! {
                        let b = pop_val!().[<as_ $type>]();
                        let a = pop_val!().[<as_ $type>]();
                        self.stack.push(RawValue::[<from_ $type>](a $op b));
                    }
                }};
                ($type:ident, .$method:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $type>]();
                        let a = pop_val!().[<as_ $type>]();
                        self.stack.push(RawValue::[<from_ $type>](a.$method(b)));
                    }
                }};
            }
            macro_rules! compare {
                ($type:ident, $op:tt) => {{
                    paste! {
                        let b = pop_val!().[<as_ $type>]();
                        let a = pop_val!().[<as_ $type>]();
                        self.stack.push(RawValue::from_u32((a $op b) as u32));
                    }
                }};
            }
            macro_rules! shift {
                (u32, $op:tt) => {{
                    let b = pop_val!().as_u32() % 32;
                    let a = pop_val!().as_u32();
                    self.stack.push(RawValue::from_u32(a $op b));
                }};
                (u64, $op:tt) => {{
                    let b = pop_val!().as_u64() % 64;
                    let a = pop_val!().as_u64();
                    self.stack.push(RawValue::from_u64(a $op b));
                }};
            }
            macro_rules! rotate {
                (u32, $dir:ident) => {{
                    let b = pop_val!().as_u32();
                    let a = pop_val!().as_u32();
                    paste! { self.stack.push(RawValue::from_u32(a.[<rotate_ $dir>](b % 32))); }
                }};
                (u64, $dir:ident) => {{
                    let b = pop_val!().as_u64();
                    let a = pop_val!().as_u64();
                    paste! { self.stack.push(RawValue::from_u64(a.[<rotate_ $dir>]((b % 64) as u32))); }
                }};
            }
            macro_rules! unary {
                ($type:ident, $f:expr) => {{
                    paste! {
                        let a = pop_val!().[<as_ $type>]();
                        self.stack.push(RawValue::[<from_ $type>]($f(a)));
                    }
                }};
            }
            macro_rules! minmax {
                ($type:ident, min) => {{ minmax!(@impl $type, min, true) }};
                ($type:ident, max) => {{ minmax!(@impl $type, max, false) }};
                (@impl $type:ident, $op:ident, $want_negative:literal) => {{
                    paste! {
                        let b = pop_val!().[<as_ $type>]();
                        let a = pop_val!().[<as_ $type>]();
                        let result = if a.is_nan() {
                            a
                        } else if b.is_nan() {
                            b
                        } else if a == b && a == 0.0 {
                            const SIGN_BIT_SHIFT: usize = std::mem::size_of::<$type>() * 8 - 1;
                            let a_has_sign = a.to_bits() >> SIGN_BIT_SHIFT != 0;
                            if a_has_sign == $want_negative { a } else { b }
                        } else {
                            a.$op(b)
                        };
                        self.stack.push(RawValue::[<from_ $type>](result));
                    }
                }};
            }
            macro_rules! shr_s {
                ($int_type:ident, $uint_type:ident, $bits:literal) => {{
                    paste! {
                        let b = pop_val!().[<as_ $uint_type>]() % $bits;
                        let a = pop_val!().[<as_ $int_type>]();
                        self.stack.push(RawValue::[<from_ $int_type>](a >> b));
                    }
                }};
            }
            macro_rules! copysign {
                ($type:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $type>]();
                        let a = pop_val!().[<as_ $type>]();
                        self.stack.push(RawValue::[<from_ $type>](a.copysign(b)));
                    }
                }};
            }
            macro_rules! nearest {
                ($type:ident) => {{
                    paste! {
                        let x = pop_val!().[<as_ $type>]();
                        let y = if x.is_nan() || x.is_infinite() {
                            x
                        } else {
                            let lower = x.floor();
                            let upper = x.ceil();
                            let dl = x - lower;
                            let du = upper - x;
                            if dl < du {
                                lower
                            } else if dl > du {
                                upper
                            } else if (lower % 2.0) == 0.0 {
                                lower
                            } else {
                                upper
                            }
                        };
                        // Keep the sign of negative inputs that round to zero.
                        self.stack.push(RawValue::[<from_ $type>](y.copysign(x)));
                    }
                }};
            }
            macro_rules! convert {
                ($src_type:ident -> $dst_type:ident) => {{
                    paste! {
                        let v = pop_val!().[<as_ $src_type>]();
                        self.stack.push(RawValue::[<from_ $dst_type>](v as $dst_type));
                    }
                }};
            }
            macro_rules! trunc {
                ($src_type:ident -> $dst_type:ident : $min:expr, $max:expr) => {{
                    paste! {
                        let x = pop_val!().[<as_ $src_type>]();
                        if x.is_nan() { return trap(INVALID_CONV_TO_INT); }
                        if x <= $min || x >= $max { return trap(INTEGER_OVERFLOW); }
                        self.stack.push(RawValue::[<from_ $dst_type>](x as $dst_type));
                    }
                }};
            }
            macro_rules! div_s {
                ($int_type:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $int_type>]();
                        let a = pop_val!().[<as_ $int_type>]();
                        if b == 0 { return trap(DIVIDE_BY_ZERO); }
                        if a == $int_type::MIN && b == -1 { return trap(INTEGER_OVERFLOW); }
                        self.stack.push(RawValue::[<from_ $int_type>](a / b));
                    }
                }};
            }
            macro_rules! div_u {
                ($uint_type:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $uint_type>]();
                        let a = pop_val!().[<as_ $uint_type>]();
                        if b == 0 { return trap(DIVIDE_BY_ZERO); }
                        self.stack.push(RawValue::[<from_ $uint_type>](a / b));
                    }
                }};
            }
            macro_rules! rem_s {
                ($int_type:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $int_type>]();
                        let a = pop_val!().[<as_ $int_type>]();
                        if b == 0 { return trap(DIVIDE_BY_ZERO); }
                        self.stack.push(RawValue::[<from_ $int_type>](a.wrapping_rem(b)));
                    }
                }};
            }
            macro_rules! rem_u {
                ($uint_type:ident) => {{
                    paste! {
                        let b = pop_val!().[<as_ $uint_type>]();
                        let a = pop_val!().[<as_ $uint_type>]();
                        if b == 0 { return trap(DIVIDE_BY_ZERO); }
                        self.stack.push(RawValue::[<from_ $uint_type>](a % b));
                    }
                }};
            }
            macro_rules! load { ($method:ident, $push:expr) => {{
                let _align: u32 = imm!();
                let offset: u32 = imm!();
                let addr = pop_val!().as_u32();
                let v = memory!().borrow().$method(addr, offset).map_err(Error::Trap)?;
                self.stack.push(($push)(v));
            }}}
            macro_rules! store { ($method:ident, $from:expr) => {{
                let _align: u32 = imm!();
                let offset: u32 = imm!();
                let raw = pop_val!();
                let addr = pop_val!().as_u32();
                let val = ($from)(raw);
                memory!().borrow_mut().$method(addr, offset, val).map_err(Error::Trap)?;
            }}}

            loop {
                *instrs += 1;
                match next_op!() {
                    0x00 => return trap(UNREACHABLE),
                    0x01 | 0xbc | 0xbd | 0xbe | 0xbf => {} // nop and reinterprets (no-op on raw bits)
                    0x02 => { // block
                        let info = block_info!();
                        let height = self.stack.len() - info.params as usize;
                        self.labels.push(Label { height, arity: info.results as usize, cont: info.end });
                        pc = info.body;
                    }
                    0x03 => { // loop
                        let loop_op_pc = pc - 1;
                        let info = block_info!();
                        let height = self.stack.len() - info.params as usize;
                        self.labels.push(Label { height, arity: info.params as usize, cont: loop_op_pc });
                        pc = info.body;
                    }
                    0x04 => { // if
                        let info = block_info!();
                        let cond = pop_val!().as_u32();
                        let height = self.stack.len() - info.params as usize;
                        let label = Label { height, arity: info.results as usize, cont: info.end };
                        if cond != 0 {
                            self.labels.push(label);
                            pc = info.body;
                        } else if let Some(else_pc) = info.else_pc {
                            self.labels.push(label);
                            pc = else_pc;
                        } else {
                            pc = info.end;
                        }
                    }
                    0x05 => { // else: the then-arm finished, skip the else-arm
                        if let Some(label) = self.labels.pop() { pc = label.cont; }
                    }
                    0x0b => { // end
                        if self.labels.len() == label_base {
                            self.leave();
                            continue 'frames;
                        }
                        self.labels.pop();
                    }
                    0x0c => { // br
                        let depth: u32 = imm!();
                        if self.branch(depth, label_base, &mut pc) {
                            self.leave();
                            continue 'frames;
                        }
                    }
                    0x0d => { // br_if
                        let depth: u32 = imm!();
                        let cond = pop_val!().as_u32();
                        if cond != 0 && self.branch(depth, label_base, &mut pc) {
                            self.leave();
                            continue 'frames;
                        }
                    }
                    0x0e => { // br_table
                        let v = pop_val!().as_u32();
                        let n_targets: u32 = imm!();
                        let mut depth = u32::MAX;
                        for i in 0..n_targets {
                            let t: u32 = imm!();
                            if i == v { depth = t; }
                        }
                        let default_t: u32 = imm!();
                        if depth == u32::MAX { depth = default_t; }
                        if self.branch(depth, label_base, &mut pc) {
                            self.leave();
                            continue 'frames;
                        }
                    }
                    0x0f => { // return
                        self.leave();
                        continue 'frames;
                    }
                    0x10 => { // call
                        let fi: u32 = imm!();
                        let f = inst.functions.get(fi as usize).cloned().ok_or(Error::Trap(FUNC_NO_IMPL))?;
                        if self.enter(&f, Some(&inst), pc, stat)? { continue 'frames; }
                    }
                    0x11 => { // call_indirect
                        let type_idx: u32 = imm!();
                        let table_idx: u32 = imm!();
                        let elem_idx = pop_val!().as_u32();
                        let table = inst.tables.get(table_idx as usize).ok_or(Error::Trap(UNDEF_ELEM))?;
                        let func_ref = table.borrow().get(elem_idx).map_err(|_| Error::Trap(UNDEF_ELEM))?;
                        if func_ref.is_null_ref() { return trap(UNINITIALIZED_ELEM); }
                        let callee = store.function(func_ref.as_func_idx()).ok_or(Error::Trap(FUNC_NO_IMPL))?;
                        let expected = code.types.get(type_idx as usize).ok_or(Error::Trap(INDIRECT_CALL_MISMATCH))?;
                        if callee.ty != *expected { return trap(INDIRECT_CALL_MISMATCH); }
                        if self.enter(&callee, Some(&inst), pc, stat)? { continue 'frames; }
                    }
                    // Parametric instructions
                    0x1a => { pop_val!(); } // drop
                    0x1b | 0x1c => { // select, select t*
                        if bytes[pc - 1] == 0x1c {
                            let n: u32 = imm!();
                            pc += n as usize;
                        }
                        let cond = pop_val!().as_u32();
                        let v2 = pop_val!();
                        let v1 = pop_val!();
                        self.stack.push(if cond != 0 { v1 } else { v2 });
                    }
                    // Variable instructions
                    0x20 => { // local.get
                        let local: u32 = imm!();
                        let v = self.stack[locals_base + local as usize];
                        self.stack.push(v);
                    }
                    0x21 => { // local.set
                        let local: u32 = imm!();
                        let v = pop_val!();
                        self.stack[locals_base + local as usize] = v;
                    }
                    0x22 => { // local.tee
                        let local: u32 = imm!();
                        let v = match self.stack.last() { Some(v) => *v, None => return trap(STACK_UNDERFLOW) };
                        self.stack[locals_base + local as usize] = v;
                    }
                    0x23 => { // global.get
                        let gi: u32 = imm!();
                        self.stack.push(inst.globals[gi as usize].value.get());
                    }
                    0x24 => { // global.set
                        let gi: u32 = imm!();
                        let v = pop_val!();
                        inst.globals[gi as usize].value.set(v);
                    }
                    // Table instructions
                    0x25 => { // table.get
                        let ti: u32 = imm!();
                        let i = pop_val!().as_u32();
                        let v = inst.tables[ti as usize].borrow().get(i).map_err(Error::Trap)?;
                        self.stack.push(v);
                    }
                    0x26 => { // table.set
                        let ti: u32 = imm!();
                        let v = pop_val!();
                        let i = pop_val!().as_u32();
                        inst.tables[ti as usize].borrow_mut().set(i, v).map_err(Error::Trap)?;
                    }
                    // Memory instructions - loads
                    0x28 => { load!(load_u32, |v: u32| RawValue::from_u32(v)); }
                    0x29 => { load!(load_u64, |v: u64| RawValue::from_u64(v)); }
                    0x2a => { load!(load_u32, |v: u32| RawValue::from_f32_bits(v)); }
                    0x2b => { load!(load_u64, |v: u64| RawValue::from_f64_bits(v)); }
                    0x2c => { load!(load_i8,  |v: i8| RawValue::from_i32(v as i32)); }
                    0x2d => { load!(load_u8,  |v: u8| RawValue::from_u32(v as u32)); }
                    0x2e => { load!(load_i16, |v: i16| RawValue::from_i32(v as i32)); }
                    0x2f => { load!(load_u16, |v: u16| RawValue::from_u32(v as u32)); }
                    0x30 => { load!(load_i8,  |v: i8| RawValue::from_i64(v as i64)); }
                    0x31 => { load!(load_u8,  |v: u8| RawValue::from_u64(v as u64)); }
                    0x32 => { load!(load_i16, |v: i16| RawValue::from_i64(v as i64)); }
                    0x33 => { load!(load_u16, |v: u16| RawValue::from_u64(v as u64)); }
                    0x34 => { load!(load_i32, |v: i32| RawValue::from_i64(v as i64)); }
                    0x35 => { load!(load_u32, |v: u32| RawValue::from_u64(v as u64)); }
                    // Memory instructions - stores
                    0x36 => { store!(store_u32, |w: RawValue| w.as_u32()); }
                    0x37 => { store!(store_u64, |w: RawValue| w.as_u64()); }
                    0x38 => { store!(store_u32, |w: RawValue| w.as_f32_bits()); }
                    0x39 => { store!(store_u64, |w: RawValue| w.as_f64_bits()); }
                    0x3a => { store!(store_u8,  |w: RawValue| w.as_u32() as u8); }
                    0x3b => { store!(store_u16, |w: RawValue| w.as_u32() as u16); }
                    0x3c => { store!(store_u8,  |w: RawValue| w.as_u64() as u8); }
                    0x3d => { store!(store_u16, |w: RawValue| w.as_u64() as u16); }
                    0x3e => { store!(store_u32, |w: RawValue| w.as_u64() as u32); }
                    // Memory instructions - size/grow
                    0x3f => { // memory.size
                        pc += 1; // Skip zero flag
                        let size = memory!().borrow().size();
                        self.stack.push(RawValue::from_u32(size));
                    }
                    0x40 => { // memory.grow
                        pc += 1; // Skip zero flag
                        let delta = pop_val!().as_u32();
                        let old = memory!().borrow_mut().grow(delta);
                        self.stack.push(RawValue::from_u32(old));
                    }
                    // Numeric instructions - constants
                    0x41 => { // i32.const
                        self.stack.push(RawValue::from_i32(read_sleb128::<i32>(bytes, &mut pc)?));
                    }
                    0x42 => { // i64.const
                        self.stack.push(RawValue::from_i64(read_sleb128::<i64>(bytes, &mut pc)?));
                    }
                    0x43 => { // f32.const
                        let mut buf = [0u8; 4];
                        buf.copy_from_slice(&bytes[pc..pc + 4]);
                        self.stack.push(RawValue::from_f32_bits(u32::from_le_bytes(buf)));
                        pc += 4;
                    }
                    0x44 => { // f64.const
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(&bytes[pc..pc + 8]);
                        self.stack.push(RawValue::from_f64_bits(u64::from_le_bytes(buf)));
                        pc += 8;
                    }
                    // Numeric instructions - i32 comparison
                    0x45 => { unary!(u32, |x: u32| (x == 0) as u32); } // i32.eqz
                    0x46 => { compare!(u32, ==); } // i32.eq
                    0x47 => { compare!(u32, !=); } // i32.ne
                    0x48 => { compare!(i32, <); } // i32.lt_s
                    0x49 => { compare!(u32, <); } // i32.lt_u
                    0x4a => { compare!(i32, >); } // i32.gt_s
                    0x4b => { compare!(u32, >); } // i32.gt_u
                    0x4c => { compare!(i32, <=); } // i32.le_s
                    0x4d => { compare!(u32, <=); } // i32.le_u
                    0x4e => { compare!(i32, >=); } // i32.ge_s
                    0x4f => { compare!(u32, >=); } // i32.ge_u
                    // Numeric instructions - i64 comparison
                    0x50 => { // i64.eqz
                        let v = pop_val!().as_u64();
                        self.stack.push(RawValue::from_u32((v == 0) as u32));
                    }
                    0x51 => { compare!(i64, ==); } // i64.eq
                    0x52 => { compare!(i64, !=); } // i64.ne
                    0x53 => { compare!(i64, <); } // i64.lt_s
                    0x54 => { compare!(u64, <); } // i64.lt_u
                    0x55 => { compare!(i64, >); } // i64.gt_s
                    0x56 => { compare!(u64, >); } // i64.gt_u
                    0x57 => { compare!(i64, <=); } // i64.le_s
                    0x58 => { compare!(u64, <=); } // i64.le_u
                    0x59 => { compare!(i64, >=); } // i64.ge_s
                    0x5a => { compare!(u64, >=); } // i64.ge_u
                    // Numeric instructions - f32 comparison
                    0x5b => { compare!(f32, ==); } // f32.eq
                    0x5c => { compare!(f32, !=); } // f32.ne
                    0x5d => { compare!(f32, <); } // f32.lt
                    0x5e => { compare!(f32, >); } // f32.gt
                    0x5f => { compare!(f32, <=); } // f32.le
                    0x60 => { compare!(f32, >=); } // f32.ge
                    // Numeric instructions - f64 comparison
                    0x61 => { compare!(f64, ==); } // f64.eq
                    0x62 => { compare!(f64, !=); } // f64.ne
                    0x63 => { compare!(f64, <); } // f64.lt
                    0x64 => { compare!(f64, >); } // f64.gt
                    0x65 => { compare!(f64, <=); } // f64.le
                    0x66 => { compare!(f64, >=); } // f64.ge
                    // Numeric instructions - i32 operations
                    0x67 => { unary!(u32, |x: u32| x.leading_zeros()); } // i32.clz
                    0x68 => { unary!(u32, |x: u32| x.trailing_zeros()); } // i32.ctz
                    0x69 => { unary!(u32, |x: u32| x.count_ones()); } // i32.popcnt
                    0x6a => { binary!(u32, .wrapping_add); } // i32.add
                    0x6b => { binary!(u32, .wrapping_sub); } // i32.sub
                    0x6c => { binary!(u32, .wrapping_mul); } // i32.mul
                    0x6d => { div_s!(i32); } // i32.div_s
                    0x6e => { div_u!(u32); } // i32.div_u
                    0x6f => { rem_s!(i32); } // i32.rem_s
                    0x70 => { rem_u!(u32); } // i32.rem_u
                    0x71 => { binary!(u32, &); } // i32.and
                    0x72 => { binary!(u32, |); } // i32.or
                    0x73 => { binary!(u32, ^); } // i32.xor
                    0x74 => { shift!(u32, <<); } // i32.shl
                    0x75 => { shr_s!(i32, u32, 32); } // i32.shr_s
                    0x76 => { shift!(u32, >>); } // i32.shr_u
                    0x77 => { rotate!(u32, left); } // i32.rotl
                    0x78 => { rotate!(u32, right); } // i32.rotr
                    // Numeric instructions - i64 operations
                    0x79 => { unary!(u64, |x: u64| x.leading_zeros() as u64); } // i64.clz
                    0x7a => { unary!(u64, |x: u64| x.trailing_zeros() as u64); } // i64.ctz
                    0x7b => { unary!(u64, |x: u64| x.count_ones() as u64); } // i64.popcnt
                    0x7c => { binary!(u64, .wrapping_add); } // i64.add
                    0x7d => { binary!(u64, .wrapping_sub); } // i64.sub
                    0x7e => { binary!(u64, .wrapping_mul); } // i64.mul
                    0x7f => { div_s!(i64); } // i64.div_s
                    0x80 => { div_u!(u64); } // i64.div_u
                    0x81 => { rem_s!(i64); } // i64.rem_s
                    0x82 => { rem_u!(u64); } // i64.rem_u
                    0x83 => { binary!(u64, &); } // i64.and
                    0x84 => { binary!(u64, |); } // i64.or
                    0x85 => { binary!(u64, ^); } // i64.xor
                    0x86 => { shift!(u64, <<); } // i64.shl
                    0x87 => { shr_s!(i64, u64, 64); } // i64.shr_s
                    0x88 => { shift!(u64, >>); } // i64.shr_u
                    0x89 => { rotate!(u64, left); } // i64.rotl
                    0x8a => { rotate!(u64, right); } // i64.rotr
                    // Numeric instructions - f32 operations
                    0x8b => { unary!(f32, |x: f32| x.abs()); } // f32.abs
                    0x8c => { unary!(f32, |x: f32| -x); } // f32.neg
                    0x8d => { unary!(f32, |x: f32| x.ceil()); } // f32.ceil
                    0x8e => { unary!(f32, |x: f32| x.floor()); } // f32.floor
                    0x8f => { unary!(f32, |x: f32| x.trunc()); } // f32.trunc
                    0x90 => { nearest!(f32); } // f32.nearest
                    0x91 => { unary!(f32, |x: f32| x.sqrt()); } // f32.sqrt
                    0x92 => { binary!(f32, +); } // f32.add
                    0x93 => { binary!(f32, -); } // f32.sub
                    0x94 => { binary!(f32, *); } // f32.mul
                    0x95 => { binary!(f32, /); } // f32.div
                    0x96 => { minmax!(f32, min); } // f32.min
                    0x97 => { minmax!(f32, max); } // f32.max
                    0x98 => { copysign!(f32); } // f32.copysign
                    // Numeric instructions - f64 operations
                    0x99 => { unary!(f64, |x: f64| x.abs()); } // f64.abs
                    0x9a => { unary!(f64, |x: f64| -x); } // f64.neg
                    0x9b => { unary!(f64, |x: f64| x.ceil()); } // f64.ceil
                    0x9c => { unary!(f64, |x: f64| x.floor()); } // f64.floor
                    0x9d => { unary!(f64, |x: f64| x.trunc()); } // f64.trunc
                    0x9e => { nearest!(f64); } // f64.nearest
                    0x9f => { unary!(f64, |x: f64| x.sqrt()); } // f64.sqrt
                    0xa0 => { binary!(f64, +); } // f64.add
                    0xa1 => { binary!(f64, -); } // f64.sub
                    0xa2 => { binary!(f64, *); } // f64.mul
                    0xa3 => { binary!(f64, /); } // f64.div
                    0xa4 => { minmax!(f64, min); } // f64.min
                    0xa5 => { minmax!(f64, max); } // f64.max
                    0xa6 => { copysign!(f64); } // f64.copysign
                    // Conversions and truncations
                    0xa7 => { convert!(u64 -> u32); } // i32.wrap_i64
                    0xa8 => { trunc!(f32 -> i32 : -2147483777.0, 2147483648.0); } // i32.trunc_f32_s
                    0xa9 => { trunc!(f32 -> u32 : -1.0, 4294967296.0); } // i32.trunc_f32_u
                    0xaa => { trunc!(f64 -> i32 : -2147483649.0, 2147483648.0); } // i32.trunc_f64_s
                    0xab => { trunc!(f64 -> u32 : -1.0, 4294967296.0); } // i32.trunc_f64_u
                    0xac => { convert!(i32 -> i64); } // i64.extend_i32_s
                    0xad => { convert!(u32 -> u64); } // i64.extend_i32_u
                    0xae => { trunc!(f32 -> i64 : -9223373136366404000.0, 9223372036854776000.0); } // i64.trunc_f32_s
                    0xaf => { trunc!(f32 -> u64 : -1.0, 18446744073709552000.0); } // i64.trunc_f32_u
                    0xb0 => { trunc!(f64 -> i64 : -9223372036854777856.0, 9223372036854776000.0); } // i64.trunc_f64_s
                    0xb1 => { trunc!(f64 -> u64 : -1.0, 18446744073709552000.0); } // i64.trunc_f64_u
                    // Float conversions from integers
                    0xb2 => { convert!(i32 -> f32); } // f32.convert_i32_s
                    0xb3 => { convert!(u32 -> f32); } // f32.convert_i32_u
                    0xb4 => { convert!(i64 -> f32); } // f32.convert_i64_s
                    0xb5 => { convert!(u64 -> f32); } // f32.convert_i64_u
                    0xb6 => { convert!(f64 -> f32); } // f32.demote_f64
                    0xb7 => { convert!(i32 -> f64); } // f64.convert_i32_s
                    0xb8 => { convert!(u32 -> f64); } // f64.convert_i32_u
                    0xb9 => { convert!(i64 -> f64); } // f64.convert_i64_s
                    0xba => { convert!(u64 -> f64); } // f64.convert_i64_u
                    0xbb => { convert!(f32 -> f64); } // f64.promote_f32
                    // Sign extension
                    0xc0 => { unary!(i32, |x: i32| x as i8 as i32); } // i32.extend8_s
                    0xc1 => { unary!(i32, |x: i32| x as i16 as i32); } // i32.extend16_s
                    0xc2 => { unary!(i64, |x: i64| x as i8 as i64); } // i64.extend8_s
                    0xc3 => { unary!(i64, |x: i64| x as i16 as i64); } // i64.extend16_s
                    0xc4 => { unary!(i64, |x: i64| x as i32 as i64); } // i64.extend32_s
                    // Reference instructions
                    0xd0 => { // ref.null
                        pc += 1;
                        self.stack.push(RawValue::null_ref());
                    }
                    0xd1 => { // ref.is_null
                        let r = pop_val!();
                        self.stack.push(RawValue::from_u32(r.is_null_ref() as u32));
                    }
                    0xd2 => { // ref.func
                        let fi: u32 = imm!();
                        self.stack.push(RawValue::from_func_ref(inst.functions[fi as usize].addr));
                    }
                    0xfc => {
                        let sub: u32 = imm!();
                        match sub {
                            0 => { convert!(f32 -> i32); } // i32.trunc_sat_f32_s
                            1 => { convert!(f32 -> u32); } // i32.trunc_sat_f32_u
                            2 => { convert!(f64 -> i32); } // i32.trunc_sat_f64_s
                            3 => { convert!(f64 -> u32); } // i32.trunc_sat_f64_u
                            4 => { convert!(f32 -> i64); } // i64.trunc_sat_f32_s
                            5 => { convert!(f32 -> u64); } // i64.trunc_sat_f32_u
                            6 => { convert!(f64 -> i64); } // i64.trunc_sat_f64_s
                            7 => { convert!(f64 -> u64); } // i64.trunc_sat_f64_u
                            8 => { // memory.init
                                let seg: u32 = imm!();
                                pc += 1;
                                let n = pop_val!().as_u32() as usize;
                                let s = pop_val!().as_u32() as usize;
                                let d = pop_val!().as_u32();
                                let range = inst.datas.borrow()[seg as usize].clone();
                                let data = &bytes[range];
                                let src = data.get(s..s + n).ok_or(Error::Trap(OOB_MEMORY_ACCESS))?;
                                memory!().borrow_mut().write_bytes(d, src).map_err(Error::Trap)?;
                            }
                            9 => { // data.drop
                                let seg: u32 = imm!();
                                inst.datas.borrow_mut()[seg as usize] = 0..0;
                            }
                            10 => { // memory.copy
                                pc += 2;
                                let n = pop_val!().as_u32();
                                let s = pop_val!().as_u32();
                                let d = pop_val!().as_u32();
                                memory!().borrow_mut().copy_within(d, s, n).map_err(Error::Trap)?;
                            }
                            11 => { // memory.fill
                                pc += 1;
                                let n = pop_val!().as_u32();
                                let val = pop_val!().as_u32() as u8;
                                let d = pop_val!().as_u32();
                                memory!().borrow_mut().fill(d, val, n).map_err(Error::Trap)?;
                            }
                            12 => { // table.init
                                let seg: u32 = imm!();
                                let ti: u32 = imm!();
                                let n = pop_val!().as_u32() as usize;
                                let s = pop_val!().as_u32() as usize;
                                let d = pop_val!().as_u32();
                                let elems = inst.elems.borrow();
                                let src = elems[seg as usize].get(s..s + n).ok_or(Error::Trap(OOB_TABLE_ACCESS))?;
                                inst.tables[ti as usize].borrow_mut().init(d, src).map_err(Error::Trap)?;
                            }
                            13 => { // elem.drop
                                let seg: u32 = imm!();
                                inst.elems.borrow_mut()[seg as usize].clear();
                            }
                            14 => { // table.copy
                                let dst: u32 = imm!();
                                let src: u32 = imm!();
                                let n = pop_val!().as_u32();
                                let s = pop_val!().as_u32();
                                let d = pop_val!().as_u32();
                                let (dst, src) = (&inst.tables[dst as usize], &inst.tables[src as usize]);
                                if Rc::ptr_eq(dst, src) {
                                    dst.borrow_mut().copy_within(d, s, n).map_err(Error::Trap)?;
                                } else {
                                    let values = src.borrow().slice(s, n).map_err(Error::Trap)?.to_vec();
                                    dst.borrow_mut().init(d, &values).map_err(Error::Trap)?;
                                }
                            }
                            15 => { // table.grow
                                let ti: u32 = imm!();
                                let n = pop_val!().as_u32();
                                let init = pop_val!();
                                let old = inst.tables[ti as usize].borrow_mut().grow(n, init);
                                self.stack.push(RawValue::from_u32(old));
                            }
                            16 => { // table.size
                                let ti: u32 = imm!();
                                let size = inst.tables[ti as usize].borrow().size();
                                self.stack.push(RawValue::from_u32(size));
                            }
                            17 => { // table.fill
                                let ti: u32 = imm!();
                                let n = pop_val!().as_u32();
                                let v = pop_val!();
                                let i = pop_val!().as_u32();
                                inst.tables[ti as usize].borrow_mut().fill(i, v, n).map_err(Error::Trap)?;
                            }
                            _ => return malformed(ILLEGAL_OPCODE),
                        }
                    }
                    0xfd => {
                        let sub: u32 = imm!();
                        match sub {
                            0 => { load!(load_u128, |v: u128| RawValue::from_u128(v)); } // v128.load
                            11 => { store!(store_u128, |w: RawValue| w.as_u128()); } // v128.store
                            12 => { // v128.const
                                let mut buf = [0u8; 16];
                                buf.copy_from_slice(&bytes[pc..pc + 16]);
                                self.stack.push(RawValue::from_u128(u128::from_le_bytes(buf)));
                                pc += 16;
                            }
                            _ => return malformed(ILLEGAL_OPCODE),
                        }
                    }
                    _ => return malformed(ILLEGAL_OPCODE),
                }
            }
        }
    }
}
