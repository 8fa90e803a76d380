mod common;

use std::rc::Rc;

use common::*;
use wagmi_vm::error::{INDIRECT_CALL_MISMATCH, INTEGER_OVERFLOW, INVALID_CONV_TO_INT, UNDEF_ELEM, UNINITIALIZED_ELEM};
use wagmi_vm::{Configure, Error, Interpreter, Module, ModuleInstance, Statistics, Store, Validator, Value};

struct Harness {
    store: Store,
    interp: Interpreter,
    stat: Statistics,
    inst: Rc<ModuleInstance>,
}

impl Harness {
    fn new(bytes: Vec<u8>) -> Self {
        let conf = Configure::new();
        let mut module = Module::compile(bytes).expect("module should decode");
        Validator::new(&conf).validate(&mut module).expect("module should validate");
        let store = Store::new();
        let mut interp = Interpreter::new();
        let mut stat = Statistics::new();
        let inst = interp.instantiate(&store, Rc::new(module), None, &conf, &mut stat).expect("module should instantiate");
        Self { store, interp, stat, inst }
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let f = self.inst.func(name).cloned().ok_or_else(|| Error::FuncNotFound(name.to_string()))?;
        self.interp.invoke(&self.store, &f, args, &mut self.stat)
    }
}

#[test]
fn loop_with_conditional_exit() {
    let mut b = ModuleBuilder::new();
    // acc += n; n -= 1 until n == 0
    let body = [
        0x02, 0x40, 0x03, 0x40, //
        0x20, 0x00, 0x45, 0x0d, 0x01, //
        0x20, 0x01, 0x20, 0x00, 0x6a, 0x21, 0x01, //
        0x20, 0x00, 0x41, 0x01, 0x6b, 0x21, 0x00, //
        0x0c, 0x00, 0x0b, 0x0b, 0x20, 0x01,
    ];
    let f = b.func(&[I32], &[I32], &[I32], &body);
    b.export_func("sum", f);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("sum", &[Value::I32(0)]), Ok(vec![Value::I32(0)]));
    assert_eq!(h.call("sum", &[Value::I32(10)]), Ok(vec![Value::I32(55)]));
    assert_eq!(h.call("sum", &[Value::I32(100)]), Ok(vec![Value::I32(5050)]));
}

#[test]
fn br_table_selects_target() {
    let mut b = ModuleBuilder::new();
    let body = [
        0x02, 0x40, 0x02, 0x40, 0x02, 0x40, //
        0x20, 0x00, 0x0e, 0x02, 0x00, 0x01, 0x02, 0x0b, //
        0x41, 10, 0x0f, 0x0b, //
        0x41, 20, 0x0f, 0x0b, //
        0x41, 30,
    ];
    let f = b.func(&[I32], &[I32], &[], &body);
    b.export_func("switch", f);
    let mut h = Harness::new(b.build());

    for (input, expected) in [(0, 10), (1, 20), (2, 30), (-1, 30), (1000, 30)] {
        assert_eq!(h.call("switch", &[Value::I32(input)]), Ok(vec![Value::I32(expected)]), "input {input}");
    }
}

#[test]
fn if_else_produces_value() {
    let mut b = ModuleBuilder::new();
    let f = b.func(&[I32], &[I32], &[], &[0x20, 0x00, 0x04, 0x7f, 0x41, 0x01, 0x05, 0x41, 0x7f, 0x0b]);
    // if without else, skipped when false
    let g = b.func(&[I32], &[I32], &[I32], &[0x41, 0x05, 0x21, 0x01, 0x20, 0x00, 0x04, 0x40, 0x41, 0x07, 0x21, 0x01, 0x0b, 0x20, 0x01]);
    b.export_func("sign", f).export_func("maybe", g);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("sign", &[Value::I32(9)]), Ok(vec![Value::I32(1)]));
    assert_eq!(h.call("sign", &[Value::I32(0)]), Ok(vec![Value::I32(-1)]));
    assert_eq!(h.call("maybe", &[Value::I32(0)]), Ok(vec![Value::I32(5)]));
    assert_eq!(h.call("maybe", &[Value::I32(1)]), Ok(vec![Value::I32(7)]));
}

#[test]
fn recursion_computes_factorial() {
    let mut b = ModuleBuilder::new();
    let fac_idx = 0u8;
    let body = [
        0x20, 0x00, 0x50, 0x04, 0x7e, 0x42, 0x01, 0x05, //
        0x20, 0x00, 0x20, 0x00, 0x42, 0x01, 0x7d, 0x10, fac_idx, 0x7e, 0x0b,
    ];
    let f = b.func(&[I64], &[I64], &[], &body);
    b.export_func("fac", f);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("fac", &[Value::I64(0)]), Ok(vec![Value::I64(1)]));
    assert_eq!(h.call("fac", &[Value::I64(20)]), Ok(vec![Value::I64(2_432_902_008_176_640_000)]));
}

#[test]
fn call_indirect_dispatches_through_table() {
    let mut b = ModuleBuilder::new();
    let add = b.func(&[I32, I32], &[I32], &[], &[0x20, 0x00, 0x20, 0x01, 0x6a]);
    let sub = b.func(&[I32, I32], &[I32], &[], &[0x20, 0x00, 0x20, 0x01, 0x6b]);
    let other = b.func(&[], &[I32], &[], &i32_const(0));
    let binop = b.ty(&[I32, I32], &[I32]) as u8;
    let dispatch = b.func(&[I32, I32, I32], &[I32], &[], &[0x20, 0x00, 0x20, 0x01, 0x20, 0x02, 0x11, binop, 0x00]);
    b.table(4).elem(0, &[add, sub, other]).export_func("dispatch", dispatch);
    let mut h = Harness::new(b.build());

    let call = |h: &mut Harness, idx: i32| h.call("dispatch", &[Value::I32(7), Value::I32(2), Value::I32(idx)]);
    assert_eq!(call(&mut h, 0), Ok(vec![Value::I32(9)]));
    assert_eq!(call(&mut h, 1), Ok(vec![Value::I32(5)]));
    assert_eq!(call(&mut h, 2), Err(Error::Trap(INDIRECT_CALL_MISMATCH)));
    assert_eq!(call(&mut h, 3), Err(Error::Trap(UNINITIALIZED_ELEM)));
    assert_eq!(call(&mut h, 4), Err(Error::Trap(UNDEF_ELEM)));
}

#[test]
fn memory_grows_up_to_declared_maximum() {
    let mut b = ModuleBuilder::new();
    b.memory(1, Some(3));
    let grow = b.func(&[I32], &[I32], &[], &[0x20, 0x00, 0x40, 0x00]);
    let size = b.func(&[], &[I32], &[], &[0x3f, 0x00]);
    // store at the first byte of the second page
    let poke = b.func(&[], &[I32], &[], &code(&[&i32_const(65536), &i32_const(99), &[0x36, 0x02, 0x00], &i32_const(65536), &[0x28, 0x02, 0x00]]));
    b.export_func("grow", grow).export_func("size", size).export_func("poke", poke);
    let mut h = Harness::new(b.build());

    assert!(matches!(h.call("poke", &[]), Err(Error::Trap(_))));
    assert_eq!(h.call("size", &[]), Ok(vec![Value::I32(1)]));
    assert_eq!(h.call("grow", &[Value::I32(1)]), Ok(vec![Value::I32(1)]));
    assert_eq!(h.call("poke", &[]), Ok(vec![Value::I32(99)]));
    assert_eq!(h.call("grow", &[Value::I32(2)]), Ok(vec![Value::I32(-1)]));
    assert_eq!(h.call("grow", &[Value::I32(1)]), Ok(vec![Value::I32(2)]));
    assert_eq!(h.call("size", &[]), Ok(vec![Value::I32(3)]));
}

#[test]
fn data_segments_initialize_memory() {
    let mut b = ModuleBuilder::new();
    b.memory(1, None).data(0, &[0x01, 0x02, 0x03, 0x84]);
    let load = b.func(&[], &[I32], &[], &[0x41, 0x00, 0x28, 0x02, 0x00]);
    let load8_s = b.func(&[], &[I32], &[], &[0x41, 0x00, 0x2c, 0x00, 0x03]);
    let load8_u = b.func(&[], &[I32], &[], &[0x41, 0x00, 0x2d, 0x00, 0x03]);
    b.export_func("load", load).export_func("load8_s", load8_s).export_func("load8_u", load8_u);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("load", &[]), Ok(vec![Value::I32(0x8403_0201_u32 as i32)]));
    assert_eq!(h.call("load8_s", &[]), Ok(vec![Value::I32(-124)]));
    assert_eq!(h.call("load8_u", &[]), Ok(vec![Value::I32(0x84)]));
}

#[test]
fn multiple_results_are_returned_in_order() {
    let mut b = ModuleBuilder::new();
    let swap = b.func(&[I32, I64], &[I64, I32], &[], &[0x20, 0x01, 0x20, 0x00]);
    b.export_func("swap", swap);
    let mut h = Harness::new(b.build());
    assert_eq!(h.call("swap", &[Value::I32(1), Value::I64(2)]), Ok(vec![Value::I64(2), Value::I32(1)]));
}

#[test]
fn globals_keep_state_between_calls() {
    let mut b = ModuleBuilder::new();
    let g = b.global(I32, true, &i32_const(40));
    let bump = b.func(&[], &[I32], &[], &[0x23, 0x00, 0x41, 0x01, 0x6a, 0x24, 0x00, 0x23, 0x00]);
    b.export_func("bump", bump).export_global("counter", g);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("bump", &[]), Ok(vec![Value::I32(41)]));
    assert_eq!(h.call("bump", &[]), Ok(vec![Value::I32(42)]));
    assert_eq!(h.inst.global("counter").map(|g| g.get()), Some(Value::I32(42)));
}

#[test]
fn float_and_conversion_semantics() {
    let mut b = ModuleBuilder::new();
    let mul = b.func(&[F64], &[F64], &[], &code(&[&[0x20, 0x00], &f64_const(1.5), &[0xa2]]));
    let trunc = b.func(&[F64], &[I32], &[], &[0x20, 0x00, 0xaa]);
    let sat = b.func(&[F64], &[I32], &[], &[0x20, 0x00, 0xfc, 0x02]);
    let min = b.func(&[F32, F32], &[F32], &[], &[0x20, 0x00, 0x20, 0x01, 0x96]);
    let div = b.func(&[I32, I32], &[I32], &[], &[0x20, 0x00, 0x20, 0x01, 0x6d]);
    b.export_func("mul", mul)
        .export_func("trunc", trunc)
        .export_func("sat", sat)
        .export_func("min", min)
        .export_func("div", div);
    let mut h = Harness::new(b.build());

    assert_eq!(h.call("mul", &[Value::F64(4.0)]), Ok(vec![Value::F64(6.0)]));
    assert_eq!(h.call("trunc", &[Value::F64(-3.9)]), Ok(vec![Value::I32(-3)]));
    assert_eq!(h.call("trunc", &[Value::F64(f64::NAN)]), Err(Error::Trap(INVALID_CONV_TO_INT)));
    assert_eq!(h.call("trunc", &[Value::F64(3e10)]), Err(Error::Trap(INTEGER_OVERFLOW)));
    assert_eq!(h.call("sat", &[Value::F64(3e10)]), Ok(vec![Value::I32(i32::MAX)]));
    assert_eq!(h.call("sat", &[Value::F64(f64::NAN)]), Ok(vec![Value::I32(0)]));
    assert_eq!(h.call("min", &[Value::F32(-0.0), Value::F32(0.0)]).map(|r| r[0].as_f32().map(f32::to_bits)), Ok(Some((-0.0f32).to_bits())));
    assert_eq!(h.call("div", &[Value::I32(i32::MIN), Value::I32(-1)]), Err(Error::Trap(INTEGER_OVERFLOW)));
}

#[test]
fn instruction_count_accumulates() {
    let mut h = Harness::new(add_module());
    h.call("add", &[Value::I32(1), Value::I32(2)]).unwrap();
    let once = h.stat.instr_count;
    assert!(once > 0);
    h.call("add", &[Value::I32(1), Value::I32(2)]).unwrap();
    assert_eq!(h.stat.instr_count, once * 2);
}
