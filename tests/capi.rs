mod common;

use std::ffi::{c_void, CStr};
use std::ptr;

use common::*;
use wagmi_vm::capi::*;
use wagmi_vm::{ErrCode, HostRegistration, Proposal};

fn message(res: WagmiResult) -> String {
    unsafe { CStr::from_ptr(wagmi_result_get_message(res)) }.to_string_lossy().into_owned()
}

#[test]
fn value_constructors_and_accessors_agree() {
    assert_eq!(wagmi_value_get_i32(wagmi_value_gen_i32(-5)), -5);
    assert_eq!(wagmi_value_get_i64(wagmi_value_gen_i64(i64::MIN)), i64::MIN);
    assert_eq!(wagmi_value_get_f32(wagmi_value_gen_f32(1.5)), 1.5);
    assert_eq!(wagmi_value_get_f64(wagmi_value_gen_f64(-0.25)), -0.25);
    assert_eq!(wagmi_value_get_v128(wagmi_value_gen_v128(-2)), -2);
    assert_eq!(wagmi_value_gen_i32(-1).value, 0xffff_ffff);

    assert!(wagmi_value_is_null_ref(wagmi_value_gen_null_ref(0x70)));
    let func = wagmi_value_gen_func_ref(0);
    assert!(!wagmi_value_is_null_ref(func));
    assert_eq!(wagmi_value_get_func_idx(func), 0);

    let mut payload = 42u64;
    let ext = wagmi_value_gen_extern_ref(&mut payload as *mut u64 as *mut c_void);
    assert!(!wagmi_value_is_null_ref(ext));
    assert_eq!(wagmi_value_get_extern_ref(ext) as *mut u64, &mut payload as *mut u64);

    let null_ext = wagmi_value_gen_extern_ref(ptr::null_mut());
    assert!(wagmi_value_is_null_ref(null_ext));
    assert_eq!(null_ext.value, wagmi_value_gen_null_ref(0x6f).value);
    assert!(wagmi_value_get_extern_ref(null_ext).is_null());
}

#[test]
fn result_codes_follow_ok_rule() {
    let ok = WagmiResult::from(ErrCode::Success);
    let terminated = WagmiResult::from(ErrCode::Terminated);
    let failed = WagmiResult::from(ErrCode::LoadError);
    assert!(wagmi_result_ok(ok));
    assert!(wagmi_result_ok(terminated));
    assert!(!wagmi_result_ok(failed));
    assert!(!wagmi_result_ok(WagmiResult { code: 99 }));
    assert_eq!(wagmi_result_get_code(failed), ErrCode::LoadError as u32);
    assert_eq!(message(failed), ErrCode::LoadError.message());
    assert_eq!(message(WagmiResult { code: 99 }), "unknown error code");
}

#[test]
fn version_is_reported() {
    let version = unsafe { CStr::from_ptr(wagmi_version_get()) }.to_str().unwrap();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));
    let expected = format!("{}.{}.{}", wagmi_version_get_major(), wagmi_version_get_minor(), wagmi_version_get_patch());
    assert_eq!(version, expected);
}

#[test]
fn configure_handle_round_trip() {
    unsafe {
        let conf = wagmi_configure_create();
        assert!(!wagmi_configure_has_proposal(conf, Proposal::BulkMemoryOperations as u32));
        wagmi_configure_add_proposal(conf, Proposal::BulkMemoryOperations as u32);
        assert!(wagmi_configure_has_proposal(conf, Proposal::BulkMemoryOperations as u32));
        wagmi_configure_remove_proposal(conf, Proposal::SignExtensionOperators as u32);
        assert!(!wagmi_configure_has_proposal(conf, Proposal::SignExtensionOperators as u32));
        // Unknown discriminants are ignored.
        wagmi_configure_add_proposal(conf, 1000);
        assert!(!wagmi_configure_has_proposal(conf, 1000));

        wagmi_configure_add_host_registration(conf, HostRegistration::Wasi as u32);
        assert!(wagmi_configure_has_host_registration(conf, HostRegistration::Wasi as u32));
        wagmi_configure_remove_host_registration(conf, HostRegistration::Wasi as u32);
        assert!(!wagmi_configure_has_host_registration(conf, HostRegistration::Wasi as u32));

        wagmi_configure_set_max_memory_page(conf, 8);
        assert_eq!(wagmi_configure_get_max_memory_page(conf), 8);
        wagmi_configure_delete(conf);

        // Null handles are tolerated.
        wagmi_configure_add_proposal(ptr::null_mut(), 0);
        assert!(!wagmi_configure_has_proposal(ptr::null(), 0));
        assert_eq!(wagmi_configure_get_max_memory_page(ptr::null()), 0);
        wagmi_configure_delete(ptr::null_mut());
    }
}

fn run(conf: *const WagmiConfigureContext, wasm: &[u8], func: &CStr, params: &[WagmiValue], returns: &mut [WagmiValue]) -> WagmiResult {
    unsafe {
        wagmi_vm_run_wasm_from_buffer(
            conf,
            wasm.as_ptr(),
            wasm.len() as u32,
            func.as_ptr(),
            params.as_ptr(),
            params.len() as u32,
            returns.as_mut_ptr(),
            returns.len() as u32,
        )
    }
}

#[test]
fn run_from_buffer_adds() {
    let wasm = add_module();
    let params = [wagmi_value_gen_i32(2), wagmi_value_gen_i32(3)];
    let mut returns = [WagmiValue::default()];
    let res = run(ptr::null(), &wasm, c"add", &params, &mut returns);
    assert!(wagmi_result_ok(res));
    assert_eq!(wagmi_result_get_code(res), ErrCode::Success as u32);
    assert_eq!(wagmi_value_get_i32(returns[0]), 5);
}

#[test]
fn run_from_buffer_reports_failures() {
    let mut returns = [WagmiValue::default()];
    let params = [wagmi_value_gen_i32(2), wagmi_value_gen_i32(3)];

    let res = run(ptr::null(), b"\0asn\x01\0\0\0", c"add", &params, &mut returns);
    assert_eq!(wagmi_result_get_code(res), ErrCode::LoadError as u32);
    assert!(!wagmi_result_ok(res));

    let res = run(ptr::null(), &add_module(), c"sub", &params, &mut returns);
    assert_eq!(wagmi_result_get_code(res), ErrCode::ExecutionError as u32);

    let res = run(ptr::null(), &add_module(), c"add", &params[..1], &mut returns);
    assert_eq!(wagmi_result_get_code(res), ErrCode::ExecutionError as u32);
    assert_eq!(wagmi_value_get_i32(returns[0]), 0);
}

#[test]
fn run_from_buffer_honours_page_limit() {
    let mut b = ModuleBuilder::new();
    b.memory(3, None);
    let f = b.func(&[], &[], &[], &[]);
    b.export_func("noop", f);
    let wasm = b.build();

    unsafe {
        let conf = wagmi_configure_create();
        wagmi_configure_set_max_memory_page(conf, 2);
        let res = run(conf, &wasm, c"noop", &[], &mut []);
        assert_eq!(wagmi_result_get_code(res), ErrCode::InstantiationError as u32);

        wagmi_configure_set_max_memory_page(conf, 3);
        let res = run(conf, &wasm, c"noop", &[], &mut []);
        assert!(wagmi_result_ok(res));
        wagmi_configure_delete(conf);
    }
}

#[test]
fn run_from_buffer_reports_termination_as_ok() {
    let mut b = ModuleBuilder::new();
    let proc_exit = b.import_func("wasi_snapshot_preview1", "proc_exit", &[I32], &[]);
    let body = code(&[&i32_const(7), &[0x10, proc_exit as u8]]);
    let f = b.func(&[], &[], &[], &body);
    b.export_func("_start", f);
    let wasm = b.build();

    unsafe {
        let conf = wagmi_configure_create();
        wagmi_configure_add_host_registration(conf, HostRegistration::Wasi as u32);
        let res = run(conf, &wasm, c"_start", &[], &mut []);
        assert_eq!(wagmi_result_get_code(res), ErrCode::Terminated as u32);
        assert!(wagmi_result_ok(res));
        assert_eq!(message(res), "terminated");
        wagmi_configure_delete(conf);
    }
}
