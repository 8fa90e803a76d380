//! C binding surface.
//!
//! Values cross the boundary as untagged 128-bit [`WagmiValue`]s and outcomes
//! as [`WagmiResult`] codes. Configuration handles are created and deleted
//! explicitly; every function tolerates null handles.
#![allow(unsafe_code)]

use std::ffi::{c_char, c_void, CStr};

use crate::config::{Configure, HostRegistration, Proposal};
use crate::error::{ErrCode, Error};
use crate::value::{ExternRef, RawValue, Value};
use crate::vm::Vm;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WagmiValue {
    pub value: u128,
}

impl From<RawValue> for WagmiValue {
    fn from(raw: RawValue) -> Self { Self { value: raw.0 } }
}

impl From<WagmiValue> for RawValue {
    fn from(v: WagmiValue) -> Self { RawValue(v.value) }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WagmiResult {
    pub code: u32,
}

impl From<ErrCode> for WagmiResult {
    fn from(code: ErrCode) -> Self { Self { code: code as u32 } }
}

impl<T> From<&Result<T, Error>> for WagmiResult {
    fn from(res: &Result<T, Error>) -> Self {
        match res {
            Ok(_) => ErrCode::Success.into(),
            Err(e) => e.code().into(),
        }
    }
}

/// Opaque configuration handle.
pub struct WagmiConfigureContext {
    conf: Configure,
}

unsafe fn slice_from<'a, T>(ptr: *const T, len: u32) -> Option<&'a [T]> {
    if len == 0 { return Some(&[]); }
    if ptr.is_null() { return None; }
    Some(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
}

unsafe fn conf_ref<'a>(ctx: *const WagmiConfigureContext) -> Option<&'a Configure> {
    unsafe { ctx.as_ref() }.map(|c| &c.conf)
}

unsafe fn conf_mut<'a>(ctx: *mut WagmiConfigureContext) -> Option<&'a mut Configure> {
    unsafe { ctx.as_mut() }.map(|c| &mut c.conf)
}

// ---------------- Version ----------------

#[no_mangle]
pub extern "C" fn wagmi_version_get() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn wagmi_version_get_major() -> u32 { env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0) }

#[no_mangle]
pub extern "C" fn wagmi_version_get_minor() -> u32 { env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0) }

#[no_mangle]
pub extern "C" fn wagmi_version_get_patch() -> u32 { env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0) }

// ---------------- Values ----------------

#[no_mangle]
pub extern "C" fn wagmi_value_gen_i32(v: i32) -> WagmiValue { RawValue::from_i32(v).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_i32(v: WagmiValue) -> i32 { RawValue::from(v).as_i32() }
#[no_mangle]
pub extern "C" fn wagmi_value_gen_i64(v: i64) -> WagmiValue { RawValue::from_i64(v).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_i64(v: WagmiValue) -> i64 { RawValue::from(v).as_i64() }
#[no_mangle]
pub extern "C" fn wagmi_value_gen_f32(v: f32) -> WagmiValue { RawValue::from_f32(v).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_f32(v: WagmiValue) -> f32 { RawValue::from(v).as_f32() }
#[no_mangle]
pub extern "C" fn wagmi_value_gen_f64(v: f64) -> WagmiValue { RawValue::from_f64(v).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_f64(v: WagmiValue) -> f64 { RawValue::from(v).as_f64() }
#[no_mangle]
pub extern "C" fn wagmi_value_gen_v128(v: i128) -> WagmiValue { RawValue::from_v128(v).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_v128(v: WagmiValue) -> i128 { RawValue::from(v).as_v128() }

/// Null reference; `ref_type` is accepted for symmetry, both null kinds share one encoding.
#[no_mangle]
pub extern "C" fn wagmi_value_gen_null_ref(_ref_type: u32) -> WagmiValue { RawValue::null_ref().into() }

#[no_mangle]
pub extern "C" fn wagmi_value_gen_func_ref(idx: u32) -> WagmiValue { RawValue::from_func_ref(idx).into() }
#[no_mangle]
pub extern "C" fn wagmi_value_get_func_idx(v: WagmiValue) -> u32 { RawValue::from(v).as_func_idx() }

#[no_mangle]
pub extern "C" fn wagmi_value_gen_extern_ref(ptr: *mut c_void) -> WagmiValue {
    if ptr.is_null() {
        return RawValue::null_ref().into();
    }
    RawValue::from_extern_ref(ExternRef::from_ptr(ptr)).into()
}

#[no_mangle]
pub extern "C" fn wagmi_value_get_extern_ref(v: WagmiValue) -> *mut c_void { RawValue::from(v).as_extern_ref().as_ptr() }

#[no_mangle]
pub extern "C" fn wagmi_value_is_null_ref(v: WagmiValue) -> bool { RawValue::from(v).is_null_ref() }

// ---------------- Result ----------------

#[no_mangle]
pub extern "C" fn wagmi_result_ok(res: WagmiResult) -> bool {
    ErrCode::from_u32(res.code).is_some_and(ErrCode::is_ok)
}

#[no_mangle]
pub extern "C" fn wagmi_result_get_code(res: WagmiResult) -> u32 { res.code }

#[no_mangle]
pub extern "C" fn wagmi_result_get_message(res: WagmiResult) -> *const c_char {
    let msg = ErrCode::from_u32(res.code).map(ErrCode::c_message).unwrap_or("unknown error code\0");
    msg.as_ptr() as *const c_char
}

// ---------------- Configure ----------------

#[no_mangle]
pub extern "C" fn wagmi_configure_create() -> *mut WagmiConfigureContext {
    Box::into_raw(Box::new(WagmiConfigureContext { conf: Configure::new() }))
}

/// # Safety
/// `ctx` must be null or a handle from [`wagmi_configure_create`] not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_delete(ctx: *mut WagmiConfigureContext) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx) });
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_add_proposal(ctx: *mut WagmiConfigureContext, prop: u32) {
    if let (Some(conf), Some(p)) = (unsafe { conf_mut(ctx) }, Proposal::from_u32(prop)) {
        conf.add_proposal(p);
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_remove_proposal(ctx: *mut WagmiConfigureContext, prop: u32) {
    if let (Some(conf), Some(p)) = (unsafe { conf_mut(ctx) }, Proposal::from_u32(prop)) {
        conf.remove_proposal(p);
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_has_proposal(ctx: *const WagmiConfigureContext, prop: u32) -> bool {
    match (unsafe { conf_ref(ctx) }, Proposal::from_u32(prop)) {
        (Some(conf), Some(p)) => conf.has_proposal(p),
        _ => false,
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_add_host_registration(ctx: *mut WagmiConfigureContext, host: u32) {
    if let (Some(conf), Some(h)) = (unsafe { conf_mut(ctx) }, HostRegistration::from_u32(host)) {
        conf.add_host_registration(h);
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_remove_host_registration(ctx: *mut WagmiConfigureContext, host: u32) {
    if let (Some(conf), Some(h)) = (unsafe { conf_mut(ctx) }, HostRegistration::from_u32(host)) {
        conf.remove_host_registration(h);
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_has_host_registration(ctx: *const WagmiConfigureContext, host: u32) -> bool {
    match (unsafe { conf_ref(ctx) }, HostRegistration::from_u32(host)) {
        (Some(conf), Some(h)) => conf.has_host_registration(h),
        _ => false,
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_set_max_memory_page(ctx: *mut WagmiConfigureContext, pages: u32) {
    if let Some(conf) = unsafe { conf_mut(ctx) } {
        conf.set_max_memory_page(pages);
    }
}

/// # Safety
/// `ctx` must be null or a live configuration handle.
#[no_mangle]
pub unsafe extern "C" fn wagmi_configure_get_max_memory_page(ctx: *const WagmiConfigureContext) -> u32 {
    unsafe { conf_ref(ctx) }.map(Configure::max_memory_page).unwrap_or(0)
}

// ---------------- VM ----------------

fn run_buffer(conf: &Configure, bytes: &[u8], func: &str, params: &[WagmiValue]) -> Result<Vec<Value>, Error> {
    let mut vm = Vm::new(conf);
    vm.load_wasm_bytes(bytes)?;
    vm.validate()?;
    vm.instantiate()?;
    let (_, ty) = vm
        .function_list()
        .into_iter()
        .find(|(name, _)| name == func)
        .ok_or_else(|| Error::FuncNotFound(func.to_string()))?;
    if params.len() != ty.params.len() { return Err(Error::SignatureMismatch); }
    let args: Vec<Value> = params.iter().zip(&ty.params).map(|(p, t)| Value::from_raw((*p).into(), *t)).collect();
    vm.execute(func, &args)
}

/// Loads, validates, instantiates and runs `func` from an in-memory module.
///
/// Up to `return_len` results are written to `returns`. A null `conf` uses
/// the default configuration.
///
/// # Safety
/// `conf` must be null or a live configuration handle; `buf`, `params` and
/// `returns` must be valid for `len`, `param_len` and `return_len` elements;
/// `func` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn wagmi_vm_run_wasm_from_buffer(
    conf: *const WagmiConfigureContext,
    buf: *const u8,
    len: u32,
    func: *const c_char,
    params: *const WagmiValue,
    param_len: u32,
    returns: *mut WagmiValue,
    return_len: u32,
) -> WagmiResult {
    let default_conf;
    let conf = match unsafe { conf_ref(conf) } {
        Some(conf) => conf,
        None => {
            default_conf = Configure::new();
            &default_conf
        }
    };
    let Some(bytes) = (unsafe { slice_from(buf, len) }) else { return ErrCode::LoadError.into() };
    if func.is_null() { return ErrCode::ExecutionError.into(); }
    let Ok(func) = unsafe { CStr::from_ptr(func) }.to_str() else { return ErrCode::ExecutionError.into() };
    let Some(params) = (unsafe { slice_from(params, param_len) }) else { return ErrCode::ExecutionError.into() };

    let res = run_buffer(conf, bytes, func, params);
    if let (Ok(values), false) = (&res, returns.is_null()) {
        for (i, v) in values.iter().take(return_len as usize).enumerate() {
            unsafe { returns.add(i).write(v.to_raw().into()) };
        }
    }
    WagmiResult::from(&res)
}
