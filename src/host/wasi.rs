use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::Error;
use crate::import::{CallingFrame, HostEnv, HostFunction, ImportObject};
use crate::memory::MemoryInstance;
use crate::types::ValType::{I32, I64};
use crate::value::Value;

pub const MODULE_NAME: &str = "wasi_snapshot_preview1";

// errno values of wasi_snapshot_preview1
pub const ERRNO_SUCCESS: i32 = 0;
pub const ERRNO_BADF: i32 = 8;
pub const ERRNO_FAULT: i32 = 21;
pub const ERRNO_INVAL: i32 = 28;
pub const ERRNO_IO: i32 = 29;

const CLOCK_REALTIME: i32 = 0;
const CLOCK_MONOTONIC: i32 = 1;
const CLOCK_PROCESS_CPUTIME: i32 = 2;
const CLOCK_THREAD_CPUTIME: i32 = 3;

/// Process-facing state of a guest: its arguments, environment and exit code.
#[derive(Debug)]
pub struct WasiEnv {
    args: Vec<String>,
    envs: Vec<String>,
    exit_code: u32,
    capture: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    started: Instant,
}

impl Default for WasiEnv {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            envs: Vec::new(),
            exit_code: 0,
            capture: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl WasiEnv {
    /// Replaces arguments and `KEY=VALUE` environment entries and clears the exit code.
    pub fn init<A, E>(&mut self, args: A, envs: E)
    where
        A: IntoIterator,
        A::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self.envs = envs.into_iter().map(Into::into).collect();
        self.exit_code = 0;
    }

    pub fn args(&self) -> &[String] { &self.args }
    pub fn envs(&self) -> &[String] { &self.envs }
    pub fn exit_code(&self) -> u32 { self.exit_code }

    /// Keeps guest output in memory instead of writing it to the host's streams.
    pub fn set_capture_output(&mut self, capture: bool) { self.capture = capture; }
    pub fn captured_stdout(&self) -> &[u8] { &self.stdout }
    pub fn captured_stderr(&self) -> &[u8] { &self.stderr }

    fn write(&mut self, fd: i32, bytes: &[u8]) -> Result<(), i32> {
        match (fd, self.capture) {
            (1, true) => self.stdout.extend_from_slice(bytes),
            (2, true) => self.stderr.extend_from_slice(bytes),
            (1, false) => std::io::stdout().write_all(bytes).map_err(|_| ERRNO_IO)?,
            (2, false) => std::io::stderr().write_all(bytes).map_err(|_| ERRNO_IO)?,
            _ => return Err(ERRNO_BADF),
        }
        Ok(())
    }
}

fn errno(code: i32) -> Result<Vec<Value>, Error> { Ok(vec![Value::I32(code)]) }

fn arg_u32(args: &[Value], idx: usize) -> u32 {
    args.get(idx).and_then(Value::as_i32).unwrap_or_default() as u32
}

/// Runs `f` against the caller's memory, mapping a missing memory or an
/// out-of-bounds access to `ERRNO_FAULT`.
fn with_memory(frame: &CallingFrame, f: impl FnOnce(&mut MemoryInstance) -> Result<i32, &'static str>) -> Result<Vec<Value>, Error> {
    let Some(mem) = frame.memory() else { return errno(ERRNO_FAULT) };
    let mut mem = mem.borrow_mut();
    errno(f(&mut mem).unwrap_or(ERRNO_FAULT))
}

/// Writes the counts used by `args_sizes_get`/`environ_sizes_get`.
fn write_sizes(mem: &mut MemoryInstance, list: &[String], count_ptr: u32, size_ptr: u32) -> Result<i32, &'static str> {
    let size: usize = list.iter().map(|s| s.len() + 1).sum();
    mem.store_u32(count_ptr, 0, list.len() as u32)?;
    mem.store_u32(size_ptr, 0, size as u32)?;
    Ok(ERRNO_SUCCESS)
}

/// Writes a pointer array and the NUL-terminated strings it points to.
fn write_strings(mem: &mut MemoryInstance, list: &[String], ptrs: u32, buf: u32) -> Result<i32, &'static str> {
    let mut cursor = buf;
    for (i, s) in list.iter().enumerate() {
        mem.store_u32(ptrs, (i * 4) as u32, cursor)?;
        mem.write_bytes(cursor, s.as_bytes())?;
        mem.store_u8(cursor, s.len() as u32, 0)?;
        cursor += s.len() as u32 + 1;
    }
    Ok(ERRNO_SUCCESS)
}

fn now_nanos(env: &WasiEnv, clock: i32) -> Option<u64> {
    match clock {
        CLOCK_REALTIME => SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_nanos() as u64),
        CLOCK_MONOTONIC | CLOCK_PROCESS_CPUTIME | CLOCK_THREAD_CPUTIME => Some(env.started.elapsed().as_nanos() as u64),
        _ => None,
    }
}

/// Builds the `wasi_snapshot_preview1` import object backed by a fresh environment.
pub fn import_object() -> ImportObject {
    let env = Rc::new(RefCell::new(WasiEnv::default()));
    let mut obj = ImportObject::with_env(MODULE_NAME, HostEnv::Wasi(env.clone()));

    let e = env.clone();
    obj.add_function("args_get", HostFunction::new([I32, I32], [I32], move |frame, args| {
        let env = e.borrow();
        with_memory(frame, |mem| write_strings(mem, &env.args, arg_u32(args, 0), arg_u32(args, 1)))
    }));
    let e = env.clone();
    obj.add_function("args_sizes_get", HostFunction::new([I32, I32], [I32], move |frame, args| {
        let env = e.borrow();
        with_memory(frame, |mem| write_sizes(mem, &env.args, arg_u32(args, 0), arg_u32(args, 1)))
    }));
    let e = env.clone();
    obj.add_function("environ_get", HostFunction::new([I32, I32], [I32], move |frame, args| {
        let env = e.borrow();
        with_memory(frame, |mem| write_strings(mem, &env.envs, arg_u32(args, 0), arg_u32(args, 1)))
    }));
    let e = env.clone();
    obj.add_function("environ_sizes_get", HostFunction::new([I32, I32], [I32], move |frame, args| {
        let env = e.borrow();
        with_memory(frame, |mem| write_sizes(mem, &env.envs, arg_u32(args, 0), arg_u32(args, 1)))
    }));
    let e = env.clone();
    obj.add_function("clock_time_get", HostFunction::new([I32, I64, I32], [I32], move |frame, args| {
        let clock = args.first().and_then(Value::as_i32).unwrap_or_default();
        let Some(nanos) = now_nanos(&e.borrow(), clock) else { return errno(ERRNO_INVAL) };
        with_memory(frame, |mem| {
            mem.store_u64(arg_u32(args, 2), 0, nanos)?;
            Ok(ERRNO_SUCCESS)
        })
    }));
    let e = env.clone();
    obj.add_function("fd_write", HostFunction::new([I32, I32, I32, I32], [I32], move |frame, args| {
        let fd = args.first().and_then(Value::as_i32).unwrap_or_default();
        let (iovs, iovs_len, nwritten_ptr) = (arg_u32(args, 1), arg_u32(args, 2), arg_u32(args, 3));
        let Some(mem) = frame.memory() else { return errno(ERRNO_FAULT) };
        let mut mem = mem.borrow_mut();

        let mut bytes = Vec::new();
        for i in 0..iovs_len {
            let iov = iovs.wrapping_add(i.wrapping_mul(8));
            let chunk = mem
                .load_u32(iov, 0)
                .and_then(|ptr| mem.load_u32(iov, 4).map(|len| (ptr, len)))
                .and_then(|(ptr, len)| mem.read_bytes(ptr, len));
            match chunk {
                Ok(chunk) => bytes.extend_from_slice(chunk),
                Err(_) => return errno(ERRNO_FAULT),
            }
        }
        if let Err(code) = e.borrow_mut().write(fd, &bytes) { return errno(code); }
        if mem.store_u32(nwritten_ptr, 0, bytes.len() as u32).is_err() { return errno(ERRNO_FAULT); }
        errno(ERRNO_SUCCESS)
    }));
    let e = env.clone();
    obj.add_function("proc_exit", HostFunction::new([I32], [], move |_frame, args| {
        let code = arg_u32(args, 0);
        e.borrow_mut().exit_code = code;
        debug!(exit_code = code, "guest called proc_exit");
        Err(Error::Terminated)
    }));
    obj.add_function("sched_yield", HostFunction::new([], [I32], |_frame, _args| errno(ERRNO_SUCCESS)));
    obj
}
