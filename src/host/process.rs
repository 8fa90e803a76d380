use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, OOB_MEMORY_ACCESS};
use crate::import::{CallingFrame, HostEnv, HostFunction, ImportObject};
use crate::types::ValType::I32;
use crate::value::Value;

pub const MODULE_NAME: &str = "wagmi_process";

/// Default command timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// A command being assembled by the guest, and the outcome of the last run.
#[derive(Debug)]
pub struct ProcessEnv {
    name: String,
    args: Vec<String>,
    envs: BTreeMap<String, String>,
    stdin: Vec<u8>,
    timeout_ms: u32,
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    allowed: BTreeSet<String>,
    allow_all: bool,
}

impl Default for ProcessEnv {
    fn default() -> Self {
        Self {
            name: String::new(),
            args: Vec::new(),
            envs: BTreeMap::new(),
            stdin: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            allowed: BTreeSet::new(),
            allow_all: false,
        }
    }
}

impl ProcessEnv {
    /// Permits guests to run `command`. Nothing is permitted by default.
    pub fn allow_command(&mut self, command: impl Into<String>) { self.allowed.insert(command.into()); }
    pub fn allow_all_commands(&mut self, allow: bool) { self.allow_all = allow; }
    pub fn is_allowed(&self, command: &str) -> bool { self.allow_all || self.allowed.contains(command) }

    pub fn set_prog_name(&mut self, name: impl Into<String>) { self.name = name.into(); }
    pub fn add_arg(&mut self, arg: impl Into<String>) { self.args.push(arg.into()); }
    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) { self.envs.insert(key.into(), value.into()); }
    pub fn add_stdin(&mut self, bytes: &[u8]) { self.stdin.extend_from_slice(bytes); }
    pub fn set_timeout(&mut self, ms: u32) { self.timeout_ms = ms; }

    pub fn exit_code(&self) -> i32 { self.exit_code }
    pub fn stdout(&self) -> &[u8] { &self.stdout }
    pub fn stderr(&self) -> &[u8] { &self.stderr }

    /// Runs the assembled command and resets the builder state.
    pub fn run(&mut self) -> i32 {
        let name = std::mem::take(&mut self.name);
        let args = std::mem::take(&mut self.args);
        let envs = std::mem::take(&mut self.envs);
        let stdin = std::mem::take(&mut self.stdin);
        let timeout = Duration::from_millis(self.timeout_ms as u64);
        self.timeout_ms = DEFAULT_TIMEOUT_MS;
        self.stdout.clear();
        self.stderr.clear();

        if !self.is_allowed(&name) {
            warn!(command = %name, "process command rejected");
            self.stderr = format!("Permission denied: command \"{name}\" is not in the allow list.").into_bytes();
            self.exit_code = -1;
            return self.exit_code;
        }
        debug!(command = %name, args = ?args, "running host process");
        self.exit_code = match spawn(&name, &args, &envs, &stdin, timeout) {
            Ok((code, stdout, stderr)) => {
                self.stdout = stdout;
                self.stderr = stderr;
                code
            }
            Err(msg) => {
                self.stderr = msg.into_bytes();
                -1
            }
        };
        self.exit_code
    }
}

fn spawn(
    name: &str,
    args: &[String],
    envs: &BTreeMap<String, String>,
    stdin: &[u8],
    timeout: Duration,
) -> Result<(i32, Vec<u8>, Vec<u8>), String> {
    let mut child = Command::new(name)
        .args(args)
        .envs(envs)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn {name}: {e}"))?;

    let deadline = Instant::now() + timeout;
    let readers = [child.stdout.take().map(read_pipe), child.stderr.take().map(read_pipe)];
    let writer = child.stdin.take().map(|mut pipe| {
        let input = stdin.to_vec();
        thread::spawn(move || {
            // A child that exits without reading its input is not an error.
            let _ = pipe.write_all(&input);
        })
    });

    let status = loop {
        match child.try_wait().map_err(|e| e.to_string())? {
            Some(status) => break Some(status),
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            None => thread::sleep(Duration::from_millis(1)),
        }
    };
    if let Some(w) = writer {
        let _ = w.join();
    }
    let [out, err] = readers.map(|r| r.and_then(|h| h.join().ok()).unwrap_or_default());
    match status {
        Some(status) => Ok((status.code().unwrap_or(-1), out, err)),
        None => Ok((-1, out, format!("command timed out after {} ms", timeout.as_millis()).into_bytes())),
    }
}

fn read_pipe(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn arg_u32(args: &[Value], idx: usize) -> u32 {
    args.get(idx).and_then(Value::as_i32).unwrap_or_default() as u32
}

fn read_string(frame: &CallingFrame, ptr: u32, len: u32) -> Result<String, Error> {
    let mem = frame.memory().ok_or(Error::Trap(OOB_MEMORY_ACCESS))?;
    let mem = mem.borrow();
    let bytes = mem.read_bytes(ptr, len).map_err(Error::Trap)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn write_buffer(frame: &CallingFrame, ptr: u32, bytes: &[u8]) -> Result<Vec<Value>, Error> {
    let mem = frame.memory().ok_or(Error::Trap(OOB_MEMORY_ACCESS))?;
    mem.borrow_mut().write_bytes(ptr, bytes).map_err(Error::Trap)?;
    Ok(vec![])
}

/// Builds the `wagmi_process` import object backed by a fresh environment.
pub fn import_object() -> ImportObject {
    let env = Rc::new(RefCell::new(ProcessEnv::default()));
    let mut obj = ImportObject::with_env(MODULE_NAME, HostEnv::Process(env.clone()));

    let e = env.clone();
    obj.add_function("set_prog_name", HostFunction::new([I32, I32], [], move |frame, args| {
        let name = read_string(frame, arg_u32(args, 0), arg_u32(args, 1))?;
        e.borrow_mut().set_prog_name(name);
        Ok(vec![])
    }));
    let e = env.clone();
    obj.add_function("add_arg", HostFunction::new([I32, I32], [], move |frame, args| {
        let arg = read_string(frame, arg_u32(args, 0), arg_u32(args, 1))?;
        e.borrow_mut().add_arg(arg);
        Ok(vec![])
    }));
    let e = env.clone();
    obj.add_function("add_env", HostFunction::new([I32, I32, I32, I32], [], move |frame, args| {
        let key = read_string(frame, arg_u32(args, 0), arg_u32(args, 1))?;
        let value = read_string(frame, arg_u32(args, 2), arg_u32(args, 3))?;
        e.borrow_mut().add_env(key, value);
        Ok(vec![])
    }));
    let e = env.clone();
    obj.add_function("add_stdin", HostFunction::new([I32, I32], [], move |frame, args| {
        let mem = frame.memory().ok_or(Error::Trap(OOB_MEMORY_ACCESS))?;
        let mem = mem.borrow();
        let bytes = mem.read_bytes(arg_u32(args, 0), arg_u32(args, 1)).map_err(Error::Trap)?;
        e.borrow_mut().add_stdin(bytes);
        Ok(vec![])
    }));
    let e = env.clone();
    obj.add_function("set_timeout", HostFunction::new([I32], [], move |_frame, args| {
        e.borrow_mut().set_timeout(arg_u32(args, 0));
        Ok(vec![])
    }));
    let e = env.clone();
    obj.add_function("run", HostFunction::new([], [I32], move |_frame, _args| {
        Ok(vec![Value::I32(e.borrow_mut().run())])
    }));
    let e = env.clone();
    obj.add_function("get_exit_code", HostFunction::new([], [I32], move |_frame, _args| {
        Ok(vec![Value::I32(e.borrow().exit_code)])
    }));
    let e = env.clone();
    obj.add_function("get_stdout_len", HostFunction::new([], [I32], move |_frame, _args| {
        Ok(vec![Value::I32(e.borrow().stdout.len() as i32)])
    }));
    let e = env.clone();
    obj.add_function("get_stdout", HostFunction::new([I32], [], move |frame, args| {
        write_buffer(frame, arg_u32(args, 0), &e.borrow().stdout)
    }));
    let e = env.clone();
    obj.add_function("get_stderr_len", HostFunction::new([], [I32], move |_frame, _args| {
        Ok(vec![Value::I32(e.borrow().stderr.len() as i32)])
    }));
    let e = env;
    obj.add_function("get_stderr", HostFunction::new([I32], [], move |frame, args| {
        write_buffer(frame, arg_u32(args, 0), &e.borrow().stderr)
    }));
    obj
}
