#![deny(unsafe_code)]

// Hot-path tracing that compiles away unless the wasm_debug feature is enabled
#[cfg(feature = "wasm_debug")]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*);
    };
}

#[cfg(not(feature = "wasm_debug"))]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_println;

mod byte_iter;
mod leb128;

pub mod capi;
pub mod config;
pub mod error;
pub mod host;
pub mod import;
pub mod instance;
mod instantiate;
pub mod interpreter;
pub mod memory;
pub mod module;
pub mod registry;
pub mod statistics;
pub mod store;
pub mod table;
pub mod types;
pub mod validator;
pub mod value;
pub mod vm;

pub use config::{Configure, HostRegistration, Proposal};
pub use error::{ErrCode, Error};
pub use host::process::ProcessEnv;
pub use host::wasi::WasiEnv;
pub use import::{CallingFrame, HostFunction, ImportObject};
pub use instance::{ExportValue, FunctionInstance, ModuleInstance};
pub use interpreter::Interpreter;
pub use memory::MemoryInstance;
pub use module::Module;
pub use registry::{ModuleRegistry, RegisteredModule};
pub use statistics::Statistics;
pub use store::Store;
pub use table::TableInstance;
pub use types::{FuncType, GlobalType, Limits, MemoryType, RefType, TableType, ValType};
pub use validator::Validator;
pub use value::{ExternRef, RawValue, Value};
pub use vm::{Op, Stage, StoreRef, Vm};
