use thiserror::Error;

/// Outcome category reported across the embedding boundary.
///
/// `Success` and `Terminated` are the two non-error codes; every other code is
/// a failure. Discriminants are stable and shared with the C API.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrCode {
    Success = 0,
    Terminated = 1,
    LoadError = 2,
    ValidationError = 3,
    InstantiationError = 4,
    NameCollision = 5,
    ExecutionError = 6,
    WrongWorkflow = 7,
}

impl ErrCode {
    #[inline]
    pub fn is_ok(self) -> bool { matches!(self, ErrCode::Success | ErrCode::Terminated) }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(ErrCode::Success),
            1 => Some(ErrCode::Terminated),
            2 => Some(ErrCode::LoadError),
            3 => Some(ErrCode::ValidationError),
            4 => Some(ErrCode::InstantiationError),
            5 => Some(ErrCode::NameCollision),
            6 => Some(ErrCode::ExecutionError),
            7 => Some(ErrCode::WrongWorkflow),
            _ => None,
        }
    }

    pub fn message(self) -> &'static str {
        // Each literal carries a trailing NUL so the C API can hand it out as-is.
        let s = self.c_message();
        &s[..s.len() - 1]
    }

    pub(crate) fn c_message(self) -> &'static str {
        match self {
            ErrCode::Success => "success\0",
            ErrCode::Terminated => "terminated\0",
            ErrCode::LoadError => "load failed\0",
            ErrCode::ValidationError => "validation failed\0",
            ErrCode::InstantiationError => "instantiation failed\0",
            ErrCode::NameCollision => "module name conflict\0",
            ErrCode::ExecutionError => "execution failed\0",
            ErrCode::WrongWorkflow => "wrong VM workflow\0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    Malformed(&'static str),
    #[error("failed to read module: {0}")]
    Io(String),
    #[error("{0}")]
    Validation(&'static str),
    #[error("unknown import: {module}::{field}")]
    UnknownImport { module: String, field: String },
    #[error("{0}")]
    Link(&'static str),
    #[error("{0}")]
    Uninstantiable(&'static str),
    #[error("module name already registered: {0}")]
    NameCollision(String),
    #[error("{0}")]
    Trap(&'static str),
    #[error("function not found: {0}")]
    FuncNotFound(String),
    #[error("function signature mismatch")]
    SignatureMismatch,
    #[error("wrong VM workflow: {op} is not allowed in stage {stage}")]
    WrongWorkflow { op: &'static str, stage: &'static str },
    #[error("terminated")]
    Terminated,
}

impl Error {
    pub fn code(&self) -> ErrCode {
        match self {
            Error::Malformed(_) | Error::Io(_) => ErrCode::LoadError,
            Error::Validation(_) => ErrCode::ValidationError,
            Error::UnknownImport { .. } | Error::Link(_) | Error::Uninstantiable(_) => ErrCode::InstantiationError,
            Error::NameCollision(_) => ErrCode::NameCollision,
            Error::Trap(_) | Error::FuncNotFound(_) | Error::SignatureMismatch => ErrCode::ExecutionError,
            Error::WrongWorkflow { .. } => ErrCode::WrongWorkflow,
            Error::Terminated => ErrCode::Terminated,
        }
    }

    /// True for outcomes that pass the boolean success check.
    #[inline]
    pub fn is_ok(&self) -> bool { self.code().is_ok() }
}

#[inline(always)]
pub fn malformed<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Malformed(msg)) }
#[inline(always)]
pub fn validation<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Validation(msg)) }
#[inline(always)]
pub fn trap<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Trap(msg)) }
#[inline(always)]
pub fn link<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Link(msg)) }
#[inline(always)]
pub fn uninstantiable<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Uninstantiable(msg)) }

// Malformed errors
pub const END_EXPECTED: &str = "END opcode expected";
pub const FUNC_CODE_INCONSISTENT: &str = "function and code section have inconsistent lengths";
pub const DATA_COUNT_REQUIRED: &str = "data count section required";
pub const DATA_COUNT_INCONSISTENT: &str = "data count and data section have inconsistent lengths";
pub const INT_TOO_LARGE: &str = "integer too large";
pub const INT_TOO_LONG: &str = "integer representation too long";
pub const INVALID_MUTABILITY: &str = "malformed mutability";
pub const INVALID_SECTION_ID: &str = "malformed section id";
pub const INVALID_UTF8: &str = "malformed UTF-8 encoding";
pub const INVALID_VALUE_TYPE: &str = "malformed value type";
pub const INVALID_ELEM_KIND: &str = "malformed element kind";
pub const INVALID_DATA_SEG_FLAG: &str = "malformed data segment flag";
pub const INVALID_ELEM_SEG_FLAG: &str = "malformed elements segment kind";
pub const JUNK_AFTER_LAST: &str = "junk after last section";
pub const LENGTH_OUT_OF_BOUNDS: &str = "length out of bounds";
pub const NO_MAGIC_HEADER: &str = "magic header not detected";
pub const MALFORMED_IMPORT_KIND: &str = "malformed import kind";
pub const MALFORMED_EXPORT_KIND: &str = "malformed export kind";
pub const MALFORMED_REF_TYPE: &str = "malformed reference type";
pub const SECTION_SIZE_MISMATCH: &str = "section size mismatch";
pub const TOO_MANY_LOCALS: &str = "too many locals";
pub const UNEXPECTED_END: &str = "unexpected end of section or function";
pub const UNEXPECTED_END_SHORT: &str = "unexpected end";
pub const UNKNOWN_BINARY_VERSION: &str = "unknown binary version";
pub const ILLEGAL_OPCODE: &str = "illegal opcode";
pub const ZERO_BYTE_EXPECTED: &str = "zero byte expected";
// Validation errors
pub const ALIGNMENT_TOO_LARGE: &str = "alignment must not be larger than natural";
pub const CONST_EXP_REQUIRED: &str = "constant expression required";
pub const DUP_EXPORT_NAME: &str = "duplicate export name";
pub const ELSE_MUST_CLOSE_IF: &str = "else must close an if";
pub const GLOBAL_IS_IMMUTABLE: &str = "global is immutable";
pub const INVALID_RESULT_ARITY: &str = "invalid result arity";
pub const MEMORY_SIZE_LIMIT: &str = "memory size must be at most 65536 pages (4GiB)";
pub const MIN_GREATER_THAN_MAX: &str = "size minimum must not be greater than maximum";
pub const MULTIPLE_MEMORIES: &str = "multiple memories";
pub const MULTIPLE_TABLES: &str = "multiple tables";
pub const START_FUNC: &str = "start function";
pub const TYPE_MISMATCH: &str = "type mismatch";
pub const UNDECLARED_FUNC_REF: &str = "undeclared function reference";
pub const UNKNOWN_DATA: &str = "unknown data segment";
pub const UNKNOWN_ELEM: &str = "unknown elem segment";
pub const UNKNOWN_FUNC: &str = "unknown function";
pub const UNKNOWN_GLOBAL: &str = "unknown global";
pub const UNKNOWN_LABEL: &str = "unknown label";
pub const UNKNOWN_LOCAL: &str = "unknown local";
pub const UNKNOWN_MEMORY: &str = "unknown memory";
pub const UNKNOWN_TABLE: &str = "unknown table";
pub const UNKNOWN_TYPE: &str = "unknown type";
// Proposal gates
pub const MUT_GLOBAL_DISABLED: &str = "mutable globals cannot be imported or exported";
pub const SAT_TRUNC_DISABLED: &str = "non-trapping float-to-int conversions are disabled";
pub const SIGN_EXT_DISABLED: &str = "sign extension operators are disabled";
pub const MULTI_VALUE_DISABLED: &str = "multiple results are disabled";
pub const BULK_MEMORY_DISABLED: &str = "bulk memory operations are disabled";
pub const REF_TYPES_DISABLED: &str = "reference types are disabled";
pub const SIMD_DISABLED: &str = "SIMD is disabled";
// Trap errors
pub const DIVIDE_BY_ZERO: &str = "integer divide by zero";
pub const FUNC_NO_IMPL: &str = "function has no implementation";
pub const HOST_RESULT_MISMATCH: &str = "host function returned mismatched results";
pub const INDIRECT_CALL_MISMATCH: &str = "indirect call type mismatch";
pub const INTEGER_OVERFLOW: &str = "integer overflow";
pub const INVALID_CONV_TO_INT: &str = "invalid conversion to integer";
pub const OOB_MEMORY_ACCESS: &str = "out of bounds memory access";
pub const OOB_TABLE_ACCESS: &str = "out of bounds table access";
pub const STACK_EXHAUSTED: &str = "call stack exhausted";
pub const STACK_UNDERFLOW: &str = "value stack underflow";
pub const UNDEF_ELEM: &str = "undefined element";
pub const UNINITIALIZED_ELEM: &str = "uninitialized element";
pub const UNREACHABLE: &str = "unreachable";
// Link errors
pub const INCOMPATIBLE_IMPORT: &str = "incompatible import type";
pub const MEMORY_PAGE_LIMIT: &str = "memory pages exceed the configured limit";
