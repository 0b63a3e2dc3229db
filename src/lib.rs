//! Routefilter: a compiled, stack-based route filter engine.
//!
//! Filters arrive as instruction trees built by a configuration parser. The
//! compiler linearizes each tree into immutable lines of instructions
//! (postfix order, one nested line per control-flow body), and the interpreter
//! runs those lines against a route's attributes, ending with a verdict.
//!
//! # Architecture
//! - Value model (`types`, `set`)
//! - Attribute descriptors and the route collaborator (`attr`, `context`)
//! - Instruction trees and builder helpers (`inst`)
//! - Compiled lines and the line arena (`ir`)
//! - Postfixify compiler (`compiler`)
//! - Interpreter (`interpreter`), filters (`filter`), self-tests (`testsuite`)

mod attr;
mod compiler;
mod config;
mod context;
mod filter;
mod inst;
mod interpreter;
mod ir;
mod roa;
mod set;
mod testsuite;
mod types;

pub use attr::*;
pub use compiler::*;
pub use config::*;
pub use context::*;
pub use filter::*;
pub use inst::*;
pub use interpreter::*;
pub use ir::*;
pub use roa::*;
pub use set::*;
pub use testsuite::*;
pub use types::*;

/// Errors detected while compiling an instruction tree. Fatal to the
/// configuration being loaded; a failed compilation leaves no lines behind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("line {lineno}: {code} expects {expected} operand(s), got {got}")]
    Arity {
        code: InstCode,
        expected: usize,
        got: usize,
        lineno: u32,
    },
    #[error("line {lineno}: operand {index} of {code} must be {expected}, got {got}")]
    TypeMismatch {
        code: InstCode,
        index: usize,
        expected: FilterType,
        got: FilterType,
        lineno: u32,
    },
    #[error("line {lineno}: attribute of type {expected} cannot be set to {got}")]
    AttributeTypeMismatch {
        expected: FilterType,
        got: FilterType,
        lineno: u32,
    },
    #[error("compiled line has {len} items, limit is {max}")]
    LineTooLong { len: usize, max: usize },
    #[error("line {lineno}: variable slot {slot} exceeds the frame limit of {max} slots")]
    TooManyVariables { slot: u32, max: u32, lineno: u32 },
    #[error("blocks nested {depth} deep, limit is {max}")]
    NestingTooDeep { depth: usize, max: usize },
    #[error("line {lineno}: malformed instruction tree: {reason}")]
    Malformed { reason: String, lineno: u32 },
}

/// Errors raised while evaluating a compiled line. They end the evaluation of
/// one route with `Verdict::Error` and never leak into other evaluations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("attribute of type {expected} cannot be set to {got}")]
    AttributeTypeMismatch { expected: FilterType, got: FilterType },
    #[error("operand stack underflow in {0}")]
    StackUnderflow(InstCode),
    #[error("{0} stack overflow")]
    StackOverflow(&'static str),
    #[error("undefined value: {0}")]
    UndefinedValue(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown ROA table '{0}'")]
    UnknownTable(String),
    #[error("ROA check requested but no ROA tables are attached")]
    NoRoaTables,
    #[error("no assertion hook registered, can't assert")]
    NoAssertHook,
    #[error("reference to unknown line {0}")]
    UnknownLine(LineId),
    #[error("evaluation ended with verdict {0} where a value was expected")]
    UnexpectedVerdict(Verdict),
}

/// Unified error type for callers that compile and evaluate in one place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}
