//! Config module: static limits for compilation and evaluation.

use serde::{Deserialize, Serialize};

/// Limits enforced by the compiler. Filters that exceed them are rejected
/// at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of items in one compiled line.
    pub max_line_len: usize,
    /// Maximum nesting of lines below a top-level line.
    pub max_depth: usize,
    /// Maximum local variable slots (arguments included) of one frame.
    pub max_vars: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line_len: 65_535,
            max_depth: 64,
            max_vars: 65_535,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalOptions {
    /// Suppress `print` output.
    pub silent: bool,
    pub max_value_stack: usize,
    pub max_exec_stack: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            silent: false,
            max_value_stack: 4096,
            max_exec_stack: 2048,
        }
    }
}
