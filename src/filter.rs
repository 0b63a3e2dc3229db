//! Filter module: compiled filters and the main execution API.
//!
//! This module provides the `Filter` type.

use std::fmt;
use std::sync::Arc;

use crate::compiler::Compiler;
use crate::context::ExecContext;
use crate::inst::Inst;
use crate::interpreter::{Interpreter, Outcome};
use crate::ir::{Line, LineId, LineItem, Op, Program};
use crate::types::{Value, Verdict};
use crate::{CompileError, EvalError};

/// A compiled filter, ready for execution. Cloning is cheap; clones share
/// the program.
#[derive(Debug, Clone)]
pub struct Filter {
    name: Arc<str>,
    program: Arc<Program>,
    root: LineId,
}

impl Filter {
    /// Wraps an entry line of an already compiled program.
    pub fn new(name: &str, program: Arc<Program>, root: LineId) -> Self {
        Self {
            name: name.into(),
            program,
            root,
        }
    }

    /// Compiles the statements of a filter body into a standalone program.
    pub fn compile(name: &str, body: &[Inst]) -> Result<Self, CompileError> {
        let mut compiler = Compiler::new();
        let root = compiler.postfixify_concat(body)?;
        Ok(Self::new(name, Arc::new(compiler.into_program()), root))
    }

    /// `where expr` filter: accept when `expr` holds, reject otherwise.
    pub fn new_where(name: &str, expr: Inst) -> Result<Self, CompileError> {
        let lineno = expr.lineno;
        let body = Inst::condition(
            expr,
            vec![Inst::die(Verdict::Accept).at(lineno)],
            Some(vec![Inst::die(Verdict::Reject).at(lineno)]),
        )
        .at(lineno);
        Self::compile(name, std::slice::from_ref(&body))
    }

    pub fn accept_all() -> Self {
        Self::constant("all", Verdict::Accept)
    }

    pub fn reject_all() -> Self {
        Self::constant("none", Verdict::Reject)
    }

    fn constant(name: &str, verdict: Verdict) -> Self {
        let mut program = Program::new();
        let root = program.push(Line::new(vec![LineItem::new(Op::Die(verdict), 0)]));
        Self::new(name, Arc::new(program), root)
    }

    pub fn run(&self, ctx: &mut ExecContext<'_>) -> Outcome {
        let outcome = Interpreter::new(&self.program).run(self.root, ctx);
        tracing::trace!(filter = %self.name, verdict = %outcome.verdict, "filter evaluated");
        outcome
    }

    /// Evaluates the entry line for its value instead of a verdict.
    pub fn eval_value(&self, ctx: &mut ExecContext<'_>) -> Result<Value, EvalError> {
        Interpreter::new(&self.program).eval_value(self.root, ctx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn root(&self) -> LineId {
        self.root
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "filter {}", self.name)?;
        f.write_str(&self.program.dump(self.root))
    }
}
