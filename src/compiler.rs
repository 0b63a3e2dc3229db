//! Compiler module: postfixify instruction trees into lines.
//!
//! Each tree is linearized in post-order, operands before the operator that
//! consumes them. Control-flow bodies are compiled recursively into their own
//! lines in the program arena and referenced by `LineId`; they are never
//! inlined.

use std::sync::Arc;

use crate::config::Limits;
use crate::inst::{Inst, InstKind};
use crate::ir::{CaseTable, InstCode, ItemFlags, Line, LineId, LineItem, Op, Program};
use crate::types::FilterType;
use crate::CompileError;

/// Builds a `Program`. Lines compiled by one compiler may reference each
/// other (function calls), so a configuration uses a single compiler.
#[derive(Debug, Default)]
pub struct Compiler {
    program: Program,
    limits: Limits,
}

/// Frame layout of the function (or top-level line) being compiled. Nested
/// blocks share the frame of the function that contains them.
struct FrameScope {
    vars: u32,
    max_vars: u32,
}

impl FrameScope {
    fn touch(&mut self, slot: u32, lineno: u32) -> Result<(), CompileError> {
        match slot.checked_add(1) {
            Some(needed) if needed <= self.max_vars => {
                self.vars = self.vars.max(needed);
                Ok(())
            }
            _ => Err(CompileError::TooManyVariables { slot, max: self.max_vars, lineno }),
        }
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self { program: Program::new(), limits }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    /// Compiles one statement tree into a top-level line.
    pub fn postfixify(&mut self, root: &Inst) -> Result<LineId, CompileError> {
        self.postfixify_concat(std::slice::from_ref(root))
    }

    /// Compiles a sequence of statement trees into one top-level line, in
    /// declaration order. An empty sequence yields an empty line.
    pub fn postfixify_concat(&mut self, roots: &[Inst]) -> Result<LineId, CompileError> {
        self.compile_frame(0, roots, false)
    }

    /// Compiles a function body taking `args` arguments in slots `0..args`.
    pub fn compile_function(&mut self, args: u32, body: &[Inst]) -> Result<LineId, CompileError> {
        self.compile_frame(args, body, false)
    }

    /// Compiles an expression into a top-level line leaving its value on the
    /// stack, for evaluation with `Interpreter::eval_value`.
    pub fn compile_expression(&mut self, expr: &Inst) -> Result<LineId, CompileError> {
        self.compile_frame(0, std::slice::from_ref(expr), true)
    }

    fn compile_frame(&mut self, args: u32, body: &[Inst], expression: bool) -> Result<LineId, CompileError> {
        let mark = self.program.len();
        if args > self.limits.max_vars {
            return Err(CompileError::TooManyVariables { slot: args, max: self.limits.max_vars, lineno: 0 });
        }
        let mut scope = FrameScope { vars: args, max_vars: self.limits.max_vars };
        let res = self
            .compile_items(body, &mut scope, 0, expression)
            .and_then(|items| self.finish_line(Line::new(items).with_frame(args, scope.vars)));
        match res {
            Ok(id) => {
                tracing::debug!(line = %id, lines = self.program.len() - mark, "compiled filter line");
                Ok(id)
            }
            Err(e) => {
                self.program.truncate(mark);
                Err(e)
            }
        }
    }

    fn compile_nested(
        &mut self,
        body: &[Inst],
        scope: &mut FrameScope,
        depth: usize,
        expression: bool,
    ) -> Result<LineId, CompileError> {
        if depth > self.limits.max_depth {
            return Err(CompileError::NestingTooDeep { depth, max: self.limits.max_depth });
        }
        let items = self.compile_items(body, scope, depth, expression)?;
        self.finish_line(Line::new(items))
    }

    fn finish_line(&mut self, line: Line) -> Result<LineId, CompileError> {
        if line.len() > self.limits.max_line_len {
            return Err(CompileError::LineTooLong { len: line.len(), max: self.limits.max_line_len });
        }
        Ok(self.program.push(line))
    }

    fn compile_items(
        &mut self,
        body: &[Inst],
        scope: &mut FrameScope,
        depth: usize,
        expression: bool,
    ) -> Result<Vec<LineItem>, CompileError> {
        if expression && (body.len() != 1 || !body[0].produces_value()) {
            let lineno = body.first().map(|i| i.lineno).unwrap_or(0);
            return Err(malformed("expression expected", lineno));
        }
        let mut out = Vec::new();
        for stmt in body {
            if !expression && stmt.produces_value() {
                return Err(malformed(format!("{} used as a statement", stmt.code()), stmt.lineno));
            }
            self.emit(stmt, &mut out, scope, depth)?;
        }
        Ok(out)
    }

    /// Emits `inst` and its operands in post-order.
    fn emit(
        &mut self,
        inst: &Inst,
        out: &mut Vec<LineItem>,
        scope: &mut FrameScope,
        depth: usize,
    ) -> Result<(), CompileError> {
        let lineno = inst.lineno;
        match &inst.kind {
            InstKind::Op(op) => {
                self.check_op(op, inst)?;
                self.emit_operands(inst, out, scope, depth)?;
                match op {
                    Op::VarGet { slot, .. } | Op::VarSet { slot, .. } | Op::VarClear { slot, .. } => {
                        scope.touch(*slot, lineno)?
                    }
                    _ => {}
                }
                out.push(LineItem::new(op.clone(), lineno));
            }
            InstKind::And { rhs } | InstKind::Or { rhs } => {
                check_arity(inst, 1)?;
                check_operand_type(inst, 0, FilterType::Bool)?;
                if let Some(ty) = rhs.static_type().filter(|t| *t != FilterType::Bool) {
                    return Err(CompileError::TypeMismatch {
                        code: inst.code(),
                        index: 1,
                        expected: FilterType::Bool,
                        got: ty,
                        lineno,
                    });
                }
                self.emit_operands(inst, out, scope, depth)?;
                let rhs = self.compile_nested(std::slice::from_ref(rhs.as_ref()), scope, depth + 1, true)?;
                let op = match inst.kind {
                    InstKind::And { .. } => Op::And { rhs },
                    _ => Op::Or { rhs },
                };
                out.push(LineItem::new(op, lineno));
            }
            InstKind::Condition { then, otherwise } => {
                check_arity(inst, 1)?;
                check_operand_type(inst, 0, FilterType::Bool)?;
                self.emit_operands(inst, out, scope, depth)?;
                let then = self.compile_nested(then, scope, depth + 1, false)?;
                let otherwise = match otherwise {
                    Some(body) => Some(self.compile_nested(body, scope, depth + 1, false)?),
                    None => None,
                };
                out.push(LineItem::new(Op::Condition { then, otherwise }, lineno));
            }
            InstKind::Switch { arms, default } => {
                check_arity(inst, 1)?;
                self.emit_operands(inst, out, scope, depth)?;
                let mut table = Vec::new();
                for arm in arms {
                    let line = self.compile_nested(&arm.body, scope, depth + 1, false)?;
                    table.extend(arm.items.iter().cloned().map(|item| (item, line)));
                }
                let default = match default {
                    Some(body) => Some(self.compile_nested(body, scope, depth + 1, false)?),
                    None => None,
                };
                out.push(LineItem::new(Op::Switch(Arc::new(CaseTable::new(table, default))), lineno));
            }
            InstKind::ForEach { sym, slot, body } => {
                check_arity(inst, 1)?;
                if let Some(ty) = inst.args[0].static_type() {
                    if ty != FilterType::Path && ty != FilterType::Clist {
                        return Err(CompileError::TypeMismatch {
                            code: InstCode::ForEach,
                            index: 0,
                            expected: FilterType::Path,
                            got: ty,
                            lineno,
                        });
                    }
                }
                self.emit_operands(inst, out, scope, depth)?;
                scope.touch(*slot, lineno)?;
                let body = self.compile_nested(body, scope, depth + 1, false)?;
                out.push(LineItem::new(Op::ForEach { sym: sym.clone(), slot: *slot, body }, lineno));
            }
            InstKind::LocalDecl { sym, slot } => {
                scope.touch(*slot, lineno)?;
                match inst.args.len() {
                    1 => {
                        self.emit_operands(inst, out, scope, depth)?;
                        out.push(LineItem::new(Op::VarSet { sym: sym.clone(), slot: *slot }, lineno));
                    }
                    // A fresh frame starts with void slots, so only nested
                    // blocks need an explicit clear.
                    0 if depth == 0 => {}
                    0 => out.push(LineItem::new(Op::VarClear { sym: sym.clone(), slot: *slot }, lineno)),
                    got => {
                        return Err(CompileError::Arity { code: InstCode::VarSet, expected: 1, got, lineno });
                    }
                }
            }
            InstKind::Print { verdict } => {
                for msg in &inst.args {
                    if !msg.produces_value() {
                        return Err(malformed("print argument does not produce a value", msg.lineno));
                    }
                    self.emit(msg, out, scope, depth)?;
                    out.push(LineItem::new(Op::Print, msg.lineno));
                }
                let mut item = LineItem::new(Op::PrintAndDie(*verdict), lineno);
                if !inst.args.is_empty() {
                    item.flags.insert(ItemFlags::PRINTED);
                }
                out.push(item);
            }
        }
        Ok(())
    }

    fn emit_operands(
        &mut self,
        inst: &Inst,
        out: &mut Vec<LineItem>,
        scope: &mut FrameScope,
        depth: usize,
    ) -> Result<(), CompileError> {
        for arg in &inst.args {
            if !arg.produces_value() {
                return Err(malformed(
                    format!("operand {} of {} does not produce a value", arg.code(), inst.code()),
                    arg.lineno,
                ));
            }
            self.emit(arg, out, scope, depth)?;
        }
        Ok(())
    }

    /// Arity, operand types and line references of a plain operation.
    fn check_op(&self, op: &Op, inst: &Inst) -> Result<(), CompileError> {
        let lineno = inst.lineno;
        match op {
            Op::Call { func, args, sym } => {
                let line = self
                    .program
                    .line(*func)
                    .ok_or_else(|| malformed(format!("call of {} refers to unknown line {}", sym, func), lineno))?;
                if line.args() != *args {
                    return Err(CompileError::Arity {
                        code: InstCode::Call,
                        expected: line.args() as usize,
                        got: *args as usize,
                        lineno,
                    });
                }
            }
            op if !op.nested_lines().is_empty() => {
                return Err(malformed(format!("{} must be built from its body subtrees", op.code()), lineno));
            }
            _ => {}
        }
        check_arity(inst, op.stack_effect().0)?;
        match op {
            Op::StaticSet(sa) => check_attr_type(inst, sa.f_type),
            Op::DynamicSet(da) => check_attr_type(inst, da.f_type),
            op => {
                for (index, expected) in operand_types(op).iter().enumerate() {
                    if let Some(expected) = expected {
                        check_operand_type(inst, index, *expected)?;
                    }
                }
                check_operand_pair(op, inst)
            }
        }
    }
}

/// Binary operators whose operand types must agree with each other.
fn check_operand_pair(op: &Op, inst: &Inst) -> Result<(), CompileError> {
    let left = inst.args.first().and_then(Inst::static_type);
    let right = inst.args.get(1).and_then(Inst::static_type);
    let (Some(left), Some(right)) = (left, right) else {
        return Ok(());
    };
    let compatible = match op {
        Op::Lt | Op::Lte | Op::Gt | Op::Gte => left == right && left.is_ordered(),
        Op::Match | Op::NotMatch => left.can_match(right),
        _ => true,
    };
    if compatible {
        return Ok(());
    }
    Err(CompileError::TypeMismatch {
        code: inst.code(),
        index: 1,
        expected: left,
        got: right,
        lineno: inst.lineno,
    })
}

/// Statically required operand types; `None` for operands accepting
/// several types.
fn operand_types(op: &Op) -> &'static [Option<FilterType>] {
    const INT: Option<FilterType> = Some(FilterType::Int);
    const BOOL: Option<FilterType> = Some(FilterType::Bool);
    match op {
        Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Pair => &[INT, INT],
        Op::LcConstruct => &[INT, INT, INT],
        Op::EcConstruct(_) => &[None, INT],
        Op::Not | Op::Assert(_) => &[BOOL],
        Op::PathPrepend => &[Some(FilterType::Path), INT],
        Op::ClistAdd | Op::ClistDelete => &[Some(FilterType::Clist), None],
        Op::RoaCheck(_) => &[Some(FilterType::Net), INT],
        _ => &[],
    }
}

fn check_arity(inst: &Inst, expected: usize) -> Result<(), CompileError> {
    if inst.args.len() != expected {
        return Err(CompileError::Arity {
            code: inst.code(),
            expected,
            got: inst.args.len(),
            lineno: inst.lineno,
        });
    }
    Ok(())
}

fn check_operand_type(inst: &Inst, index: usize, expected: FilterType) -> Result<(), CompileError> {
    match inst.args.get(index).and_then(Inst::static_type) {
        Some(got) if got != expected => Err(CompileError::TypeMismatch {
            code: inst.code(),
            index,
            expected,
            got,
            lineno: inst.lineno,
        }),
        _ => Ok(()),
    }
}

fn check_attr_type(inst: &Inst, expected: FilterType) -> Result<(), CompileError> {
    match inst.args.first().and_then(Inst::static_type) {
        Some(got) if got != expected => Err(CompileError::AttributeTypeMismatch {
            expected,
            got,
            lineno: inst.lineno,
        }),
        _ => Ok(()),
    }
}

fn malformed(reason: impl Into<String>, lineno: u32) -> CompileError {
    CompileError::Malformed { reason: reason.into(), lineno }
}
