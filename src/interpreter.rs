//! Interpreter module: runs compiled lines against a route.
//!
//! Evaluation state (operand stack, frame stack, local variables, print
//! buffer) lives in a per-call `Vm`, so a `Program` can be evaluated from
//! many threads at once. Verdicts end evaluation through `Exit`, returned
//! straight out of the dispatch loop.

use std::fmt::Write as _;
use std::mem;

use crate::attr::{DynamicAttr, StaticAttr};
use crate::context::ExecContext;
use crate::ir::{InstCode, ItemFlags, Line, LineId, LineItem, Op, Program};
use crate::types::{FilterType, Value, Verdict};
use crate::EvalError;

/// Result of running a filter on one route.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Set when the verdict is `Error`.
    pub error: Option<EvalError>,
    /// Flushed `print` output, in order.
    pub messages: Vec<String>,
}

/// Entry points for evaluating lines of one program.
#[derive(Debug, Clone, Copy)]
pub struct Interpreter<'p> {
    program: &'p Program,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self { program }
    }

    /// Runs `line` as a filter. Falling off the end yields `Unknown`; any
    /// evaluation error yields `Error`.
    pub fn run(&self, line: LineId, ctx: &mut ExecContext<'_>) -> Outcome {
        let mut vm = Vm::new(self.program, ctx);
        let res = vm.execute(line);
        let verdict = match &res {
            Ok(Exit::Verdict(v)) => *v,
            Ok(Exit::Returned(_)) | Ok(Exit::Fallthrough) => Verdict::Unknown,
            Err(e) => {
                tracing::debug!(line = %line, error = %e, "filter evaluation failed");
                Verdict::Error
            }
        };
        Outcome {
            verdict,
            error: res.err(),
            messages: vm.messages,
        }
    }

    /// Evaluates an expression line or a function line to its value.
    pub fn eval_value(&self, line: LineId, ctx: &mut ExecContext<'_>) -> Result<Value, EvalError> {
        let mut vm = Vm::new(self.program, ctx);
        match vm.execute(line)? {
            Exit::Returned(v) => Ok(v),
            Exit::Fallthrough => vm.stack.pop().ok_or(EvalError::StackUnderflow(InstCode::Return)),
            Exit::Verdict(v) => Err(EvalError::UnexpectedVerdict(v)),
        }
    }
}

enum Exit {
    Verdict(Verdict),
    /// `return` from the outermost function.
    Returned(Value),
    /// End of the top-level line.
    Fallthrough,
}

enum FrameKind {
    /// Branch or case arm: statements, leaves nothing.
    Block,
    /// Right-hand side of `and`/`or`: leaves exactly one value.
    Expression,
    Function { locals_base: usize, caller_base: usize },
    Loop { var: usize, items: Vec<Value>, next: usize },
}

struct Frame<'p> {
    line: &'p Line,
    pos: usize,
    /// Operand stack depth at entry; the frame never pops below it.
    stack_base: usize,
    code: InstCode,
    kind: FrameKind,
}

struct Vm<'p, 'c, 'a> {
    program: &'p Program,
    ctx: &'c mut ExecContext<'a>,
    stack: Vec<Value>,
    frames: Vec<Frame<'p>>,
    locals: Vec<Value>,
    /// Locals window of the innermost function.
    base: usize,
    buffer: String,
    messages: Vec<String>,
}

impl<'p, 'c, 'a> Vm<'p, 'c, 'a> {
    fn new(program: &'p Program, ctx: &'c mut ExecContext<'a>) -> Self {
        Self {
            program,
            ctx,
            stack: Vec::new(),
            frames: Vec::new(),
            locals: Vec::new(),
            base: 0,
            buffer: String::new(),
            messages: Vec::new(),
        }
    }

    fn line(&self, id: LineId) -> Result<&'p Line, EvalError> {
        let program: &'p Program = self.program;
        program.line(id).ok_or(EvalError::UnknownLine(id))
    }

    fn execute(&mut self, entry: LineId) -> Result<Exit, EvalError> {
        let line = self.line(entry)?;
        self.locals.resize(line.vars() as usize, Value::Void);
        self.frames.push(Frame {
            line,
            pos: 0,
            stack_base: 0,
            code: InstCode::Call,
            kind: FrameKind::Function { locals_base: 0, caller_base: 0 },
        });
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Exit::Fallthrough);
            };
            let line = frame.line;
            let Some(item) = line.items().get(frame.pos) else {
                if let Some(exit) = self.leave_frame()? {
                    return Ok(exit);
                }
                continue;
            };
            frame.pos += 1;
            if let Some(exit) = self.step(item)? {
                return Ok(exit);
            }
        }
    }

    fn enter(&mut self, id: LineId, code: InstCode, kind: FrameKind) -> Result<(), EvalError> {
        if self.frames.len() >= self.ctx.options.max_exec_stack {
            return Err(EvalError::StackOverflow("execution"));
        }
        let line = self.line(id)?;
        self.frames.push(Frame {
            line,
            pos: 0,
            stack_base: self.stack.len(),
            code,
            kind,
        });
        Ok(())
    }

    /// The innermost frame ran off its end.
    fn leave_frame(&mut self) -> Result<Option<Exit>, EvalError> {
        if let Some(frame) = self.frames.last_mut() {
            if let FrameKind::Loop { var, items, next } = &mut frame.kind {
                if let Some(v) = items.get(*next) {
                    self.locals[*var] = v.clone();
                    *next += 1;
                    frame.pos = 0;
                    self.stack.truncate(frame.stack_base);
                    return Ok(None);
                }
            }
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(Some(Exit::Fallthrough));
        };
        match frame.kind {
            FrameKind::Block | FrameKind::Loop { .. } => self.stack.truncate(frame.stack_base),
            FrameKind::Expression => {
                if self.stack.len() <= frame.stack_base {
                    return Err(EvalError::StackUnderflow(frame.code));
                }
                self.stack.truncate(frame.stack_base + 1);
            }
            FrameKind::Function { locals_base, caller_base } => {
                if self.frames.is_empty() {
                    return Ok(Some(Exit::Fallthrough));
                }
                self.stack.truncate(frame.stack_base);
                self.locals.truncate(locals_base);
                self.base = caller_base;
                self.push(Value::Void)?;
            }
        }
        Ok(None)
    }

    /// Unwinds to the innermost function frame and hands `value` to its caller.
    fn do_return(&mut self, value: Value) -> Result<Option<Exit>, EvalError> {
        while let Some(frame) = self.frames.pop() {
            if let FrameKind::Function { locals_base, caller_base } = frame.kind {
                if self.frames.is_empty() {
                    return Ok(Some(Exit::Returned(value)));
                }
                self.stack.truncate(frame.stack_base);
                self.locals.truncate(locals_base);
                self.base = caller_base;
                self.push(value)?;
                return Ok(None);
            }
        }
        Ok(Some(Exit::Returned(value)))
    }

    fn push(&mut self, v: Value) -> Result<(), EvalError> {
        if self.stack.len() >= self.ctx.options.max_value_stack {
            return Err(EvalError::StackOverflow("value"));
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self, code: InstCode) -> Result<Value, EvalError> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(EvalError::StackUnderflow(code));
        }
        self.stack.pop().ok_or(EvalError::StackUnderflow(code))
    }

    fn store(&mut self, index: usize, v: Value) -> Result<(), EvalError> {
        match self.locals.get_mut(index) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(EvalError::UndefinedValue(format!("no storage for local slot {}", index))),
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let msg = mem::take(&mut self.buffer);
        if self.ctx.options.silent {
            return;
        }
        tracing::info!(target: "routefilter::print", "{}", msg);
        self.messages.push(msg);
    }

    fn step(&mut self, item: &'p LineItem) -> Result<Option<Exit>, EvalError> {
        let code = item.code();
        match &item.op {
            Op::Constant(v) | Op::ConstantDefined { value: v, .. } => self.push(v.clone())?,
            Op::VarGet { sym, slot } => {
                let v = self
                    .locals
                    .get(self.base + *slot as usize)
                    .cloned()
                    .ok_or_else(|| EvalError::UndefinedValue(format!("variable {} has no storage", sym)))?;
                self.push(v)?;
            }
            Op::VarSet { slot, .. } => {
                let v = self.pop(code)?;
                self.store(self.base + *slot as usize, v)?;
            }
            Op::VarClear { slot, .. } => self.store(self.base + *slot as usize, Value::Void)?,
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide => {
                let r = self.pop(code)?.as_int()?;
                let l = self.pop(code)?.as_int()?;
                self.push(Value::Int(arithmetic(&item.op, l, r)?))?;
            }
            Op::And { rhs } => {
                if self.pop(code)?.as_bool()? {
                    self.enter(*rhs, code, FrameKind::Expression)?;
                } else {
                    self.push(Value::Bool(false))?;
                }
            }
            Op::Or { rhs } => {
                if self.pop(code)?.as_bool()? {
                    self.push(Value::Bool(true))?;
                } else {
                    self.enter(*rhs, code, FrameKind::Expression)?;
                }
            }
            Op::Not => {
                let b = self.pop(code)?.as_bool()?;
                self.push(Value::Bool(!b))?;
            }
            Op::Pair => {
                let b = self.pop(code)?;
                let a = self.pop(code)?;
                self.push(Value::pair(&a, &b)?)?;
            }
            Op::EcConstruct(kind) => {
                let val = self.pop(code)?;
                let key = self.pop(code)?;
                self.push(Value::ec(*kind, &key, &val)?)?;
            }
            Op::LcConstruct => {
                let c = self.pop(code)?;
                let b = self.pop(code)?;
                let a = self.pop(code)?;
                self.push(Value::lc(&a, &b, &c)?)?;
            }
            Op::Eq | Op::Neq => {
                let r = self.pop(code)?;
                let l = self.pop(code)?;
                self.push(Value::Bool((l == r) == matches!(item.op, Op::Eq)))?;
            }
            Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
                let r = self.pop(code)?;
                let l = self.pop(code)?;
                let ord = l.compare(&r)?;
                let res = match item.op {
                    Op::Lt => ord.is_lt(),
                    Op::Lte => ord.is_le(),
                    Op::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                self.push(Value::Bool(res))?;
            }
            Op::Match | Op::NotMatch => {
                let pattern = self.pop(code)?;
                let v = self.pop(code)?;
                let m = v.matches(&pattern)?;
                self.push(Value::Bool(m == matches!(item.op, Op::Match)))?;
            }
            Op::Defined => {
                let v = self.pop(code)?;
                self.push(Value::Bool(v.is_defined()))?;
            }
            Op::Length => {
                let v = self.pop(code)?;
                self.push(Value::Int(v.length()?))?;
            }
            Op::IsV4 => {
                let v = self.pop(code)?;
                self.push(Value::Bool(v.is_v4()?))?;
            }
            Op::StaticGet(sa) => {
                let v = self.ctx.route.get_static(sa).unwrap_or_else(|| Value::default_for(sa.f_type));
                self.push(v)?;
            }
            Op::StaticSet(sa) => {
                let v = self.pop(code)?;
                self.set_static(sa, v)?;
            }
            Op::DynamicGet(da) => {
                let v = self.get_dynamic(da)?;
                self.push(v)?;
            }
            Op::DynamicSet(da) => {
                let v = self.pop(code)?;
                self.set_dynamic(da, v)?;
            }
            Op::DynamicUnset(da) => {
                if da.is_bitfield() {
                    self.write_bit(da, false)?;
                } else {
                    self.ctx.route.unset_dynamic(da);
                }
            }
            Op::PathPrepend => {
                let asn = self.pop(code)?.as_asn()?;
                match self.pop(code)? {
                    Value::Path(p) => self.push(Value::path(std::iter::once(asn).chain(p.iter().copied())))?,
                    other => return Err(type_mismatch("path prepend needs a path", &other)),
                }
            }
            Op::ClistAdd => {
                let v = self.pop(code)?;
                let list = self.pop(code)?;
                self.push(clist_add(&list, &v)?)?;
            }
            Op::ClistDelete => {
                let v = self.pop(code)?;
                let list = self.pop(code)?;
                self.push(clist_delete(&list, &v)?)?;
            }
            Op::RoaCheck(table) => {
                let asn = self.pop(code)?.as_asn()?;
                let net = match self.pop(code)? {
                    Value::Net(net) => net,
                    other => return Err(type_mismatch("ROA check needs a prefix", &other)),
                };
                let roa = self.ctx.roa.ok_or(EvalError::NoRoaTables)?;
                let res = roa
                    .roa_check(table, &net, asn)
                    .ok_or_else(|| EvalError::UnknownTable(table.name().to_string()))?;
                self.push(Value::Roa(res))?;
            }
            Op::Condition { then, otherwise } => {
                if self.pop(code)?.as_bool()? {
                    self.enter(*then, code, FrameKind::Block)?;
                } else if let Some(otherwise) = otherwise {
                    self.enter(*otherwise, code, FrameKind::Block)?;
                }
            }
            Op::Switch(table) => {
                let v = self.pop(code)?;
                if let Some(arm) = table.find(&v)? {
                    self.enter(arm, code, FrameKind::Block)?;
                }
            }
            Op::ForEach { slot, body, .. } => {
                let items: Vec<Value> = match self.pop(code)? {
                    Value::Path(p) => p.iter().map(|asn| Value::Int(i64::from(*asn))).collect(),
                    Value::Clist(c) => c.iter().map(|(a, b)| Value::Pair(*a, *b)).collect(),
                    other => return Err(type_mismatch("for needs a path or clist", &other)),
                };
                if let Some(first) = items.first().cloned() {
                    let var = self.base + *slot as usize;
                    self.store(var, first)?;
                    self.enter(*body, code, FrameKind::Loop { var, items, next: 1 })?;
                }
            }
            Op::Call { func, args, .. } => {
                let line = self.line(*func)?;
                let mut argv = Vec::with_capacity(*args as usize);
                for _ in 0..*args {
                    argv.push(self.pop(code)?);
                }
                argv.reverse();
                let locals_base = self.locals.len();
                let size = (line.vars() as usize).max(argv.len());
                self.locals.extend(argv);
                self.locals.resize(locals_base + size, Value::Void);
                let caller_base = self.base;
                self.enter(*func, code, FrameKind::Function { locals_base, caller_base })?;
                self.base = locals_base;
            }
            Op::DropResult => {
                self.pop(code)?;
            }
            Op::Return => {
                let v = self.pop(code)?;
                return self.do_return(v);
            }
            Op::Print => {
                let v = self.pop(code)?;
                if !self.buffer.is_empty() {
                    self.buffer.push(' ');
                }
                let _ = write!(self.buffer, "{}", v);
            }
            Op::PrintAndDie(verdict) => {
                if verdict.is_none() || item.flags.contains(ItemFlags::PRINTED) {
                    self.flush();
                }
                if let Some(v) = verdict {
                    return Ok(Some(Exit::Verdict(*v)));
                }
            }
            Op::Die(v) => return Ok(Some(Exit::Verdict(*v))),
            Op::Assert(_) => {
                let result = self.pop(code)?.as_bool()?;
                match self.ctx.hook.as_deref_mut() {
                    Some(hook) => hook.assert(result, item),
                    None => return Err(EvalError::NoAssertHook),
                }
            }
        }
        Ok(None)
    }

    fn set_static(&mut self, sa: &StaticAttr, v: Value) -> Result<(), EvalError> {
        if sa.readonly {
            tracing::warn!(code = sa.code, "attempt to set read-only attribute ignored");
            return Ok(());
        }
        check_attr_type(sa.f_type, &v)?;
        self.ctx.route.set_static(sa, v);
        Ok(())
    }

    fn get_dynamic(&self, da: &DynamicAttr) -> Result<Value, EvalError> {
        if da.is_bitfield() {
            let mask = bit_mask(da)?;
            return Ok(Value::Bool(self.current_bits(da)? & mask != 0));
        }
        Ok(self.ctx.route.get_dynamic(da).unwrap_or_else(|| Value::default_for(da.f_type)))
    }

    fn set_dynamic(&mut self, da: &DynamicAttr, v: Value) -> Result<(), EvalError> {
        check_attr_type(da.f_type, &v)?;
        if da.is_bitfield() {
            return self.write_bit(da, v.as_bool()?);
        }
        self.ctx.route.set_dynamic(da, v);
        Ok(())
    }

    fn current_bits(&self, da: &DynamicAttr) -> Result<i64, EvalError> {
        match self.ctx.route.get_dynamic(da) {
            None => Ok(0),
            Some(Value::Int(bits)) => Ok(bits),
            Some(other) => Err(type_mismatch("bitfield attribute must hold an integer", &other)),
        }
    }

    fn write_bit(&mut self, da: &DynamicAttr, on: bool) -> Result<(), EvalError> {
        let mask = bit_mask(da)?;
        let bits = self.current_bits(da)?;
        let bits = if on { bits | mask } else { bits & !mask };
        self.ctx.route.set_dynamic(da, Value::Int(bits));
        Ok(())
    }
}

fn bit_mask(da: &DynamicAttr) -> Result<i64, EvalError> {
    1i64.checked_shl(u32::from(da.bit))
        .ok_or_else(|| EvalError::InvalidValue(format!("bit {} out of range", da.bit)))
}

fn check_attr_type(expected: FilterType, v: &Value) -> Result<(), EvalError> {
    let got = v.filter_type();
    if got != expected {
        return Err(EvalError::AttributeTypeMismatch { expected, got });
    }
    Ok(())
}

fn type_mismatch(what: &str, got: &Value) -> EvalError {
    EvalError::TypeMismatch(format!("{}, got {}", what, got.filter_type()))
}

fn arithmetic(op: &Op, l: i64, r: i64) -> Result<i64, EvalError> {
    let res = match op {
        Op::Add => l.checked_add(r),
        Op::Subtract => l.checked_sub(r),
        Op::Multiply => l.checked_mul(r),
        _ => {
            if r == 0 {
                return Err(EvalError::Arithmetic("division by zero".to_string()));
            }
            l.checked_div(r)
        }
    };
    res.ok_or_else(|| EvalError::Arithmetic(format!("overflow in {}", op.code())))
}

fn clist_add(list: &Value, v: &Value) -> Result<Value, EvalError> {
    let Value::Clist(list) = list else {
        return Err(type_mismatch("community add needs a clist", list));
    };
    let mut out = list.to_vec();
    let add: Vec<(u16, u16)> = match v {
        Value::Pair(a, b) => vec![(*a, *b)],
        Value::Clist(other) => other.to_vec(),
        other => return Err(type_mismatch("can't add to clist", other)),
    };
    for pair in add {
        if !out.contains(&pair) {
            out.push(pair);
        }
    }
    Ok(Value::Clist(out.into()))
}

fn clist_delete(list: &Value, v: &Value) -> Result<Value, EvalError> {
    let Value::Clist(list) = list else {
        return Err(type_mismatch("community delete needs a clist", list));
    };
    let mut out = Vec::with_capacity(list.len());
    for (a, b) in list.iter().copied() {
        let remove = match v {
            Value::Pair(x, y) => (a, b) == (*x, *y),
            Value::Clist(other) => other.contains(&(a, b)),
            Value::Set(set) => set.contains(&Value::Pair(a, b))?,
            other => return Err(type_mismatch("can't delete from clist", other)),
        };
        if !remove {
            out.push((a, b));
        }
    }
    Ok(Value::Clist(out.into()))
}
