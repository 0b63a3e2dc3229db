//! Instruction tree module: the pre-compilation form of a filter.
//!
//! The configuration parser builds `Inst` trees bottom-up with symbols already
//! resolved. Operands are child nodes in `args`; control constructs carry their
//! bodies as nested statement lists, which the compiler turns into separate
//! lines.

use crate::attr::{DynamicAttr, StaticAttr};
use crate::ir::{InstCode, LineId, Op, Symbol};
use crate::roa::TableRef;
use crate::set::SetItem;
use crate::types::{FilterType, Value, Verdict};

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub kind: InstKind,
    /// Operand subtrees, evaluated left to right before this node.
    pub args: Vec<Inst>,
    pub lineno: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Operation without nested bodies, emitted as one line item.
    Op(Op),
    And { rhs: Box<Inst> },
    Or { rhs: Box<Inst> },
    Condition { then: Vec<Inst>, otherwise: Option<Vec<Inst>> },
    Switch { arms: Vec<CaseArm>, default: Option<Vec<Inst>> },
    ForEach { sym: Symbol, slot: u32, body: Vec<Inst> },
    /// Local variable declaration, with an optional initializer in `args`.
    LocalDecl { sym: Symbol, slot: u32 },
    /// `print`, `accept "msg"` and friends: every arg is printed, then the
    /// buffer is flushed and the verdict, if any, is returned.
    Print { verdict: Option<Verdict> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub items: Vec<SetItem>,
    pub body: Vec<Inst>,
}

impl Inst {
    pub fn new(kind: InstKind, args: Vec<Inst>) -> Self {
        Self { kind, args, lineno: 0 }
    }

    pub fn op(op: Op, args: Vec<Inst>) -> Self {
        Self::new(InstKind::Op(op), args)
    }

    pub fn at(mut self, lineno: u32) -> Self {
        self.lineno = lineno;
        self
    }

    pub fn code(&self) -> InstCode {
        match &self.kind {
            InstKind::Op(op) => op.code(),
            InstKind::And { .. } => InstCode::And,
            InstKind::Or { .. } => InstCode::Or,
            InstKind::Condition { .. } => InstCode::Condition,
            InstKind::Switch { .. } => InstCode::Switch,
            InstKind::ForEach { .. } => InstCode::ForEach,
            InstKind::LocalDecl { .. } => InstCode::VarSet,
            InstKind::Print { .. } => InstCode::PrintAndDie,
        }
    }

    /// Whether evaluating this node leaves exactly one value on the stack.
    pub fn produces_value(&self) -> bool {
        match &self.kind {
            InstKind::Op(op) => op.stack_effect().1 == 1,
            InstKind::And { .. } | InstKind::Or { .. } => true,
            _ => false,
        }
    }

    /// Type of the value this node produces, when known without evaluating.
    pub fn static_type(&self) -> Option<FilterType> {
        match &self.kind {
            InstKind::And { .. } | InstKind::Or { .. } => Some(FilterType::Bool),
            InstKind::Op(op) => match op {
                Op::Constant(v) | Op::ConstantDefined { value: v, .. } => Some(v.filter_type()),
                Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Length => Some(FilterType::Int),
                Op::Not
                | Op::Eq
                | Op::Neq
                | Op::Lt
                | Op::Lte
                | Op::Gt
                | Op::Gte
                | Op::Match
                | Op::NotMatch
                | Op::Defined
                | Op::IsV4 => Some(FilterType::Bool),
                Op::Pair => Some(FilterType::Pair),
                Op::EcConstruct(_) => Some(FilterType::Ec),
                Op::LcConstruct => Some(FilterType::Lc),
                Op::StaticGet(sa) => Some(sa.f_type),
                Op::DynamicGet(da) => Some(da.f_type),
                Op::PathPrepend => Some(FilterType::Path),
                Op::ClistAdd | Op::ClistDelete => Some(FilterType::Clist),
                Op::RoaCheck(_) => Some(FilterType::Roa),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn constant(v: Value) -> Self {
        Self::op(Op::Constant(v), vec![])
    }

    pub fn defined_constant(sym: Symbol, value: Value) -> Self {
        Self::op(Op::ConstantDefined { sym, value }, vec![])
    }

    pub fn var_get(sym: Symbol, slot: u32) -> Self {
        Self::op(Op::VarGet { sym, slot }, vec![])
    }

    pub fn var_set(sym: Symbol, slot: u32, value: Inst) -> Self {
        Self::op(Op::VarSet { sym, slot }, vec![value])
    }

    pub fn local(sym: Symbol, slot: u32, init: Option<Inst>) -> Self {
        Self::new(InstKind::LocalDecl { sym, slot }, init.into_iter().collect())
    }

    pub fn unary(op: Op, arg: Inst) -> Self {
        Self::op(op, vec![arg])
    }

    pub fn binary(op: Op, left: Inst, right: Inst) -> Self {
        Self::op(op, vec![left, right])
    }

    pub fn and(left: Inst, right: Inst) -> Self {
        Self::new(InstKind::And { rhs: Box::new(right) }, vec![left])
    }

    pub fn or(left: Inst, right: Inst) -> Self {
        Self::new(InstKind::Or { rhs: Box::new(right) }, vec![left])
    }

    pub fn condition(cond: Inst, then: Vec<Inst>, otherwise: Option<Vec<Inst>>) -> Self {
        Self::new(InstKind::Condition { then, otherwise }, vec![cond])
    }

    pub fn switch(value: Inst, arms: Vec<CaseArm>, default: Option<Vec<Inst>>) -> Self {
        Self::new(InstKind::Switch { arms, default }, vec![value])
    }

    pub fn for_each(sym: Symbol, slot: u32, source: Inst, body: Vec<Inst>) -> Self {
        Self::new(InstKind::ForEach { sym, slot, body }, vec![source])
    }

    /// Call of an already compiled function line.
    pub fn call(sym: Symbol, func: LineId, args: Vec<Inst>) -> Self {
        let count = args.len() as u32;
        Self::op(Op::Call { sym, func, args: count }, args)
    }

    /// Function call used as a statement; its result is discarded.
    pub fn call_statement(sym: Symbol, func: LineId, args: Vec<Inst>) -> Self {
        Self::op(Op::DropResult, vec![Self::call(sym, func, args)])
    }

    pub fn ret(value: Inst) -> Self {
        Self::op(Op::Return, vec![value])
    }

    pub fn die(verdict: Verdict) -> Self {
        Self::op(Op::Die(verdict), vec![])
    }

    pub fn print_and_die(verdict: Option<Verdict>, messages: Vec<Inst>) -> Self {
        Self::new(InstKind::Print { verdict }, messages)
    }

    pub fn assert(cond: Inst, text: &str) -> Self {
        Self::op(Op::Assert(text.into()), vec![cond])
    }

    pub fn static_get(attr: StaticAttr) -> Self {
        Self::op(Op::StaticGet(attr), vec![])
    }

    pub fn static_set(attr: StaticAttr, value: Inst) -> Self {
        Self::op(Op::StaticSet(attr), vec![value])
    }

    pub fn dynamic_get(attr: DynamicAttr) -> Self {
        Self::op(Op::DynamicGet(attr), vec![])
    }

    pub fn dynamic_set(attr: DynamicAttr, value: Inst) -> Self {
        Self::op(Op::DynamicSet(attr), vec![value])
    }

    pub fn dynamic_unset(attr: DynamicAttr) -> Self {
        Self::op(Op::DynamicUnset(attr), vec![])
    }

    /// `attr = code(attr, argument)` for list-modifying operations such as
    /// `bgp_path.prepend(x)` or `bgp_community.add(x)`. Returns `None` for
    /// codes that are not list modifiers.
    pub fn generate_complex(code: InstCode, attr: DynamicAttr, argument: Inst) -> Option<Self> {
        let op = match code {
            InstCode::PathPrepend => Op::PathPrepend,
            InstCode::ClistAdd => Op::ClistAdd,
            InstCode::ClistDelete => Op::ClistDelete,
            _ => return None,
        };
        let lineno = argument.lineno;
        let modified = Self::binary(op, Self::dynamic_get(attr).at(lineno), argument).at(lineno);
        Some(Self::dynamic_set(attr, modified).at(lineno))
    }

    /// `roa_check(table, prefix, asn)`.
    pub fn generate_roa_check(table: TableRef, prefix: Inst, asn: Inst) -> Self {
        let lineno = prefix.lineno;
        Self::binary(Op::RoaCheck(table), prefix, asn).at(lineno)
    }
}
