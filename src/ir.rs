//! Intermediate Representation (IR) for the filter engine.
//!
//! A compiled filter is a `Program`: an arena of immutable `Line`s. Each line
//! is a flat sequence of `LineItem`s in postfix order. Control-flow bodies are
//! separate lines referenced by `LineId`.

use std::fmt;
use std::sync::Arc;

use crate::attr::{DynamicAttr, StaticAttr};
use crate::roa::TableRef;
use crate::set::SetItem;
use crate::types::{EcSubtype, Value, Verdict};
use crate::EvalError;

/// Handle of a line inside its `Program`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub(crate) u32);

impl LineId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A resolved configuration symbol (variable, constant or function name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Instruction code: which operation an item or tree node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstCode {
    Constant,
    ConstantDefined,
    VarGet,
    VarSet,
    VarClear,
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Not,
    Pair,
    EcConstruct,
    LcConstruct,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Match,
    NotMatch,
    Defined,
    Length,
    IsV4,
    StaticGet,
    StaticSet,
    DynamicGet,
    DynamicSet,
    DynamicUnset,
    PathPrepend,
    ClistAdd,
    ClistDelete,
    RoaCheck,
    Condition,
    Switch,
    ForEach,
    Call,
    DropResult,
    Return,
    Print,
    PrintAndDie,
    Die,
    Assert,
}

impl InstCode {
    pub fn name(self) -> &'static str {
        match self {
            InstCode::Constant => "CONSTANT",
            InstCode::ConstantDefined => "CONSTANT_DEFINED",
            InstCode::VarGet => "VAR_GET",
            InstCode::VarSet => "VAR_SET",
            InstCode::VarClear => "VAR_CLEAR",
            InstCode::Add => "ADD",
            InstCode::Subtract => "SUBTRACT",
            InstCode::Multiply => "MULTIPLY",
            InstCode::Divide => "DIVIDE",
            InstCode::And => "AND",
            InstCode::Or => "OR",
            InstCode::Not => "NOT",
            InstCode::Pair => "PAIR_CONSTRUCT",
            InstCode::EcConstruct => "EC_CONSTRUCT",
            InstCode::LcConstruct => "LC_CONSTRUCT",
            InstCode::Eq => "EQ",
            InstCode::Neq => "NEQ",
            InstCode::Lt => "LT",
            InstCode::Lte => "LTE",
            InstCode::Gt => "GT",
            InstCode::Gte => "GTE",
            InstCode::Match => "MATCH",
            InstCode::NotMatch => "NOT_MATCH",
            InstCode::Defined => "DEFINED",
            InstCode::Length => "LENGTH",
            InstCode::IsV4 => "IS_V4",
            InstCode::StaticGet => "RTA_GET",
            InstCode::StaticSet => "RTA_SET",
            InstCode::DynamicGet => "EA_GET",
            InstCode::DynamicSet => "EA_SET",
            InstCode::DynamicUnset => "EA_UNSET",
            InstCode::PathPrepend => "PATH_PREPEND",
            InstCode::ClistAdd => "CLIST_ADD",
            InstCode::ClistDelete => "CLIST_DEL",
            InstCode::RoaCheck => "ROA_CHECK",
            InstCode::Condition => "CONDITION",
            InstCode::Switch => "SWITCH",
            InstCode::ForEach => "FOR_EACH",
            InstCode::Call => "CALL",
            InstCode::DropResult => "DROP_RESULT",
            InstCode::Return => "RETURN",
            InstCode::Print => "PRINT",
            InstCode::PrintAndDie => "PRINT_AND_DIE",
            InstCode::Die => "DIE",
            InstCode::Assert => "ASSERT",
        }
    }
}

impl fmt::Display for InstCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Case dispatch table of a `Switch` item. Arms are tried in order; the
/// first one containing the value wins.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseTable {
    arms: Vec<(SetItem, LineId)>,
    default: Option<LineId>,
}

impl CaseTable {
    pub fn new(arms: Vec<(SetItem, LineId)>, default: Option<LineId>) -> Self {
        Self { arms, default }
    }

    pub fn find(&self, v: &Value) -> Result<Option<LineId>, EvalError> {
        for (item, line) in &self.arms {
            if item.from().filter_type() == v.filter_type() && item.contains(v)? {
                return Ok(Some(*line));
            }
        }
        Ok(self.default)
    }

    pub fn lines(&self) -> impl Iterator<Item = LineId> + '_ {
        self.arms.iter().map(|(_, l)| *l).chain(self.default)
    }
}

/// Operation and payload of one line item. The variant is the instruction
/// code, so only the payload belonging to that code can be read.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Constant(Value),
    /// Value of a named constant, kept with its symbol for diagnostics.
    ConstantDefined { sym: Symbol, value: Value },
    VarGet { sym: Symbol, slot: u32 },
    VarSet { sym: Symbol, slot: u32 },
    VarClear { sym: Symbol, slot: u32 },
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Short-circuit: the rhs line runs only when the lhs is true.
    And { rhs: LineId },
    Or { rhs: LineId },
    Not,
    Pair,
    EcConstruct(EcSubtype),
    LcConstruct,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Match,
    NotMatch,
    Defined,
    Length,
    IsV4,
    StaticGet(StaticAttr),
    StaticSet(StaticAttr),
    DynamicGet(DynamicAttr),
    DynamicSet(DynamicAttr),
    DynamicUnset(DynamicAttr),
    PathPrepend,
    ClistAdd,
    ClistDelete,
    RoaCheck(TableRef),
    Condition { then: LineId, otherwise: Option<LineId> },
    Switch(Arc<CaseTable>),
    ForEach { sym: Symbol, slot: u32, body: LineId },
    Call { sym: Symbol, func: LineId, args: u32 },
    DropResult,
    Return,
    Print,
    /// Flush the print buffer, then end with the verdict if there is one.
    PrintAndDie(Option<Verdict>),
    Die(Verdict),
    /// Assertion with the asserted expression's source text.
    Assert(Arc<str>),
}

impl Op {
    pub fn code(&self) -> InstCode {
        match self {
            Op::Constant(_) => InstCode::Constant,
            Op::ConstantDefined { .. } => InstCode::ConstantDefined,
            Op::VarGet { .. } => InstCode::VarGet,
            Op::VarSet { .. } => InstCode::VarSet,
            Op::VarClear { .. } => InstCode::VarClear,
            Op::Add => InstCode::Add,
            Op::Subtract => InstCode::Subtract,
            Op::Multiply => InstCode::Multiply,
            Op::Divide => InstCode::Divide,
            Op::And { .. } => InstCode::And,
            Op::Or { .. } => InstCode::Or,
            Op::Not => InstCode::Not,
            Op::Pair => InstCode::Pair,
            Op::EcConstruct(_) => InstCode::EcConstruct,
            Op::LcConstruct => InstCode::LcConstruct,
            Op::Eq => InstCode::Eq,
            Op::Neq => InstCode::Neq,
            Op::Lt => InstCode::Lt,
            Op::Lte => InstCode::Lte,
            Op::Gt => InstCode::Gt,
            Op::Gte => InstCode::Gte,
            Op::Match => InstCode::Match,
            Op::NotMatch => InstCode::NotMatch,
            Op::Defined => InstCode::Defined,
            Op::Length => InstCode::Length,
            Op::IsV4 => InstCode::IsV4,
            Op::StaticGet(_) => InstCode::StaticGet,
            Op::StaticSet(_) => InstCode::StaticSet,
            Op::DynamicGet(_) => InstCode::DynamicGet,
            Op::DynamicSet(_) => InstCode::DynamicSet,
            Op::DynamicUnset(_) => InstCode::DynamicUnset,
            Op::PathPrepend => InstCode::PathPrepend,
            Op::ClistAdd => InstCode::ClistAdd,
            Op::ClistDelete => InstCode::ClistDelete,
            Op::RoaCheck(_) => InstCode::RoaCheck,
            Op::Condition { .. } => InstCode::Condition,
            Op::Switch(_) => InstCode::Switch,
            Op::ForEach { .. } => InstCode::ForEach,
            Op::Call { .. } => InstCode::Call,
            Op::DropResult => InstCode::DropResult,
            Op::Return => InstCode::Return,
            Op::Print => InstCode::Print,
            Op::PrintAndDie(_) => InstCode::PrintAndDie,
            Op::Die(_) => InstCode::Die,
            Op::Assert(_) => InstCode::Assert,
        }
    }

    /// `(popped, pushed)` operand stack effect of executing this item,
    /// including any nested line it enters.
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Op::Constant(_)
            | Op::ConstantDefined { .. }
            | Op::VarGet { .. }
            | Op::StaticGet(_)
            | Op::DynamicGet(_) => (0, 1),
            Op::VarClear { .. } | Op::DynamicUnset(_) | Op::PrintAndDie(_) | Op::Die(_) => (0, 0),
            Op::VarSet { .. }
            | Op::StaticSet(_)
            | Op::DynamicSet(_)
            | Op::Condition { .. }
            | Op::Switch(_)
            | Op::ForEach { .. }
            | Op::DropResult
            | Op::Return
            | Op::Print
            | Op::Assert(_) => (1, 0),
            Op::And { .. } | Op::Or { .. } | Op::Not | Op::Defined | Op::Length | Op::IsV4 => (1, 1),
            Op::Add
            | Op::Subtract
            | Op::Multiply
            | Op::Divide
            | Op::Pair
            | Op::EcConstruct(_)
            | Op::Eq
            | Op::Neq
            | Op::Lt
            | Op::Lte
            | Op::Gt
            | Op::Gte
            | Op::Match
            | Op::NotMatch
            | Op::PathPrepend
            | Op::ClistAdd
            | Op::ClistDelete
            | Op::RoaCheck(_) => (2, 1),
            Op::LcConstruct => (3, 1),
            Op::Call { args, .. } => (*args as usize, 1),
        }
    }

    /// Lines this item may enter.
    pub fn nested_lines(&self) -> Vec<LineId> {
        match self {
            Op::And { rhs } | Op::Or { rhs } => vec![*rhs],
            Op::Condition { then, otherwise } => std::iter::once(*then).chain(*otherwise).collect(),
            Op::Switch(table) => table.lines().collect(),
            Op::ForEach { body, .. } => vec![*body],
            Op::Call { func, .. } => vec![*func],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ItemFlags(u8);

impl ItemFlags {
    /// `PrintAndDie`: messages were put in the print buffer for this item.
    pub const PRINTED: ItemFlags = ItemFlags(1);

    pub fn contains(self, other: ItemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }
}

/// One flattened instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub op: Op,
    pub flags: ItemFlags,
    pub lineno: u32,
}

impl LineItem {
    pub fn new(op: Op, lineno: u32) -> Self {
        Self { op, flags: ItemFlags::default(), lineno }
    }

    pub fn code(&self) -> InstCode {
        self.op.code()
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code(), self.lineno)?;
        match &self.op {
            Op::Constant(v) => write!(f, " {}", v),
            Op::ConstantDefined { sym, value } => write!(f, " {}={}", sym, value),
            Op::VarGet { sym, slot } | Op::VarSet { sym, slot } | Op::VarClear { sym, slot } => {
                write!(f, " {}@{}", sym, slot)
            }
            Op::Call { sym, func, args } => write!(f, " {}({}) -> {}", sym, args, func),
            Op::RoaCheck(t) => write!(f, " {}", t),
            Op::Die(v) => write!(f, " {}", v),
            Op::PrintAndDie(Some(v)) => write!(f, " {}", v),
            op => {
                for line in op.nested_lines() {
                    write!(f, " {}", line)?;
                }
                Ok(())
            }
        }
    }
}

/// Line of instructions executed one after another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    items: Vec<LineItem>,
    /// Arguments expected when called as a function.
    args: u32,
    /// Local variable slots the line's frame needs (arguments included).
    vars: u32,
}

impl Line {
    pub fn new(items: Vec<LineItem>) -> Self {
        Self { items, args: 0, vars: 0 }
    }

    /// Sets the frame layout of a top-level or function line.
    pub fn with_frame(mut self, args: u32, vars: u32) -> Self {
        self.args = args;
        self.vars = vars.max(args);
        self
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn args(&self) -> u32 {
        self.args
    }

    pub fn vars(&self) -> u32 {
        self.vars
    }
}

/// Arena of compiled lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    lines: Vec<Line>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: Line) -> LineId {
        let id = LineId(self.lines.len() as u32);
        self.lines.push(line);
        id
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.lines.truncate(len);
    }

    /// Human readable listing of `root` and every line reachable from it.
    pub fn dump(&self, root: LineId) -> String {
        let mut out = String::new();
        let mut seen = std::collections::BTreeSet::new();
        let mut todo = vec![root];
        while let Some(id) = todo.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(line) = self.line(id) else {
                out.push_str(&format!("{}: <missing>\n", id));
                continue;
            };
            out.push_str(&format!("{} (len={}, args={}, vars={}):\n", id, line.len(), line.args, line.vars));
            for (pos, item) in line.items.iter().enumerate() {
                out.push_str(&format!("  [{:3}] {}\n", pos, item));
                todo.extend(item.op.nested_lines().into_iter().rev());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_names_are_stable() {
        assert_eq!(Op::Add.code().name(), "ADD");
        assert_eq!(Op::Die(Verdict::Accept).code().to_string(), "DIE");
        assert_eq!(Op::DynamicGet(DynamicAttr::new(crate::EaType::Int, 0, crate::FilterType::Int, 1)).code(), InstCode::DynamicGet);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Op::Constant(Value::Int(1)).stack_effect(), (0, 1));
        assert_eq!(Op::Add.stack_effect(), (2, 1));
        assert_eq!(Op::LcConstruct.stack_effect(), (3, 1));
        assert_eq!(Op::Die(Verdict::Reject).stack_effect(), (0, 0));
        let call = Op::Call { sym: Symbol::new("f"), func: LineId(0), args: 3 };
        assert_eq!(call.stack_effect(), (3, 1));
    }

    #[test]
    fn test_item_flags() {
        let mut flags = ItemFlags::default();
        assert!(!flags.contains(ItemFlags::PRINTED));
        flags.insert(ItemFlags::PRINTED);
        assert!(flags.contains(ItemFlags::PRINTED));
    }

    #[test]
    fn test_program_dump_lists_nested_lines() {
        let mut program = Program::new();
        let then = program.push(Line::new(vec![LineItem::new(Op::Die(Verdict::Accept), 2)]));
        let root = program.push(Line::new(vec![
            LineItem::new(Op::Constant(Value::Bool(true)), 1),
            LineItem::new(Op::Condition { then, otherwise: None }, 1),
        ]));
        let dump = program.dump(root);
        assert!(dump.contains("CONDITION:1 L0"));
        assert!(dump.contains("DIE:2 accept"));
    }
}
