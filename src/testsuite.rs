//! Test-suite module: registered filter tests and the `bt_assert` hook.

use std::sync::Arc;

use crate::config::EvalOptions;
use crate::context::{ExecContext, Route};
use crate::interpreter::{Interpreter, Outcome};
use crate::ir::{LineId, LineItem, Op, Program};

/// Receives the result of every `bt_assert` evaluated while it is installed.
pub trait AssertHook {
    fn assert(&mut self, result: bool, item: &LineItem);
}

impl<F> AssertHook for F
where
    F: FnMut(bool, &LineItem),
{
    fn assert(&mut self, result: bool, item: &LineItem) {
        self(result, item)
    }
}

/// One assertion as seen by `AssertLog`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertRecord {
    pub result: bool,
    pub lineno: u32,
    /// Source text of the asserted expression.
    pub text: Arc<str>,
}

/// Hook that records every assertion it sees.
#[derive(Debug, Clone, Default)]
pub struct AssertLog {
    records: Vec<AssertRecord>,
}

impl AssertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AssertRecord] {
        &self.records
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertRecord> {
        self.records.iter().filter(|r| !r.result)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl AssertHook for AssertLog {
    fn assert(&mut self, result: bool, item: &LineItem) {
        let text = match &item.op {
            Op::Assert(text) => text.clone(),
            _ => Arc::from(""),
        };
        self.records.push(AssertRecord {
            result,
            lineno: item.lineno,
            text,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEntry {
    pub line: LineId,
    pub name: Arc<str>,
    pub description: Arc<str>,
}

/// Outcome of running one registered test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub name: Arc<str>,
    pub description: Arc<str>,
    pub outcome: Outcome,
}

/// Append-only registry of test functions. Names need not be unique; every
/// entry runs, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    entries: Vec<TestEntry>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, line: LineId, name: &str, description: &str) {
        self.entries.push(TestEntry {
            line,
            name: name.into(),
            description: description.into(),
        });
    }

    pub fn entries(&self) -> &[TestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every entry against a fresh empty route. Assertion results go to
    /// `hook`; each report carries the verdict of the test body.
    pub fn run(&self, program: &Program, hook: &mut dyn AssertHook, options: EvalOptions) -> Vec<TestReport> {
        let interp = Interpreter::new(program);
        self.entries
            .iter()
            .map(|entry| {
                let mut route = Route::new();
                let mut ctx = ExecContext::new(&mut route)
                    .with_assert_hook(&mut *hook)
                    .with_options(options);
                let outcome = interp.run(entry.line, &mut ctx);
                tracing::debug!(test = %entry.name, verdict = %outcome.verdict, "test finished");
                TestReport {
                    name: entry.name.clone(),
                    description: entry.description.clone(),
                    outcome,
                }
            })
            .collect()
    }
}
