//! Context module: the route under evaluation and its collaborators.
//!
//! This module provides the `Route` attribute store and the `ExecContext`
//! passed to every evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attr::{DynamicAttr, RouteAttributes, StaticAttr};
use crate::config::EvalOptions;
use crate::roa::RoaTables;
use crate::testsuite::AssertHook;
use crate::types::Value;

/// In-memory route: static fields and extended attributes keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    statics: BTreeMap<u32, Value>,
    attributes: BTreeMap<u32, Value>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static(mut self, attr: &StaticAttr, value: Value) -> Self {
        self.statics.insert(attr.code, value);
        self
    }

    pub fn with_dynamic(mut self, attr: &DynamicAttr, value: Value) -> Self {
        self.attributes.insert(attr.ea_code, value);
        self
    }

    pub fn static_value(&self, code: u32) -> Option<&Value> {
        self.statics.get(&code)
    }

    pub fn attribute(&self, ea_code: u32) -> Option<&Value> {
        self.attributes.get(&ea_code)
    }

    pub fn attributes(&self) -> &BTreeMap<u32, Value> {
        &self.attributes
    }
}

impl RouteAttributes for Route {
    fn get_static(&self, attr: &StaticAttr) -> Option<Value> {
        self.statics.get(&attr.code).cloned()
    }

    fn set_static(&mut self, attr: &StaticAttr, value: Value) {
        self.statics.insert(attr.code, value);
    }

    fn get_dynamic(&self, attr: &DynamicAttr) -> Option<Value> {
        self.attributes.get(&attr.ea_code).cloned()
    }

    fn set_dynamic(&mut self, attr: &DynamicAttr, value: Value) {
        self.attributes.insert(attr.ea_code, value);
    }

    fn unset_dynamic(&mut self, attr: &DynamicAttr) {
        self.attributes.remove(&attr.ea_code);
    }
}

/// Everything one evaluation may touch. Built per call; the program itself
/// stays immutable and shareable.
pub struct ExecContext<'a> {
    pub(crate) route: &'a mut dyn RouteAttributes,
    pub(crate) roa: Option<&'a dyn RoaTables>,
    pub(crate) hook: Option<&'a mut dyn AssertHook>,
    pub(crate) options: EvalOptions,
}

impl<'a> ExecContext<'a> {
    pub fn new(route: &'a mut dyn RouteAttributes) -> Self {
        Self {
            route,
            roa: None,
            hook: None,
            options: EvalOptions::default(),
        }
    }

    pub fn with_roa(mut self, roa: &'a dyn RoaTables) -> Self {
        self.roa = Some(roa);
        self
    }

    /// Installs the receiver of `bt_assert` results. Without one, an
    /// assertion fails the evaluation.
    pub fn with_assert_hook(mut self, hook: &'a mut dyn AssertHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }
}
