//! Attribute module: route attribute descriptors and the route collaborator.
//!
//! Static attributes are fixed fields of a route known at compile time;
//! dynamic attributes live in the route's extended attribute list and are
//! looked up by code at runtime.

use serde::{Deserialize, Serialize};

use crate::types::{FilterType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticAttr {
    pub f_type: FilterType,
    pub code: u32,
    pub readonly: bool,
}

impl StaticAttr {
    pub const fn new(f_type: FilterType, code: u32, readonly: bool) -> Self {
        Self { f_type, code, readonly }
    }
}

/// Storage type of an extended attribute as the route table knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EaType {
    Int,
    /// One bit of an integer attribute, selected by `DynamicAttr::bit`.
    Bitfield,
    Ip,
    RouterId,
    Opaque,
    AsPath,
    IntSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicAttr {
    pub core_type: EaType,
    pub bit: u8,
    pub f_type: FilterType,
    pub ea_code: u32,
}

impl DynamicAttr {
    pub const fn new(core_type: EaType, bit: u8, f_type: FilterType, ea_code: u32) -> Self {
        Self { core_type, bit, f_type, ea_code }
    }

    pub fn is_bitfield(&self) -> bool {
        self.core_type == EaType::Bitfield
    }
}

/// Access to the attributes of the route being filtered.
///
/// Implementations store values as given; type agreement with the
/// descriptor is enforced by the interpreter before any write.
pub trait RouteAttributes {
    fn get_static(&self, attr: &StaticAttr) -> Option<Value>;
    fn set_static(&mut self, attr: &StaticAttr, value: Value);
    fn get_dynamic(&self, attr: &DynamicAttr) -> Option<Value>;
    fn set_dynamic(&mut self, attr: &DynamicAttr, value: Value);
    fn unset_dynamic(&mut self, attr: &DynamicAttr);
}
