//! ROA module: route origin validation against ROA tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Prefix, RoaResult};

/// Reference to a ROA table, resolved by name at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    name: Arc<str>,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        Self { name: Arc::from(name) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub trait RoaTables {
    /// Validates `net` originated by `asn` against `table`. `None` when the
    /// table does not exist.
    fn roa_check(&self, table: &TableRef, net: &Prefix, asn: u32) -> Option<RoaResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoaEntry {
    pub prefix: Prefix,
    pub max_len: u8,
    pub asn: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoaTable {
    entries: Vec<RoaEntry>,
}

impl RoaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefix: Prefix, max_len: u8, asn: u32) -> &mut Self {
        self.entries.push(RoaEntry { prefix, max_len, asn });
        self
    }

    /// Unknown when no entry covers `net`, valid when a covering entry
    /// authorizes `asn` at this length, invalid otherwise. AS 0 never
    /// validates.
    pub fn check(&self, net: &Prefix, asn: u32) -> RoaResult {
        let mut covered = false;
        for entry in self.entries.iter().filter(|e| e.prefix.covers(net)) {
            covered = true;
            if asn != 0 && entry.asn == asn && net.len() <= entry.max_len {
                return RoaResult::Valid;
            }
        }
        if covered {
            RoaResult::Invalid
        } else {
            RoaResult::Unknown
        }
    }
}

/// Named ROA tables, the in-memory ROA collaborator.
#[derive(Debug, Clone, Default)]
pub struct RoaTableSet {
    tables: HashMap<Arc<str>, RoaTable>,
}

impl RoaTableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, table: RoaTable) {
        self.tables.insert(Arc::from(name), table);
    }

    pub fn get(&self, name: &str) -> Option<&RoaTable> {
        self.tables.get(name)
    }
}

impl RoaTables for RoaTableSet {
    fn roa_check(&self, table: &TableRef, net: &Prefix, asn: u32) -> Option<RoaResult> {
        self.tables.get(table.name()).map(|t| t.check(net, asn))
    }
}
