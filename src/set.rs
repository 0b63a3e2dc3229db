//! Set module: pre-built membership structures used by the `~` operator.
//!
//! `ValueSet` is a sorted range set over one ordered type, `PrefixSet` holds
//! prefix patterns such as `10.0.0.0/8{16,24}`, and `PathMask` matches AS paths
//! against wildcard masks such as `[= * 65000 ? =]`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Prefix, Value};
use crate::EvalError;

/// A single value (`from == to`) or an inclusive range of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetItem {
    from: Value,
    to: Value,
}

impl SetItem {
    pub fn value(v: Value) -> Self {
        Self { from: v.clone(), to: v }
    }

    pub fn range(from: Value, to: Value) -> Self {
        Self { from, to }
    }

    pub fn from(&self) -> &Value {
        &self.from
    }

    pub fn to(&self) -> &Value {
        &self.to
    }

    pub fn contains(&self, v: &Value) -> Result<bool, EvalError> {
        Ok(self.from.compare(v)? != Ordering::Greater && self.to.compare(v)? != Ordering::Less)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueSet {
    /// Sorted by `from`, non-overlapping.
    items: Vec<SetItem>,
}

impl ValueSet {
    /// Builds a set from items of one ordered type. Overlapping ranges are
    /// merged so lookups can binary search.
    pub fn new(items: impl IntoIterator<Item = SetItem>) -> Result<Self, EvalError> {
        let mut items: Vec<SetItem> = items.into_iter().collect();
        for item in &items {
            if item.from.compare(&item.to)? == Ordering::Greater {
                return Err(EvalError::InvalidValue(format!("empty range {}..{} in set", item.from, item.to)));
            }
        }
        if let Some(first) = items.first() {
            let ty = first.from.filter_type();
            if let Some(bad) = items.iter().find(|i| i.from.filter_type() != ty) {
                return Err(EvalError::TypeMismatch(format!(
                    "set mixes {} and {} elements",
                    ty,
                    bad.from.filter_type()
                )));
            }
        }
        // Types were checked above, so comparisons cannot fail here.
        items.sort_by(|a, b| a.from.compare(&b.from).unwrap_or(Ordering::Equal));
        let mut merged: Vec<SetItem> = Vec::with_capacity(items.len());
        for item in items {
            match merged.last_mut() {
                Some(last) if last.to.compare(&item.from)? != Ordering::Less => {
                    if item.to.compare(&last.to)? == Ordering::Greater {
                        last.to = item.to;
                    }
                }
                _ => merged.push(item),
            }
        }
        Ok(Self { items: merged })
    }

    pub fn items(&self) -> &[SetItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, v: &Value) -> Result<bool, EvalError> {
        let Some(first) = self.items.first() else {
            return Ok(false);
        };
        if first.from.filter_type() != v.filter_type() {
            return Err(EvalError::TypeMismatch(format!(
                "can't match {} against a set of {}",
                v.filter_type(),
                first.from.filter_type()
            )));
        }
        let idx = self
            .items
            .partition_point(|item| item.from.compare(v).map(|o| o != Ordering::Greater).unwrap_or(false));
        match idx.checked_sub(1) {
            Some(i) => self.items[i].contains(v),
            None => Ok(false),
        }
    }

    /// True when any of `values` is in the set.
    pub fn contains_any(&self, values: impl IntoIterator<Item = Value>) -> Result<bool, EvalError> {
        for v in values {
            if self.contains(&v)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if item.from == item.to {
                write!(f, "{}", item.from)?;
            } else {
                write!(f, "{}..{}", item.from, item.to)?;
            }
        }
        f.write_str("]")
    }
}

/// Matches prefixes under `prefix` whose length is within `low..=high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPattern {
    prefix: Prefix,
    low: u8,
    high: u8,
}

impl PrefixPattern {
    pub fn new(prefix: Prefix, low: u8, high: u8) -> Option<Self> {
        (low <= high && high <= prefix.max_len()).then_some(Self { prefix, low, high })
    }

    pub fn exact(prefix: Prefix) -> Self {
        Self { prefix, low: prefix.len(), high: prefix.len() }
    }

    /// `net+`: the prefix and everything more specific.
    pub fn or_longer(prefix: Prefix) -> Self {
        Self { prefix, low: prefix.len(), high: prefix.max_len() }
    }

    /// `net-`: the prefix and every shorter prefix covering it.
    pub fn or_shorter(prefix: Prefix) -> Self {
        Self { prefix, low: 0, high: prefix.len() }
    }

    pub fn matches(&self, net: &Prefix) -> bool {
        if net.is_v4() != self.prefix.is_v4() || net.len() < self.low || net.len() > self.high {
            return false;
        }
        let common = net.len().min(self.prefix.len());
        crate::types::mask(net.addr(), common) == crate::types::mask(self.prefix.addr(), common)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefixSet {
    patterns: Vec<PrefixPattern>,
}

impl PrefixSet {
    pub fn new(patterns: impl IntoIterator<Item = PrefixPattern>) -> Self {
        Self { patterns: patterns.into_iter().collect() }
    }

    pub fn matches(&self, net: &Prefix) -> bool {
        self.patterns.iter().any(|p| p.matches(net))
    }

    pub fn patterns(&self) -> &[PrefixPattern] {
        &self.patterns
    }
}

impl fmt::Display for PrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, p) in self.patterns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{{{},{}}}", p.prefix, p.low, p.high)?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMaskItem {
    Asn(u32),
    AsnRange(u32, u32),
    /// `?`: exactly one AS.
    AnyOne,
    /// `*`: any number of ASes, including none.
    AnySeq,
}

impl PathMaskItem {
    fn accepts(&self, asn: u32) -> bool {
        match *self {
            PathMaskItem::Asn(a) => a == asn,
            PathMaskItem::AsnRange(lo, hi) => (lo..=hi).contains(&asn),
            PathMaskItem::AnyOne | PathMaskItem::AnySeq => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMask {
    items: Vec<PathMaskItem>,
}

impl PathMask {
    pub fn new(items: impl IntoIterator<Item = PathMaskItem>) -> Self {
        Self { items: items.into_iter().collect() }
    }

    /// Whole-path match.
    pub fn matches(&self, path: &[u32]) -> bool {
        // reachable[j]: the first i mask items can consume the first j ASes
        let mut reachable = vec![false; path.len() + 1];
        reachable[0] = true;
        for item in &self.items {
            let mut next = vec![false; path.len() + 1];
            for j in 0..=path.len() {
                if *item == PathMaskItem::AnySeq {
                    next[j] = reachable[j] || (j > 0 && next[j - 1]);
                } else if j > 0 {
                    next[j] = reachable[j - 1] && item.accepts(path[j - 1]);
                }
            }
            reachable = next;
        }
        reachable[path.len()]
    }
}

impl fmt::Display for PathMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[=")?;
        for item in &self.items {
            match item {
                PathMaskItem::Asn(a) => write!(f, " {}", a)?,
                PathMaskItem::AsnRange(lo, hi) => write!(f, " {}..{}", lo, hi)?,
                PathMaskItem::AnyOne => f.write_str(" ?")?,
                PathMaskItem::AnySeq => f.write_str(" *")?,
            }
        }
        f.write_str(" =]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(items: &[(i64, i64)]) -> ValueSet {
        ValueSet::new(items.iter().map(|(a, b)| SetItem::range(Value::Int(*a), Value::Int(*b)))).unwrap()
    }

    #[test]
    fn test_value_set_membership() {
        let set = ints(&[(1, 1), (10, 20), (30, 30)]);
        assert!(set.contains(&Value::Int(1)).unwrap());
        assert!(set.contains(&Value::Int(15)).unwrap());
        assert!(set.contains(&Value::Int(30)).unwrap());
        assert!(!set.contains(&Value::Int(25)).unwrap());
        assert!(!set.contains(&Value::Int(0)).unwrap());
        assert!(set.contains(&Value::string("x")).is_err());
    }

    #[test]
    fn test_value_set_merges_overlaps() {
        let set = ints(&[(10, 20), (15, 40), (1, 2)]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Value::Int(35)).unwrap());
    }

    #[test]
    fn test_value_set_rejects_mixed_types() {
        let res = ValueSet::new(vec![SetItem::value(Value::Int(1)), SetItem::value(Value::Pair(1, 1))]);
        assert!(matches!(res, Err(EvalError::TypeMismatch(_))));
    }

    #[test]
    fn test_empty_set_contains_nothing() {
        let set = ValueSet::default();
        assert!(!set.contains(&Value::Int(1)).unwrap());
    }

    #[test]
    fn test_prefix_patterns() {
        let base: Prefix = "10.0.0.0/8".parse().unwrap();
        let set = PrefixSet::new(vec![PrefixPattern::new(base, 16, 24).unwrap()]);
        assert!(set.matches(&"10.1.0.0/16".parse().unwrap()));
        assert!(set.matches(&"10.1.2.0/24".parse().unwrap()));
        assert!(!set.matches(&"10.0.0.0/8".parse().unwrap()));
        assert!(!set.matches(&"11.1.0.0/16".parse().unwrap()));

        let shorter = PrefixPattern::or_shorter("10.20.0.0/16".parse().unwrap());
        assert!(shorter.matches(&"10.0.0.0/8".parse().unwrap()));
        assert!(!shorter.matches(&"10.20.30.0/24".parse().unwrap()));
        assert!(PrefixPattern::or_longer(base).matches(&"10.20.30.0/24".parse().unwrap()));
    }

    #[test]
    fn test_path_mask() {
        let mask = PathMask::new(vec![PathMaskItem::AnySeq, PathMaskItem::Asn(65000), PathMaskItem::AnyOne]);
        assert!(mask.matches(&[65000, 1]));
        assert!(mask.matches(&[1, 2, 65000, 3]));
        assert!(!mask.matches(&[65000]));
        assert!(!mask.matches(&[1, 65000, 3, 4]));
        assert!(PathMask::new(vec![PathMaskItem::AnySeq]).matches(&[]));
        let range = PathMask::new(vec![PathMaskItem::AsnRange(64512, 65534)]);
        assert!(range.matches(&[64600]));
        assert_eq!(mask.to_string(), "[= * 65000 ? =]");
    }
}
