//! Types module: the filter value model.
//!
//! This module provides `FilterType` (the semantic types filters know about),
//! `Value` (the tagged runtime value carried on the operand stack), `Prefix`,
//! and the small enumerations shared by the compiler and the interpreter.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::set::{PathMask, PrefixSet, ValueSet};
use crate::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FilterType {
    Void,
    Int,
    Bool,
    Pair,
    Quad,
    Ip,
    Net,
    String,
    Ec,
    Lc,
    Path,
    Clist,
    PathMask,
    Set,
    PrefixSet,
    Roa,
}

impl FilterType {
    /// Whether `<` and friends are defined between two values of this type.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            FilterType::Int
                | FilterType::Bool
                | FilterType::Pair
                | FilterType::Quad
                | FilterType::Ip
                | FilterType::Net
                | FilterType::String
                | FilterType::Ec
                | FilterType::Lc
                | FilterType::Roa
        )
    }

    /// Whether `~` is defined for a value of this type against a pattern of
    /// type `pattern`. Mirrors `Value::matches`.
    pub fn can_match(self, pattern: FilterType) -> bool {
        matches!(
            (self, pattern),
            (_, FilterType::Set)
                | (FilterType::Net, FilterType::PrefixSet)
                | (FilterType::Path, FilterType::PathMask)
                | (FilterType::Pair, FilterType::Clist)
                | (FilterType::Int, FilterType::Path)
                | (FilterType::Ip, FilterType::Net)
                | (FilterType::Net, FilterType::Net)
                | (FilterType::String, FilterType::String)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterType::Void => "void",
            FilterType::Int => "int",
            FilterType::Bool => "bool",
            FilterType::Pair => "pair",
            FilterType::Quad => "quad",
            FilterType::Ip => "ip",
            FilterType::Net => "prefix",
            FilterType::String => "string",
            FilterType::Ec => "ec",
            FilterType::Lc => "lc",
            FilterType::Path => "bgppath",
            FilterType::Clist => "clist",
            FilterType::PathMask => "bgpmask",
            FilterType::Set => "set",
            FilterType::PrefixSet => "prefix set",
            FilterType::Roa => "roa result",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal classification of one filter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Accept,
    Reject,
    Error,
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Accept => "accept",
            Verdict::Reject => "reject",
            Verdict::Error => "error",
            Verdict::Unknown => "unknown",
        })
    }
}

/// Result of route origin validation (RFC 6811).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoaResult {
    Unknown,
    Valid,
    Invalid,
}

/// Extended community subtype selected by the EC constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcSubtype {
    /// Route target.
    Rt,
    /// Route origin.
    Ro,
    /// Raw 32:32 community without type octets.
    Generic,
}

impl EcSubtype {
    pub fn code(self) -> u64 {
        match self {
            EcSubtype::Rt => 0x0002,
            EcSubtype::Ro => 0x0003,
            EcSubtype::Generic => 0xffff,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0x02 => Some(EcSubtype::Rt),
            0x03 => Some(EcSubtype::Ro),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            EcSubtype::Rt => "rt",
            EcSubtype::Ro => "ro",
            EcSubtype::Generic => "generic",
        }
    }
}

/// An IP prefix with host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    /// Returns `None` when `len` exceeds the address family's width.
    pub fn new(addr: IpAddr, len: u8) -> Option<Self> {
        if len > max_len(&addr) {
            return None;
        }
        Some(Self { addr: mask(addr, len), len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn max_len(&self) -> u8 {
        max_len(&self.addr)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        ip.is_ipv4() == self.is_v4() && mask(*ip, self.len) == self.addr
    }

    /// True when `other` lies within this prefix (equal prefixes included).
    pub fn covers(&self, other: &Prefix) -> bool {
        other.len >= self.len && self.contains(&other.addr)
    }
}

fn max_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

pub(crate) fn mask(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(a) => {
            let bits = u32::from(a);
            let m = if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len.min(32))) };
            IpAddr::V4(Ipv4Addr::from(bits & m))
        }
        IpAddr::V6(a) => {
            let bits = u128::from(a);
            let m = if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len.min(128))) };
            IpAddr::V6(Ipv6Addr::from(bits & m))
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EvalError::InvalidValue(format!("bad prefix '{}'", s));
        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        Prefix::new(addr, len).ok_or_else(invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Value {
    /// Undefined value: unset variables and absent scalar attributes.
    Void,
    Int(i64),
    Bool(bool),
    Pair(u16, u16),
    Quad(u32),
    Ip(IpAddr),
    Net(Prefix),
    String(Arc<str>),
    Ec(u64),
    Lc(u32, u32, u32),
    Path(Arc<[u32]>),
    Clist(Arc<[(u16, u16)]>),
    PathMask(Arc<PathMask>),
    Set(Arc<ValueSet>),
    PrefixSet(Arc<PrefixSet>),
    Roa(RoaResult),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn path(asns: impl IntoIterator<Item = u32>) -> Self {
        Value::Path(asns.into_iter().collect())
    }

    pub fn clist(pairs: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Value::Clist(pairs.into_iter().collect())
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            Value::Void => FilterType::Void,
            Value::Int(_) => FilterType::Int,
            Value::Bool(_) => FilterType::Bool,
            Value::Pair(..) => FilterType::Pair,
            Value::Quad(_) => FilterType::Quad,
            Value::Ip(_) => FilterType::Ip,
            Value::Net(_) => FilterType::Net,
            Value::String(_) => FilterType::String,
            Value::Ec(_) => FilterType::Ec,
            Value::Lc(..) => FilterType::Lc,
            Value::Path(_) => FilterType::Path,
            Value::Clist(_) => FilterType::Clist,
            Value::PathMask(_) => FilterType::PathMask,
            Value::Set(_) => FilterType::Set,
            Value::PrefixSet(_) => FilterType::PrefixSet,
            Value::Roa(_) => FilterType::Roa,
        }
    }

    /// The value an absent attribute of type `ty` reads as. List attributes
    /// read as empty lists, everything else as `Void`.
    pub fn default_for(ty: FilterType) -> Value {
        match ty {
            FilterType::Path => Value::Path(Arc::new([])),
            FilterType::Clist => Value::Clist(Arc::new([])),
            _ => Value::Void,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Void)
    }

    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("boolean expected", other)),
        }
    }

    pub fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Void => Err(EvalError::UndefinedValue("integer expected".to_string())),
            other => Err(mismatch("integer expected", other)),
        }
    }

    /// Integer in the 32-bit AS number range.
    pub fn as_asn(&self) -> Result<u32, EvalError> {
        let i = self.as_int()?;
        u32::try_from(i).map_err(|_| EvalError::InvalidValue(format!("{} is not a valid AS number", i)))
    }

    /// Type-directed ordering. Fails with `TypeMismatch` for unordered types
    /// and for operands of different types.
    pub fn compare(&self, other: &Value) -> Result<Ordering, EvalError> {
        let ord = match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Pair(a1, a2), Value::Pair(b1, b2)) => (a1, a2).cmp(&(b1, b2)),
            (Value::Quad(a), Value::Quad(b)) => a.cmp(b),
            (Value::Ip(a), Value::Ip(b)) => a.cmp(b),
            (Value::Net(a), Value::Net(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Ec(a), Value::Ec(b)) => a.cmp(b),
            (Value::Lc(a1, a2, a3), Value::Lc(b1, b2, b3)) => (a1, a2, a3).cmp(&(b1, b2, b3)),
            (Value::Roa(a), Value::Roa(b)) => a.cmp(b),
            (a, b) => {
                return Err(EvalError::TypeMismatch(format!(
                    "can't compare values of incompatible types ({} and {})",
                    a.filter_type(),
                    b.filter_type()
                )))
            }
        };
        Ok(ord)
    }

    /// The `~` operator: membership of `self` in `pattern`.
    pub fn matches(&self, pattern: &Value) -> Result<bool, EvalError> {
        match (self, pattern) {
            (_, Value::Set(set)) => match self {
                Value::Path(path) => set.contains_any(path.iter().map(|asn| Value::Int(i64::from(*asn)))),
                Value::Clist(list) => set.contains_any(list.iter().map(|(a, b)| Value::Pair(*a, *b))),
                v => set.contains(v),
            },
            (Value::Net(net), Value::PrefixSet(set)) => Ok(set.matches(net)),
            (Value::Path(path), Value::PathMask(mask)) => Ok(mask.matches(path)),
            (Value::Pair(a, b), Value::Clist(list)) => Ok(list.contains(&(*a, *b))),
            (Value::Int(_), Value::Path(path)) => {
                let asn = self.as_asn()?;
                Ok(path.contains(&asn))
            }
            (Value::Ip(ip), Value::Net(net)) => Ok(net.contains(ip)),
            (Value::Net(inner), Value::Net(outer)) => Ok(outer.covers(inner)),
            (Value::String(s), Value::String(pat)) => Ok(wildcard_match(s.as_bytes(), pat.as_bytes())),
            (a, b) => Err(EvalError::TypeMismatch(format!(
                "~ applied on unknown type pair ({} and {})",
                a.filter_type(),
                b.filter_type()
            ))),
        }
    }

    pub fn length(&self) -> Result<i64, EvalError> {
        match self {
            Value::Path(p) => Ok(p.len() as i64),
            Value::Clist(c) => Ok(c.len() as i64),
            Value::String(s) => Ok(s.chars().count() as i64),
            Value::Net(n) => Ok(i64::from(n.len())),
            other => Err(mismatch("length of path, clist, string or prefix expected", other)),
        }
    }

    pub fn is_v4(&self) -> Result<bool, EvalError> {
        match self {
            Value::Ip(ip) => Ok(ip.is_ipv4()),
            Value::Net(n) => Ok(n.is_v4()),
            other => Err(mismatch("ip or prefix expected", other)),
        }
    }

    pub fn pair(a: &Value, b: &Value) -> Result<Value, EvalError> {
        let (a, b) = (a.as_int()?, b.as_int()?);
        match (u16::try_from(a), u16::try_from(b)) {
            (Ok(a), Ok(b)) => Ok(Value::Pair(a, b)),
            _ => Err(EvalError::InvalidValue(
                "can't operate with value out of bounds in pair constructor".to_string(),
            )),
        }
    }

    pub fn lc(a: &Value, b: &Value, c: &Value) -> Result<Value, EvalError> {
        Ok(Value::Lc(a.as_asn()?, b.as_asn()?, c.as_asn()?))
    }

    /// Extended community from a key (AS number or IPv4 router id) and a value.
    pub fn ec(kind: EcSubtype, key: &Value, val: &Value) -> Result<Value, EvalError> {
        let (key, ipv4_key) = match key {
            Value::Int(_) => (u64::from(key.as_asn()?), false),
            Value::Quad(q) => (u64::from(*q), true),
            Value::Ip(IpAddr::V4(a)) => (u64::from(u32::from(*a)), true),
            other => return Err(mismatch("argument 1 of EC constructor must be integer or IPv4 address", other)),
        };
        let val = u64::from(val.as_asn()?);
        let ec = if kind == EcSubtype::Generic {
            (key << 32) | val
        } else if ipv4_key {
            if val > 0xffff {
                return Err(EvalError::InvalidValue(format!(
                    "4-byte value {} can't be used with IP-address key in extended community",
                    val
                )));
            }
            ((kind.code() | 0x0100) << 48) | (key << 16) | val
        } else if key < 0x10000 {
            (kind.code() << 48) | (key << 32) | val
        } else {
            if val > 0xffff {
                return Err(EvalError::InvalidValue(format!(
                    "4-byte value {} can't be used with 4-byte ASN in extended community",
                    val
                )));
            }
            ((kind.code() | 0x0200) << 48) | (key << 16) | val
        };
        Ok(Value::Ec(ec))
    }
}

fn mismatch(what: &str, got: &Value) -> EvalError {
    EvalError::TypeMismatch(format!("{}, got {}", what, got.filter_type()))
}

/// Shell-style pattern match: `*` matches any run, `?` any single byte.
///
/// Greedy with backtracking to the most recent `*` only, so the cost is
/// bounded by `s.len() * pat.len()`.
pub(crate) fn wildcard_match(s: &[u8], pat: &[u8]) -> bool {
    let (mut i, mut j) = (0, 0);
    // Last `*` seen in `pat`, and the position in `s` it currently absorbs up to.
    let mut star: Option<(usize, usize)> = None;
    while i < s.len() {
        match pat.get(j) {
            Some(b'*') => {
                star = Some((j, i));
                j += 1;
            }
            Some(&c) if c == b'?' || c == s[i] => {
                i += 1;
                j += 1;
            }
            _ => match star {
                Some((star_j, star_i)) => {
                    star = Some((star_j, star_i + 1));
                    i = star_i + 1;
                    j = star_j + 1;
                }
                None => return false,
            },
        }
    }
    pat[j..].iter().all(|&c| c == b'*')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("(void)"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Pair(a, b) => write!(f, "({},{})", a, b),
            Value::Quad(q) => write!(f, "{}", Ipv4Addr::from(*q)),
            Value::Ip(ip) => write!(f, "{}", ip),
            Value::Net(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Ec(ec) => fmt_ec(f, *ec),
            Value::Lc(a, b, c) => write!(f, "({}, {}, {})", a, b, c),
            Value::Path(p) => {
                f.write_str("(path")?;
                for asn in p.iter() {
                    write!(f, " {}", asn)?;
                }
                f.write_str(")")
            }
            Value::Clist(c) => {
                f.write_str("(clist")?;
                for (a, b) in c.iter() {
                    write!(f, " ({},{})", a, b)?;
                }
                f.write_str(")")
            }
            Value::PathMask(m) => write!(f, "{}", m),
            Value::Set(s) => write!(f, "{}", s),
            Value::PrefixSet(s) => write!(f, "{}", s),
            Value::Roa(r) => f.write_str(match r {
                RoaResult::Unknown => "ROA_UNKNOWN",
                RoaResult::Valid => "ROA_VALID",
                RoaResult::Invalid => "ROA_INVALID",
            }),
        }
    }
}

fn fmt_ec(f: &mut fmt::Formatter<'_>, ec: u64) -> fmt::Result {
    let kind = ec >> 48;
    let label = EcSubtype::from_code(kind & 0xff).map(EcSubtype::label);
    match (kind >> 8, label) {
        (0x00, Some(l)) => write!(f, "({}, {}, {})", l, (ec >> 32) & 0xffff, ec & 0xffff_ffff),
        (0x01, Some(l)) => write!(f, "({}, {}, {})", l, Ipv4Addr::from(((ec >> 16) & 0xffff_ffff) as u32), ec & 0xffff),
        (0x02, Some(l)) => write!(f, "({}, {}, {})", l, (ec >> 16) & 0xffff_ffff, ec & 0xffff),
        _ => write!(f, "(generic, 0x{:x}, 0x{:x})", ec >> 32, ec & 0xffff_ffff),
    }
}
