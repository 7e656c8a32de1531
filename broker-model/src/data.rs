//! The recursively-typed value language
//!
//! `Data` is the unit of exchange for everything above the channel layer:
//! store keys and values, published payloads, snapshots. Values carry a
//! total order (type tag first, then value, with IEEE total ordering for
//! reals) so they can key `BTreeMap` and `BTreeSet`.

use crate::address::{Address, Port, Subnet};
use crate::time::{Timespan, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A user-defined enumeration constant, by name.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
#[repr(transparent)]
pub struct EnumValue(pub String);

impl EnumValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnumValue({})", self.0)
    }
}

/// A set of values, ordered by the `Data` total order.
pub type Set = BTreeSet<Data>;

/// An ordered list of values.
pub type Vector = Vec<Data>;

/// A mapping of value to value.
pub type Table = BTreeMap<Data, Data>;

/// Type tag of a `Data` value.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
pub enum DataType {
    None,
    Boolean,
    Count,
    Integer,
    Real,
    String,
    Address,
    Subnet,
    Port,
    Timestamp,
    Timespan,
    Enum,
    Set,
    Table,
    Vector,
}

impl DataType {
    /// The neutral value of this type, used to initialize missing keys on
    /// increment-style operations.
    pub fn default_value(&self) -> Data {
        match self {
            DataType::None => Data::None,
            DataType::Boolean => Data::Boolean(false),
            DataType::Count => Data::Count(0),
            DataType::Integer => Data::Integer(0),
            DataType::Real => Data::Real(0.0),
            DataType::String => Data::String(String::new()),
            DataType::Address => Data::Address(Address::unspecified()),
            DataType::Subnet => Data::Subnet(Subnet::default()),
            DataType::Port => Data::Port(Port::new(0, crate::address::Protocol::Unknown)),
            DataType::Timestamp => Data::Timestamp(Timestamp::EPOCH),
            DataType::Timespan => Data::Timespan(Timespan::ZERO),
            DataType::Enum => Data::Enum(EnumValue::new("")),
            DataType::Set => Data::Set(Set::new()),
            DataType::Table => Data::Table(Table::new()),
            DataType::Vector => Data::Vector(Vector::new()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::None => "none",
            DataType::Boolean => "boolean",
            DataType::Count => "count",
            DataType::Integer => "integer",
            DataType::Real => "real",
            DataType::String => "string",
            DataType::Address => "address",
            DataType::Subnet => "subnet",
            DataType::Port => "port",
            DataType::Timestamp => "timestamp",
            DataType::Timespan => "timespan",
            DataType::Enum => "enum",
            DataType::Set => "set",
            DataType::Table => "table",
            DataType::Vector => "vector",
        };
        f.write_str(s)
    }
}

/// A value in the broker data model.
#[derive(Clone, Serialize, Deserialize, borsh::BorshSerialize, borsh::BorshDeserialize)]
pub enum Data {
    None,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    String(String),
    Address(Address),
    Subnet(Subnet),
    Port(Port),
    Timestamp(Timestamp),
    Timespan(Timespan),
    Enum(EnumValue),
    Set(Set),
    Table(Table),
    Vector(Vector),
}

impl Data {
    pub fn data_type(&self) -> DataType {
        match self {
            Data::None => DataType::None,
            Data::Boolean(_) => DataType::Boolean,
            Data::Count(_) => DataType::Count,
            Data::Integer(_) => DataType::Integer,
            Data::Real(_) => DataType::Real,
            Data::String(_) => DataType::String,
            Data::Address(_) => DataType::Address,
            Data::Subnet(_) => DataType::Subnet,
            Data::Port(_) => DataType::Port,
            Data::Timestamp(_) => DataType::Timestamp,
            Data::Timespan(_) => DataType::Timespan,
            Data::Enum(_) => DataType::Enum,
            Data::Set(_) => DataType::Set,
            Data::Table(_) => DataType::Table,
            Data::Vector(_) => DataType::Vector,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Data::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Data::Count(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Data::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Data::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Data::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Data::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Data::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Tag index used for cross-type ordering.
    fn tag(&self) -> u8 {
        self.data_type() as u8
    }
}

// Reals compare by IEEE total ordering so that equality stays consistent
// with the total order required for map keys.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        use Data::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Port(a), Port(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Timespan(a), Timespan(b)) => a.cmp(b),
            (Enum(a), Enum(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Table(a), Table(b)) => a.cmp(b),
            (Vector(a), Vector(b)) => a.cmp(b),
            (a, b) => a.tag().cmp(&b.tag()),
        }
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::None
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::None => f.write_str("nil"),
            Data::Boolean(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Data::Count(c) => write!(f, "{}", c),
            Data::Integer(i) => write!(f, "{:+}", i),
            Data::Real(r) => write!(f, "{}", r),
            Data::String(s) => write!(f, "{}", s),
            Data::Address(a) => write!(f, "{}", a),
            Data::Subnet(s) => write!(f, "{}", s),
            Data::Port(p) => write!(f, "{}", p),
            Data::Timestamp(t) => write!(f, "{}", t),
            Data::Timespan(t) => write!(f, "{}", t),
            Data::Enum(e) => write!(f, "{}", e),
            Data::Set(xs) => {
                f.write_str("{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("}")
            }
            Data::Table(xs) => {
                f.write_str("{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                f.write_str("}")
            }
            Data::Vector(xs) => {
                f.write_str("[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.data_type(), self)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Boolean(b)
    }
}

impl From<u64> for Data {
    fn from(c: u64) -> Self {
        Data::Count(c)
    }
}

impl From<i64> for Data {
    fn from(i: i64) -> Self {
        Data::Integer(i)
    }
}

impl From<f64> for Data {
    fn from(r: f64) -> Self {
        Data::Real(r)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<Address> for Data {
    fn from(a: Address) -> Self {
        Data::Address(a)
    }
}

impl From<Subnet> for Data {
    fn from(s: Subnet) -> Self {
        Data::Subnet(s)
    }
}

impl From<Port> for Data {
    fn from(p: Port) -> Self {
        Data::Port(p)
    }
}

impl From<Timestamp> for Data {
    fn from(t: Timestamp) -> Self {
        Data::Timestamp(t)
    }
}

impl From<Timespan> for Data {
    fn from(t: Timespan) -> Self {
        Data::Timespan(t)
    }
}

impl From<EnumValue> for Data {
    fn from(e: EnumValue) -> Self {
        Data::Enum(e)
    }
}

impl From<Set> for Data {
    fn from(s: Set) -> Self {
        Data::Set(s)
    }
}

impl From<Vector> for Data {
    fn from(v: Vector) -> Self {
        Data::Vector(v)
    }
}

impl From<Table> for Data {
    fn from(t: Table) -> Self {
        Data::Table(t)
    }
}
