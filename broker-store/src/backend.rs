//! The pluggable storage contract and the value arithmetic shared by its
//! implementations

use broker_model::{Data, DataType, Error, ErrorCode, Timestamp};
use std::collections::BTreeMap;

/// Primitive key/value operations with per-key expiry. Every store actor
/// owns exactly one backend; storage faults surface as `backend_failure`
/// and are never fatal to the contract itself.
pub trait Backend: Send {
    /// Write `value` under `key`, replacing any previous entry and its
    /// expiry.
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<(), Error>;

    /// Read the value under `key`, or `no_such_key`.
    fn get(&self, key: &Data) -> Result<Data, Error>;

    /// Read one aspect of a container value: membership for sets, the
    /// mapped value for tables, the indexed element for vectors.
    fn get_index(&self, key: &Data, aspect: &Data) -> Result<Data, Error>;

    /// Increment-or-initialize: a missing key first becomes the neutral
    /// value of `init_type`.
    fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> Result<(), Error>;

    /// Decrement an existing value; `no_such_key` if absent.
    fn subtract(&mut self, key: Data, value: Data, expiry: Option<Timestamp>)
        -> Result<(), Error>;

    /// Remove `key`; removing an absent key succeeds.
    fn erase(&mut self, key: &Data) -> Result<(), Error>;

    fn exists(&self, key: &Data) -> Result<bool, Error>;

    /// Remove every entry.
    fn clear(&mut self) -> Result<(), Error>;

    /// All keys, as a `Data::Set`, `Data::Vector`, or `Data::None`;
    /// callers must handle each shape.
    fn keys(&self) -> Result<Data, Error>;

    /// A complete copy of the current entries.
    fn snapshot(&self) -> Result<BTreeMap<Data, Data>, Error>;

    /// Every key carrying an expiry, with its absolute expiry time.
    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>, Error>;

    /// Remove `key` if its stored expiry has passed as of `now`. Returns
    /// true iff the entry was actually removed; a missing key or an entry
    /// whose expiry moved into the future reports false.
    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, Error>;
}

/// `current + value`, by type: numeric and timespan addition (counts
/// saturate on overflow), string append, set insert, vector append.
pub(crate) fn apply_add(current: &mut Data, value: Data) -> Result<(), Error> {
    match (current, value) {
        (Data::Count(c), Data::Count(v)) => {
            *c = c.saturating_add(v);
            Ok(())
        }
        (Data::Integer(i), Data::Integer(v)) => {
            *i += v;
            Ok(())
        }
        (Data::Real(r), Data::Real(v)) => {
            *r += v;
            Ok(())
        }
        (Data::Timespan(t), Data::Timespan(v)) => {
            *t = *t + v;
            Ok(())
        }
        (Data::String(s), Data::String(v)) => {
            s.push_str(&v);
            Ok(())
        }
        (Data::Set(s), v) => {
            s.insert(v);
            Ok(())
        }
        (Data::Vector(xs), v) => {
            xs.push(v);
            Ok(())
        }
        (current, value) => Err(Error::with_message(
            ErrorCode::TypeClash,
            format!("cannot add {} to {}", value.data_type(), current.data_type()),
        )),
    }
}

/// `current - value`, by type: numeric and timespan subtraction (counts
/// saturate at zero), set removal.
pub(crate) fn apply_subtract(current: &mut Data, value: Data) -> Result<(), Error> {
    match (current, value) {
        (Data::Count(c), Data::Count(v)) => {
            *c = c.saturating_sub(v);
            Ok(())
        }
        (Data::Integer(i), Data::Integer(v)) => {
            *i -= v;
            Ok(())
        }
        (Data::Real(r), Data::Real(v)) => {
            *r -= v;
            Ok(())
        }
        (Data::Timespan(t), Data::Timespan(v)) => {
            *t = *t - v;
            Ok(())
        }
        (Data::Set(s), v) => {
            s.remove(&v);
            Ok(())
        }
        (current, value) => Err(Error::with_message(
            ErrorCode::TypeClash,
            format!(
                "cannot subtract {} from {}",
                value.data_type(),
                current.data_type()
            ),
        )),
    }
}

/// Aspect lookup shared by the backends.
pub(crate) fn index_value(value: &Data, aspect: &Data) -> Result<Data, Error> {
    match value {
        Data::Set(s) => Ok(Data::Boolean(s.contains(aspect))),
        Data::Table(t) => t
            .get(aspect)
            .cloned()
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey)),
        Data::Vector(xs) => {
            let idx = aspect.as_count().ok_or_else(|| {
                Error::with_message(ErrorCode::TypeClash, "vector aspect must be a count")
            })?;
            xs.get(idx as usize)
                .cloned()
                .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))
        }
        other => Err(Error::with_message(
            ErrorCode::TypeClash,
            format!("{} values have no aspects", other.data_type()),
        )),
    }
}
