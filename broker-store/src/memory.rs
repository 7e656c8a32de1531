//! In-memory storage backend

use crate::backend::{apply_add, apply_subtract, index_value, Backend};
use broker_model::{Data, DataType, Error, ErrorCode, Timestamp};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    value: Data,
    expiry: Option<Timestamp>,
}

/// Volatile backend over a `BTreeMap`. This is also what every clone
/// uses for its local replica.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<Data, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a complete snapshot, discarding previous contents.
    pub fn install(&mut self, entries: BTreeMap<Data, Data>) {
        self.entries = entries
            .into_iter()
            .map(|(k, v)| (k, Entry { value: v, expiry: None }))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Backend for MemoryBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<(), Error> {
        self.entries.insert(key, Entry { value, expiry });
        Ok(())
    }

    fn get(&self, key: &Data) -> Result<Data, Error> {
        self.entries
            .get(key)
            .map(|e| e.value.clone())
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))
    }

    fn get_index(&self, key: &Data, aspect: &Data) -> Result<Data, Error> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))?;
        index_value(&entry.value, aspect)
    }

    fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> Result<(), Error> {
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry { value: init_type.default_value(), expiry: None });
        apply_add(&mut entry.value, value)?;
        entry.expiry = expiry;
        Ok(())
    }

    fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
    ) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))?;
        apply_subtract(&mut entry.value, value)?;
        entry.expiry = expiry;
        Ok(())
    }

    fn erase(&mut self, key: &Data) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &Data) -> Result<bool, Error> {
        Ok(self.entries.contains_key(key))
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.entries.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Data, Error> {
        Ok(Data::Set(self.entries.keys().cloned().collect()))
    }

    fn snapshot(&self) -> Result<BTreeMap<Data, Data>, Error> {
        Ok(self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>, Error> {
        Ok(self
            .entries
            .iter()
            .filter_map(|(k, e)| e.expiry.map(|t| (k.clone(), t)))
            .collect())
    }

    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, Error> {
        match self.entries.get(key) {
            Some(Entry { expiry: Some(at), .. }) if *at <= now => {
                self.entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_model::Timespan;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::EPOCH + Timespan::from_secs(secs)
    }

    #[test]
    fn put_get_erase() {
        let mut b = MemoryBackend::new();
        b.put(Data::from("k"), Data::from("v"), None).unwrap();
        assert_eq!(b.get(&Data::from("k")).unwrap(), Data::from("v"));
        assert!(b.exists(&Data::from("k")).unwrap());
        b.erase(&Data::from("k")).unwrap();
        assert_eq!(b.get(&Data::from("k")).unwrap_err(), ErrorCode::NoSuchKey);
        // Erasing twice is fine.
        b.erase(&Data::from("k")).unwrap();
    }

    #[test]
    fn add_initializes_missing_keys() {
        let mut b = MemoryBackend::new();
        b.add(Data::from("hits"), Data::Count(2), DataType::Count, None)
            .unwrap();
        b.add(Data::from("hits"), Data::Count(3), DataType::Count, None)
            .unwrap();
        assert_eq!(b.get(&Data::from("hits")).unwrap(), Data::Count(5));
    }

    #[test]
    fn subtract_requires_existing_key() {
        let mut b = MemoryBackend::new();
        assert_eq!(
            b.subtract(Data::from("n"), Data::Count(1), None).unwrap_err(),
            ErrorCode::NoSuchKey
        );
        b.put(Data::from("n"), Data::Count(9), None).unwrap();
        b.subtract(Data::from("n"), Data::Count(4), None).unwrap();
        assert_eq!(b.get(&Data::from("n")).unwrap(), Data::Count(5));
    }

    #[test]
    fn expiry_bookkeeping() {
        let mut b = MemoryBackend::new();
        b.put(Data::from("a"), Data::Count(1), Some(ts(100))).unwrap();
        b.put(Data::from("b"), Data::Count(2), None).unwrap();
        let exp = b.expiries().unwrap();
        assert_eq!(exp, vec![(Data::from("a"), ts(100))]);

        // Too early: nothing happens.
        assert!(!b.expire(&Data::from("a"), ts(99)).unwrap());
        assert!(b.exists(&Data::from("a")).unwrap());
        // Due: entry goes away.
        assert!(b.expire(&Data::from("a"), ts(100)).unwrap());
        assert!(!b.exists(&Data::from("a")).unwrap());
        // Missing key or no expiry: false.
        assert!(!b.expire(&Data::from("a"), ts(200)).unwrap());
        assert!(!b.expire(&Data::from("b"), ts(200)).unwrap());
    }

    #[test]
    fn reput_overrides_expiry() {
        let mut b = MemoryBackend::new();
        b.put(Data::from("k"), Data::Count(1), Some(ts(10))).unwrap();
        b.put(Data::from("k"), Data::Count(2), Some(ts(50))).unwrap();
        // The old reminder fires at 10, but the stored expiry moved on.
        assert!(!b.expire(&Data::from("k"), ts(10)).unwrap());
        assert!(b.expire(&Data::from("k"), ts(50)).unwrap());
    }

    #[test]
    fn snapshot_and_keys() {
        let mut b = MemoryBackend::new();
        b.put(Data::from("x"), Data::Count(1), None).unwrap();
        b.put(Data::from("y"), Data::Count(2), None).unwrap();
        let snap = b.snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&Data::from("x")), Some(&Data::Count(1)));
        let keys = b.keys().unwrap();
        assert_eq!(keys.as_set().unwrap().len(), 2);
        b.clear().unwrap();
        assert!(b.is_empty());
    }

    #[test]
    fn install_replaces_contents() {
        let mut b = MemoryBackend::new();
        b.put(Data::from("old"), Data::Count(1), None).unwrap();
        let mut snap = BTreeMap::new();
        snap.insert(Data::from("new"), Data::Count(2));
        b.install(snap);
        assert!(!b.exists(&Data::from("old")).unwrap());
        assert_eq!(b.get(&Data::from("new")).unwrap(), Data::Count(2));
    }
}
