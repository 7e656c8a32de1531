//! On-disk storage backend over redb
//!
//! One table maps borsh-encoded keys to borsh-encoded entries. The
//! database is the unit of durability; everything else (expiry driving,
//! replication) lives in the actors, exactly as with the in-memory
//! backend.

use crate::backend::{apply_add, apply_subtract, index_value, Backend};
use broker_model::{Data, DataType, Error, ErrorCode, Timestamp};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

#[derive(borsh::BorshSerialize, borsh::BorshDeserialize)]
struct DiskEntry {
    value: Data,
    expiry: Option<Timestamp>,
}

/// Persistent backend. Reopening the same path restores all entries and
/// their expiries.
pub struct DiskBackend {
    db: Database,
}

impl fmt::Debug for DiskBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskBackend").finish_non_exhaustive()
    }
}

fn storage_err(e: impl fmt::Display) -> Error {
    Error::with_message(ErrorCode::BackendFailure, e.to_string())
}

fn encode<T: borsh::BorshSerialize>(x: &T) -> Result<Vec<u8>, Error> {
    borsh::to_vec(x).map_err(storage_err)
}

fn decode<T: borsh::BorshDeserialize>(bytes: &[u8]) -> Result<T, Error> {
    borsh::from_slice(bytes)
        .map_err(|e| Error::with_message(ErrorCode::InvalidData, e.to_string()))
}

impl DiskBackend {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = Database::create(path.as_ref())
            .map_err(|e| Error::with_message(ErrorCode::CannotOpenFile, e.to_string()))?;
        Ok(Self { db })
    }

    fn read_entry(&self, key: &Data) -> Result<Option<DiskEntry>, Error> {
        let raw_key = encode(key)?;
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = match txn.open_table(ENTRIES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        match table.get(raw_key.as_slice()).map_err(storage_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn write_entry(&self, key: &Data, entry: &DiskEntry) -> Result<(), Error> {
        let raw_key = encode(key)?;
        let raw_val = encode(entry)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(storage_err)?;
            table
                .insert(raw_key.as_slice(), raw_val.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)
    }

    fn visit_all(
        &self,
        mut f: impl FnMut(Data, DiskEntry) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = match txn.open_table(ENTRIES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
            Err(e) => return Err(storage_err(e)),
        };
        for item in table.iter().map_err(storage_err)? {
            let (k, v) = item.map_err(storage_err)?;
            f(decode(k.value())?, decode(v.value())?)?;
        }
        Ok(())
    }
}

impl Backend for DiskBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<(), Error> {
        self.write_entry(&key, &DiskEntry { value, expiry })
    }

    fn get(&self, key: &Data) -> Result<Data, Error> {
        self.read_entry(key)?
            .map(|e| e.value)
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))
    }

    fn get_index(&self, key: &Data, aspect: &Data) -> Result<Data, Error> {
        let entry = self
            .read_entry(key)?
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
        let mut entry = self
            .read_entry(&key)?
            .unwrap_or_else(|| DiskEntry { value: init_type.default_value(), expiry: None });
        apply_add(&mut entry.value, value)?;
        entry.expiry = expiry;
        self.write_entry(&key, &entry)
    }

    fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
    ) -> Result<(), Error> {
        let mut entry = self
            .read_entry(&key)?
            .ok_or_else(|| Error::new(ErrorCode::NoSuchKey))?;
        apply_subtract(&mut entry.value, value)?;
        entry.expiry = expiry;
        self.write_entry(&key, &entry)
    }

    fn erase(&mut self, key: &Data) -> Result<(), Error> {
        let raw_key = encode(key)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(storage_err)?;
            table.remove(raw_key.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)
    }

    fn exists(&self, key: &Data) -> Result<bool, Error> {
        Ok(self.read_entry(key)?.is_some())
    }

    fn clear(&mut self) -> Result<(), Error> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        txn.delete_table(ENTRIES).map_err(storage_err)?;
        txn.commit().map_err(storage_err)
    }

    fn keys(&self) -> Result<Data, Error> {
        let mut keys = broker_model::data::Set::new();
        self.visit_all(|k, _| {
            keys.insert(k);
            Ok(())
        })?;
        Ok(Data::Set(keys))
    }

    fn snapshot(&self) -> Result<BTreeMap<Data, Data>, Error> {
        let mut out = BTreeMap::new();
        self.visit_all(|k, e| {
            out.insert(k, e.value);
            Ok(())
        })?;
        Ok(out)
    }

    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>, Error> {
        let mut out = Vec::new();
        self.visit_all(|k, e| {
            if let Some(at) = e.expiry {
                out.push((k, at));
            }
            Ok(())
        })?;
        Ok(out)
    }

    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, Error> {
        match self.read_entry(key)? {
            Some(DiskEntry { expiry: Some(at), .. }) if at <= now => {
                self.erase(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
