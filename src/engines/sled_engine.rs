use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use sled::{Db, Tree};

use super::{EngineOptions, KvsEngine, OpenMode};
use crate::protocol::FieldLimits;
use crate::{KvError, Result};

const META_TREE: &str = "__kvs_meta";
const KEY_MAX_FIELD: &str = "key_max";
const VALUE_MAX_FIELD: &str = "value_max";

/// A key-value store backed by the `sled` embedded database.
///
/// The field limits a store is created with are recorded alongside the data,
/// and reopening it with different limits fails.
pub struct SledKvsEngine {
    db: Db,
    limits: FieldLimits,
    read_only: bool,
}

impl SledKvsEngine {
    /// Opens the store at `path` according to `options`.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref();
        match options.mode {
            OpenMode::ReadOnly | OpenMode::ReadWrite if !path.exists() => {
                return Err(KvError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("store {} does not exist", path.display()),
                )));
            }
            OpenMode::ReadWriteReplace if path.exists() => {
                debug!("Replacing existing store at {}", path.display());
                if path.is_dir() {
                    fs::remove_dir_all(path)?;
                } else {
                    fs::remove_file(path)?;
                }
            }
            _ => {}
        }

        let db = sled::open(path)?;
        let read_only = options.mode == OpenMode::ReadOnly;
        check_limits(&db.open_tree(META_TREE)?, options.limits, read_only)?;

        Ok(Self {
            db,
            limits: options.limits,
            read_only,
        })
    }
}

/// Compares the recorded limits against the requested ones, recording them
/// on first open.
fn check_limits(meta: &Tree, limits: FieldLimits, read_only: bool) -> Result<()> {
    let stored = (read_field(meta, KEY_MAX_FIELD)?, read_field(meta, VALUE_MAX_FIELD)?);
    match stored {
        (Some(key_max), Some(value_max)) => {
            if key_max != limits.key_max as u64 || value_max != limits.value_max as u64 {
                return Err(KvError::LimitsMismatch(format!(
                    "store was created with key_max={key_max}, value_max={value_max} \
                     but opened with key_max={}, value_max={}",
                    limits.key_max, limits.value_max
                )));
            }
        }
        _ if read_only => {}
        _ => {
            meta.insert(KEY_MAX_FIELD, &(limits.key_max as u64).to_be_bytes()[..])?;
            meta.insert(VALUE_MAX_FIELD, &(limits.value_max as u64).to_be_bytes()[..])?;
            meta.flush()?;
        }
    }
    Ok(())
}

fn read_field(meta: &Tree, field: &str) -> Result<Option<u64>> {
    let Some(raw) = meta.get(field)? else {
        return Ok(None);
    };
    let bytes = <[u8; 8]>::try_from(&raw[..]).map_err(|_| {
        KvError::LimitsMismatch(format!("corrupt {field} record of {} bytes", raw.len()))
    })?;
    Ok(Some(u64::from_be_bytes(bytes)))
}

impl KvsEngine for SledKvsEngine {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .get(key.as_bytes())?
            .map(|ivec| String::from_utf8(ivec.to_vec()))
            .transpose()?)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        if self.read_only {
            return Err(KvError::ReadOnly);
        }
        if key.len() > self.limits.key_max {
            return Err(KvError::KeyTooLong {
                len: key.len(),
                max: self.limits.key_max,
            });
        }
        if value.len() > self.limits.value_max {
            return Err(KvError::ValueTooLong {
                len: value.len(),
                max: self.limits.value_max,
            });
        }
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
