// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! File backed lease store.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::store::{
    LeaseStore, LeaseStoreError, LeaseTable,
    dto::{LEASE_TABLE_VERSION, LeaseTableDto},
};

/// Lease table persisted as a JSON document.
///
/// Every operation opens the file anew, so separate processes can share the
/// same store. Transactions are serialized with an advisory lock on a sibling
/// `.lock` file and committed by atomically renaming a fully written temporary
/// file over the database.
#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileLeaseStore {
    /// Creates a store backed by the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: lock_path.into(),
        }
    }

    /// Creates the store of one hook instance, `<libdir>/<name>_<instance>.db`.
    pub fn for_instance(libdir: &Path, name: &str, instance: &str) -> Self {
        Self::new(libdir.join(format!("{name}_{instance}.db")))
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LeaseStoreError {
        LeaseStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open_lock_file(&self) -> Result<File, LeaseStoreError> {
        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.lock_error(e))
    }

    fn lock_error(&self, source: io::Error) -> LeaseStoreError {
        LeaseStoreError::Lock {
            path: self.lock_path.clone(),
            source,
        }
    }

    fn read(&self) -> Result<LeaseTable, LeaseStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LeaseTable::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LeaseTable::default());
        }

        let corrupt = |reason: anyhow::Error| {
            LeaseStoreError::Corrupt {
                path: self.path.clone(),
                reason,
            }
        };
        let dto: LeaseTableDto =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(anyhow::Error::new(e)))?;
        LeaseTable::try_from(dto).map_err(corrupt)
    }

    fn write(&self, table: &LeaseTable) -> Result<(), LeaseStoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;

        let mut writer = BufWriter::new(tmp);
        serde_json::to_writer_pretty(&mut writer, &LeaseTableDto::from(table))
            .map_err(|e| self.io_error(e.into()))?;
        writer.write_all(b"\n").map_err(|e| self.io_error(e))?;
        let tmp = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;

        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        tracing::debug!(
            path = %self.path.display(),
            leases = table.len(),
            version = LEASE_TABLE_VERSION,
            "Lease table committed"
        );
        Ok(())
    }
}

impl LeaseStore for FileLeaseStore {
    fn load(&self) -> Result<LeaseTable, LeaseStoreError> {
        let lock = self.open_lock_file()?;
        FileExt::lock_shared(&lock).map_err(|e| self.lock_error(e))?;
        self.read()
        // lock released when `lock` is dropped
    }

    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut LeaseTable) -> Result<T, E>,
        E: From<LeaseStoreError>,
    {
        let lock = self.open_lock_file()?;
        FileExt::lock_exclusive(&lock).map_err(|e| self.lock_error(e))?;

        let before = self.read()?;
        let mut table = before.clone();
        let result = f(&mut table)?;
        if table != before {
            self.write(&table)?;
        }

        drop(lock);
        Ok(result)
    }
}
