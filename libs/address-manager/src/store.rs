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
//! Lease persistence.
//!
//! A [LeaseStore] owns the mapping from address to [Lease]. All changes go
//! through [LeaseStore::transact], which runs one read-modify-write cycle
//! exclusively with respect to every other cycle on the same store.

use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::session::SessionToken;

pub(crate) mod dto;
mod file;

pub use file::FileLeaseStore;

/// The persisted record of an address's current or most recent assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Whether a client currently holds the address.
    pub assigned: bool,
    /// Username of the last holder.
    pub username: String,
    /// Profile the address was last handed out for.
    pub profile: String,
    /// Session of the last holder.
    pub session: SessionToken,
}

/// Mapping from address to lease.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeaseTable {
    leases: BTreeMap<Ipv4Addr, Lease>,
}

impl LeaseTable {
    /// Returns the lease stored for an address.
    pub fn get(&self, address: Ipv4Addr) -> Option<&Lease> {
        self.leases.get(&address)
    }

    /// Returns a mutable reference to the lease stored for an address.
    pub fn get_mut(&mut self, address: Ipv4Addr) -> Option<&mut Lease> {
        self.leases.get_mut(&address)
    }

    /// Inserts or replaces the lease of an address.
    pub fn upsert(&mut self, address: Ipv4Addr, lease: Lease) {
        self.leases.insert(address, lease);
    }

    /// Iterates over all leases ordered by address.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Addr, &Lease)> {
        self.leases.iter()
    }

    /// Addresses currently assigned, ordered.
    pub fn assigned(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.leases
            .iter()
            .filter(|(_, lease)| lease.assigned)
            .map(|(addr, _)| *addr)
    }

    /// Number of stored leases.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Returns true if no lease was ever stored.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

impl FromIterator<(Ipv4Addr, Lease)> for LeaseTable {
    fn from_iter<I: IntoIterator<Item = (Ipv4Addr, Lease)>>(iter: I) -> Self {
        Self {
            leases: iter.into_iter().collect(),
        }
    }
}

/// Lease store errors.
#[derive(Debug, Error)]
pub enum LeaseStoreError {
    /// Reading or writing the backing storage failed.
    #[error("lease store I/O error on {path}: {source}")]
    Io {
        /// File the operation failed on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The exclusive lock could not be taken.
    #[error("failed to lock lease store {path}: {source}")]
    Lock {
        /// Lock file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The persisted table could not be decoded.
    #[error("corrupt lease table {path}: {reason:#}")]
    Corrupt {
        /// Database file.
        path: PathBuf,
        /// What was wrong with it.
        reason: anyhow::Error,
    },
    /// A previous holder of the in-memory table panicked.
    #[error("lease table lock poisoned")]
    Poisoned,
}

/// Durable mapping from address to [Lease].
///
/// Implementations guarantee that
/// * a load after a committed transaction observes it,
/// * a transaction is all-or-nothing and mutually exclusive with every other
///   transaction on the same store,
/// * a store that was never written reads as an empty table.
pub trait LeaseStore {
    /// Reads a snapshot of the table.
    fn load(&self) -> Result<LeaseTable, LeaseStoreError>;

    /// Runs `f` on the table as one exclusive read-modify-write cycle.
    ///
    /// Changes made by `f` are committed only if it returns `Ok`.
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut LeaseTable) -> Result<T, E>,
        E: From<LeaseStoreError>;
}

/// Lease store kept in memory, shared between clones.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLeaseStore {
    table: Arc<Mutex<LeaseTable>>,
}

impl InMemoryLeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given table.
    pub fn from_table(table: LeaseTable) -> Self {
        Self {
            table: Arc::new(Mutex::new(table)),
        }
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn load(&self) -> Result<LeaseTable, LeaseStoreError> {
        let table = self.table.lock().map_err(|_| LeaseStoreError::Poisoned)?;
        Ok(table.clone())
    }

    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut LeaseTable) -> Result<T, E>,
        E: From<LeaseStoreError>,
    {
        let mut guard = self.table.lock().map_err(|_| LeaseStoreError::Poisoned)?;
        let mut working = guard.clone();
        let result = f(&mut working)?;
        *guard = working;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn lease(assigned: bool) -> Lease {
        Lease {
            assigned,
            username: "bob".to_string(),
            profile: "sales".to_string(),
            session: SessionToken::from("s1".to_string()),
        }
    }

    #[test]
    fn failed_transaction_is_not_committed() {
        let store = InMemoryLeaseStore::new();
        let result: Result<(), LeaseStoreError> = store.transact(|table| {
            table.upsert(Ipv4Addr::new(10, 8, 0, 1), lease(true));
            Err(LeaseStoreError::Poisoned)
        });
        assert!(result.is_err());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn committed_transaction_is_visible_to_clones() {
        let store = InMemoryLeaseStore::new();
        let other = store.clone();
        store
            .transact(|table| {
                table.upsert(Ipv4Addr::new(10, 8, 0, 1), lease(true));
                Ok::<_, LeaseStoreError>(())
            })
            .unwrap();
        let table = other.load().unwrap();
        assert_eq!(table.get(Ipv4Addr::new(10, 8, 0, 1)), Some(&lease(true)));
    }

    #[test]
    fn assigned_lists_only_held_addresses() {
        let table: LeaseTable = [
            (Ipv4Addr::new(10, 8, 0, 1), lease(true)),
            (Ipv4Addr::new(10, 8, 0, 2), lease(false)),
            (Ipv4Addr::new(10, 8, 0, 3), lease(true)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            table.assigned().collect::<Vec<_>>(),
            vec![Ipv4Addr::new(10, 8, 0, 1), Ipv4Addr::new(10, 8, 0, 3)]
        );
    }
}
