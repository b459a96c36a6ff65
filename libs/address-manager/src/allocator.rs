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
//! Sticky lease allocation.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::{
    pool::{PoolError, Profile},
    session::SessionToken,
    store::{Lease, LeaseStore, LeaseStoreError, LeaseTable},
};

/// Address allocation errors.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The profile's pool is not usable.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Every address of the pool is held by another session.
    #[error("no address available in profile {0}")]
    PoolExhausted(String),
    /// The lease store failed.
    #[error(transparent)]
    Store(#[from] LeaseStoreError),
}

/// The rule an address was selected by, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AllocationTier {
    /// The address was last leased to this exact session.
    Reconnect,
    /// A released address last held by the same user in the same profile.
    Sticky,
    /// An address that was never leased.
    Virgin,
    /// A released address last held by someone else.
    Recycled,
}

/// A successful allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Address to push to the client.
    pub address: Ipv4Addr,
    /// Subnet mask to push to the client.
    pub mask: Ipv4Addr,
    /// Why this address was chosen.
    pub tier: AllocationTier,
}

/// What a release actually did.
///
/// Everything except [ReleaseOutcome::Released] is an anomaly. Anomalies are
/// logged but never fail the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was held by the releasing session and is now free.
    Released,
    /// The lease was held by a different session. It was freed anyway.
    SessionMismatch,
    /// No lease was ever stored for the address.
    UnknownAddress,
    /// The lease was already free.
    AlreadyReleased,
}

/// Assigns and releases addresses of profile pools.
///
/// The allocator keeps no state of its own. Each call is a single transaction
/// on the [LeaseStore].
#[derive(Debug, Clone)]
pub struct LeaseAllocator<S> {
    store: S,
}

impl<S: LeaseStore> LeaseAllocator<S> {
    /// Creates an allocator on top of a lease store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying lease store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Allocates an address of `profile` to a user session.
    ///
    /// The first pool address matching the first applicable rule wins:
    /// 1. its lease belongs to `session` (assigned or not),
    /// 2. it is free and was last held by `username` in this profile,
    /// 3. it was never leased,
    /// 4. it is free.
    ///
    /// The pool is validated before the store is touched.
    pub fn allocate(
        &self,
        profile: &Profile,
        username: &str,
        session: &SessionToken,
    ) -> Result<Allocation, AllocationError> {
        let candidates = profile.candidates()?;

        let allocation = self.store.transact(|table| {
            let (address, tier) =
                select_address(table, &candidates, profile.name(), username, session)
                    .ok_or_else(|| AllocationError::PoolExhausted(profile.name().to_string()))?;

            table.upsert(
                address,
                Lease {
                    assigned: true,
                    username: username.to_string(),
                    profile: profile.name().to_string(),
                    session: session.clone(),
                },
            );

            Ok::<_, AllocationError>(Allocation {
                address,
                mask: profile.mask(),
                tier,
            })
        })?;

        tracing::info!(
            address = %allocation.address,
            profile = profile.name(),
            username,
            tier = ?allocation.tier,
            "Address allocated"
        );
        Ok(allocation)
    }

    /// Releases an address held by a session.
    ///
    /// Release is best effort: unknown addresses, already free leases and
    /// foreign sessions are logged and reported through the returned
    /// [ReleaseOutcome], only store failures are errors. The owner and session
    /// of the lease are kept for sticky reuse.
    pub fn release(
        &self,
        address: Ipv4Addr,
        session: &SessionToken,
    ) -> Result<ReleaseOutcome, LeaseStoreError> {
        let outcome = self.store.transact(|table| {
            let Some(lease) = table.get_mut(address) else {
                return Ok(ReleaseOutcome::UnknownAddress);
            };
            if !lease.assigned {
                return Ok(ReleaseOutcome::AlreadyReleased);
            }

            let outcome = if lease.session == *session {
                ReleaseOutcome::Released
            } else {
                ReleaseOutcome::SessionMismatch
            };
            lease.assigned = false;
            Ok::<_, LeaseStoreError>(outcome)
        })?;

        match outcome {
            ReleaseOutcome::Released => {
                tracing::info!(%address, "Address released");
            }
            ReleaseOutcome::SessionMismatch => {
                tracing::warn!(
                    %address,
                    %session,
                    "Released address held by a different session"
                );
            }
            ReleaseOutcome::UnknownAddress => {
                tracing::warn!(%address, "Release of address without lease ignored");
            }
            ReleaseOutcome::AlreadyReleased => {
                tracing::warn!(%address, "Release of already free address ignored");
            }
        }
        Ok(outcome)
    }
}

/// Picks an address following the allocation rules in order.
fn select_address(
    table: &LeaseTable,
    candidates: &[Ipv4Addr],
    profile: &str,
    username: &str,
    session: &SessionToken,
) -> Option<(Ipv4Addr, AllocationTier)> {
    let first = |tier: AllocationTier, matches: &dyn Fn(Option<&Lease>) -> bool| {
        candidates
            .iter()
            .copied()
            .find(|address| matches(table.get(*address)))
            .map(|address| (address, tier))
    };

    first(AllocationTier::Reconnect, &|lease| {
        lease.is_some_and(|lease| lease.session == *session)
    })
    .or_else(|| {
        first(AllocationTier::Sticky, &|lease| {
            lease.is_some_and(|lease| {
                !lease.assigned && lease.username == username && lease.profile == profile
            })
        })
    })
    .or_else(|| first(AllocationTier::Virgin, &|lease| lease.is_none()))
    .or_else(|| {
        first(AllocationTier::Recycled, &|lease| {
            lease.is_some_and(|lease| !lease.assigned)
        })
    })
}
