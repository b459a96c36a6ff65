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
//! On-disk representation of the lease table.

use std::{collections::BTreeMap, net::Ipv4Addr};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::store::{Lease, LeaseTable};

/// Current schema version of the persisted table.
pub(crate) const LEASE_TABLE_VERSION: u32 = 1;

/// The persisted lease table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LeaseTableDto {
    /// Schema version.
    pub version: u32,
    /// Leases keyed by dotted-quad address.
    pub leases: BTreeMap<String, LeaseDto>,
}

/// A persisted lease.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LeaseDto {
    /// Whether the address is currently held.
    pub assigned: bool,
    /// Username of the last holder.
    pub username: String,
    /// Profile of the last assignment.
    pub profile: String,
    /// Session token of the last holder.
    pub session: String,
}

impl TryFrom<LeaseTableDto> for LeaseTable {
    type Error = anyhow::Error;

    fn try_from(value: LeaseTableDto) -> Result<Self, Self::Error> {
        if value.version != LEASE_TABLE_VERSION {
            bail!(
                "unsupported lease table version {} (expected {LEASE_TABLE_VERSION})",
                value.version
            );
        }

        value
            .leases
            .into_iter()
            .map(|(address, lease)| {
                Ok((
                    address
                        .parse::<Ipv4Addr>()
                        .with_context(|| format!("invalid lease address {address:?}"))?,
                    Lease {
                        assigned: lease.assigned,
                        username: lease.username,
                        profile: lease.profile,
                        session: lease.session.into(),
                    },
                ))
            })
            .collect()
    }
}

impl From<&LeaseTable> for LeaseTableDto {
    fn from(table: &LeaseTable) -> Self {
        LeaseTableDto {
            version: LEASE_TABLE_VERSION,
            leases: table
                .iter()
                .map(|(address, lease)| {
                    (
                        address.to_string(),
                        LeaseDto {
                            assigned: lease.assigned,
                            username: lease.username.clone(),
                            profile: lease.profile.clone(),
                            session: lease.session.as_str().to_string(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn rejects_unknown_version() {
        let dto = LeaseTableDto {
            version: 7,
            leases: BTreeMap::new(),
        };
        let err = LeaseTable::try_from(dto).unwrap_err();
        assert!(err.to_string().contains("version 7"), "got {err:#}");
    }

    #[test]
    fn rejects_malformed_address() {
        let json = r#"{"version":1,"leases":{"10.8.0.300":{"assigned":true,"username":"bob","profile":"sales","session":"s"}}}"#;
        let dto: LeaseTableDto = serde_json::from_str(json).unwrap();
        let err = LeaseTable::try_from(dto).unwrap_err();
        assert!(err.to_string().contains("10.8.0.300"), "got {err:#}");
    }
}
