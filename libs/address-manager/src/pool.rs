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
//! Per-profile address pools.

use std::{fmt, net::Ipv4Addr};

use thiserror::Error;

/// Number of host values addressable by the last octet.
const LAST_OCTET_SPAN: u32 = 256;

/// Pool definition errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool runs past the end of the /24 its base address lives in.
    #[error("pool of {count} addresses starting at {base} crosses a /24 boundary")]
    SubnetOverflow {
        /// First address of the pool.
        base: Ipv4Addr,
        /// Number of addresses in the pool.
        count: u32,
    },
    /// The subnet mask is not a contiguous netmask.
    #[error("{0} is not a valid subnet mask")]
    InvalidMask(Ipv4Addr),
}

/// A named, contiguous block of addresses handed out to members of one
/// authorization group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    name: String,
    base: Ipv4Addr,
    count: u32,
    mask: Ipv4Addr,
}

impl Profile {
    /// Creates a new profile.
    ///
    /// Only the mask is validated here. A pool that crosses a /24 boundary is
    /// accepted and rejected on every allocation attempt instead, see
    /// [Profile::candidates].
    pub fn new(
        name: impl Into<String>,
        base: Ipv4Addr,
        count: u32,
        mask: Ipv4Addr,
    ) -> Result<Self, PoolError> {
        ipnet::ipv4_mask_to_prefix(mask).map_err(|_| PoolError::InvalidMask(mask))?;

        Ok(Self {
            name: name.into(),
            base,
            count,
            mask,
        })
    }

    /// Profile name, equal to the authorization group it serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First address of the pool.
    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    /// Number of addresses in the pool.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Subnet mask pushed to clients together with their address.
    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// Returns true if the pool fits in the /24 of its base address.
    pub fn fits_subnet(&self) -> bool {
        let [.., last] = self.base.octets();
        u32::from(last).saturating_add(self.count) <= LAST_OCTET_SPAN
    }

    /// All addresses of the pool in ascending order.
    ///
    /// Fails with [PoolError::SubnetOverflow] if the pool crosses a /24
    /// boundary.
    pub fn candidates(&self) -> Result<Vec<Ipv4Addr>, PoolError> {
        if !self.fits_subnet() {
            return Err(PoolError::SubnetOverflow {
                base: self.base,
                count: self.count,
            });
        }

        let start = self.base.to_bits();
        Ok((0..self.count)
            .map(|offset| Ipv4Addr::from_bits(start + offset))
            .collect())
    }

    /// Checks if the address is part of this pool.
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let start = self.base.to_bits();
        let addr = address.to_bits();
        addr >= start && u64::from(addr) < u64::from(start) + u64::from(self.count)
    }
}

impl fmt::Display for Profile {
    // Format as name[base+count/mask]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}+{}/{}]",
            self.name, self.base, self.count, self.mask
        )
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn profile(base: &str, count: u32) -> Profile {
        Profile::new(
            "sales",
            base.parse().unwrap(),
            count,
            "255.255.255.0".parse().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn candidates_are_ascending_from_base() {
        let pool = profile("10.8.0.10", 3);
        assert_eq!(
            pool.candidates().unwrap(),
            vec![
                Ipv4Addr::new(10, 8, 0, 10),
                Ipv4Addr::new(10, 8, 0, 11),
                Ipv4Addr::new(10, 8, 0, 12),
            ]
        );
    }

    #[test]
    fn pool_may_end_on_last_address_of_subnet() {
        let pool = profile("10.8.0.252", 4);
        let candidates = pool.candidates().unwrap();
        assert_eq!(candidates.last(), Some(&Ipv4Addr::new(10, 8, 0, 255)));
    }

    #[test]
    fn pool_crossing_subnet_boundary_is_rejected() {
        let pool = profile("10.8.0.253", 4);
        assert!(!pool.fits_subnet());
        assert_eq!(
            pool.candidates(),
            Err(PoolError::SubnetOverflow {
                base: Ipv4Addr::new(10, 8, 0, 253),
                count: 4,
            })
        );
    }

    #[test]
    fn huge_count_does_not_overflow() {
        let pool = profile("10.8.0.0", u32::MAX);
        assert!(matches!(
            pool.candidates(),
            Err(PoolError::SubnetOverflow { .. })
        ));
    }

    #[test]
    fn empty_pool_has_no_candidates() {
        assert!(profile("10.8.0.0", 0).candidates().unwrap().is_empty());
    }

    #[test]
    fn non_contiguous_mask_is_rejected() {
        let result = Profile::new(
            "sales",
            Ipv4Addr::new(10, 8, 0, 0),
            4,
            Ipv4Addr::new(255, 0, 255, 0),
        );
        assert_eq!(
            result,
            Err(PoolError::InvalidMask(Ipv4Addr::new(255, 0, 255, 0)))
        );
    }

    #[test]
    fn contains_only_pool_addresses() {
        let pool = profile("10.8.0.10", 2);
        assert!(!pool.contains(Ipv4Addr::new(10, 8, 0, 9)));
        assert!(pool.contains(Ipv4Addr::new(10, 8, 0, 10)));
        assert!(pool.contains(Ipv4Addr::new(10, 8, 0, 11)));
        assert!(!pool.contains(Ipv4Addr::new(10, 8, 0, 12)));
    }
}
