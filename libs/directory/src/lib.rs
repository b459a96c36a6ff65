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
//! # Directory
//!
//! The [Directory] capability looks up users and tests group membership. The
//! production implementation talks LDAP ([ldap::LdapDirectory]), tests use
//! [memory::StaticDirectory].
//!
//! Connections are scoped to a single authorization decision: they are opened
//! with [Directory::bind] and closed when dropped.

use thiserror::Error;

pub mod config;
pub mod ldap;
pub mod memory;

pub use config::DirectoryConfig;

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory server could not be reached.
    #[error("failed to connect to directory {url}: {source}")]
    Connect {
        /// Server URL.
        url: String,
        /// Underlying error.
        #[source]
        source: ldap3::LdapError,
    },
    /// The bind was rejected.
    #[error("bind as {dn} failed: {reason}")]
    AuthFailure {
        /// DN used for the bind.
        dn: String,
        /// Reason reported by the server.
        reason: String,
    },
    /// A search failed.
    #[error("search under {base} with filter {filter} failed: {source}")]
    Search {
        /// Search base DN.
        base: String,
        /// Search filter.
        filter: String,
        /// Underlying error.
        #[source]
        source: ldap3::LdapError,
    },
}

/// User lookup and group membership.
pub trait Directory {
    /// An open, bound connection.
    type Connection;

    /// Opens a connection and binds with the given credentials.
    fn bind(&self, dn: &str, password: &str) -> Result<Self::Connection, DirectoryError>;

    /// Finds the DN of the user with the given login name.
    fn search_user(
        &self,
        conn: &mut Self::Connection,
        uid: &str,
    ) -> Result<Option<String>, DirectoryError>;

    /// Checks whether `user_dn` is a member of the group `group_dn`.
    fn is_member(
        &self,
        conn: &mut Self::Connection,
        group_dn: &str,
        user_dn: &str,
    ) -> Result<bool, DirectoryError>;
}

/// Compares two distinguished names, ignoring case and blanks after RDN
/// separators.
pub fn dn_eq(a: &str, b: &str) -> bool {
    fn normalize(dn: &str) -> String {
        dn.split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",")
            .to_ascii_lowercase()
    }
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn dn_comparison_ignores_case_and_spacing() {
        assert!(dn_eq(
            "uid=Alice, ou=People,dc=example,dc=com",
            "uid=alice,ou=people,dc=example,dc=com"
        ));
        assert!(!dn_eq(
            "uid=alice,ou=people,dc=example,dc=com",
            "uid=alice2,ou=people,dc=example,dc=com"
        ));
    }
}
