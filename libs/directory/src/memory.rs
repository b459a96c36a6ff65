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
//! In-memory directory.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use crate::{Directory, DirectoryError, dn_eq};

/// A directory with a fixed set of users and group memberships.
///
/// Records the group DNs it was asked about, so callers can check which
/// membership tests an authorization decision performed.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    users: BTreeMap<String, String>,
    members: BTreeMap<String, BTreeSet<String>>,
    credentials: Option<(String, String)>,
    checked_groups: Arc<Mutex<Vec<String>>>,
}

/// Connection handle of a [StaticDirectory].
#[derive(Debug)]
pub struct StaticConnection {
    bind_dn: String,
}

impl StaticConnection {
    /// DN the connection was bound with.
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }
}

impl StaticDirectory {
    /// Creates an empty directory accepting any non-empty bind password.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept binds with exactly these credentials.
    pub fn with_credentials(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((dn.into(), password.into()));
        self
    }

    /// Adds a user entry.
    pub fn with_user(mut self, uid: impl Into<String>, dn: impl Into<String>) -> Self {
        self.users.insert(uid.into(), dn.into());
        self
    }

    /// Adds `user_dn` to the members of `group_dn`.
    pub fn with_member(mut self, group_dn: impl Into<String>, user_dn: impl Into<String>) -> Self {
        self.members
            .entry(group_dn.into().to_ascii_lowercase())
            .or_default()
            .insert(user_dn.into());
        self
    }

    /// Group DNs passed to [Directory::is_member] so far, in call order.
    pub fn checked_groups(&self) -> Vec<String> {
        self.checked_groups
            .lock()
            .map(|groups| groups.clone())
            .unwrap_or_default()
    }
}

impl Directory for StaticDirectory {
    type Connection = StaticConnection;

    fn bind(&self, dn: &str, password: &str) -> Result<StaticConnection, DirectoryError> {
        let accepted = match &self.credentials {
            Some((expected_dn, expected_password)) => {
                dn_eq(dn, expected_dn) && password == expected_password
            }
            None => !password.is_empty(),
        };
        if !accepted {
            return Err(DirectoryError::AuthFailure {
                dn: dn.to_string(),
                reason: "invalid credentials".to_string(),
            });
        }
        Ok(StaticConnection {
            bind_dn: dn.to_string(),
        })
    }

    fn search_user(
        &self,
        _conn: &mut StaticConnection,
        uid: &str,
    ) -> Result<Option<String>, DirectoryError> {
        Ok(self.users.get(uid).cloned())
    }

    fn is_member(
        &self,
        _conn: &mut StaticConnection,
        group_dn: &str,
        user_dn: &str,
    ) -> Result<bool, DirectoryError> {
        if let Ok(mut checked) = self.checked_groups.lock() {
            checked.push(group_dn.to_string());
        }
        Ok(self
            .members
            .get(&group_dn.to_ascii_lowercase())
            .is_some_and(|members| members.iter().any(|member| dn_eq(member, user_dn))))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    const DEVS: &str = "cn=devs,ou=groups,dc=example,dc=com";
    const ALICE: &str = "uid=alice,ou=people,dc=example,dc=com";

    #[test]
    fn bind_checks_configured_credentials() {
        let directory = StaticDirectory::new().with_credentials("cn=svc", "secret");
        assert!(directory.bind("cn=svc", "secret").is_ok());
        assert!(matches!(
            directory.bind("cn=svc", "wrong"),
            Err(DirectoryError::AuthFailure { .. })
        ));
    }

    #[test]
    fn membership_is_recorded() {
        let directory = StaticDirectory::new()
            .with_user("alice", ALICE)
            .with_member(DEVS, ALICE);
        let mut conn = directory.bind("cn=svc", "secret").unwrap();

        let dn = directory.search_user(&mut conn, "alice").unwrap().unwrap();
        assert!(directory.is_member(&mut conn, DEVS, &dn).unwrap());
        assert!(!directory.is_member(&mut conn, "cn=ops,ou=groups", &dn).unwrap());
        assert_eq!(
            directory.checked_groups(),
            vec![DEVS.to_string(), "cn=ops,ou=groups".to_string()]
        );
        assert_eq!(directory.search_user(&mut conn, "bob").unwrap(), None);
    }
}
