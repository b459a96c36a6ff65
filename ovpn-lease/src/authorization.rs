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
//! Group based authorization.

use std::collections::BTreeMap;

use directory::{Directory, DirectoryConfig, DirectoryError};
use thiserror::Error;

/// Authorization errors.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// The common name has no directory entry.
    #[error("user {0} not found in directory")]
    UserNotFound(String),
    /// The requested username is neither the common name nor a group.
    #[error("requested profile {0} is not a configured group")]
    UnknownProfile(String),
    /// The user is not a member of any candidate group.
    #[error("user {0} is not a member of any permitted group")]
    NoMatchingProfile(String),
    /// The directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Resolves a client to the profile it may use.
///
/// Group names double as profile names.
pub struct AuthorizationResolver<'a, D> {
    directory: &'a D,
    config: &'a DirectoryConfig,
    groups: &'a BTreeMap<String, String>,
}

impl<'a, D: Directory> AuthorizationResolver<'a, D> {
    /// Creates a resolver over the given groups, group name to group DN.
    pub fn new(
        directory: &'a D,
        config: &'a DirectoryConfig,
        groups: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            directory,
            config,
            groups,
        }
    }

    /// Returns the profile `common_name` is authorized for.
    ///
    /// If the client sent its common name as username, every group is tested
    /// in lexicographic order and the first one the user belongs to wins.
    /// Otherwise the username names the requested group and only that one is
    /// tested.
    pub fn resolve(
        &self,
        common_name: &str,
        requested_username: &str,
    ) -> Result<String, AuthorizationError> {
        let candidates: Vec<(&String, &String)> = if requested_username == common_name {
            self.groups.iter().collect()
        } else {
            let group = self
                .groups
                .get_key_value(requested_username)
                .ok_or_else(|| AuthorizationError::UnknownProfile(requested_username.to_string()))?;
            vec![group]
        };

        let mut conn = self
            .directory
            .bind(&self.config.bind_dn, &self.config.bind_password)?;
        let user_dn = self
            .directory
            .search_user(&mut conn, common_name)?
            .ok_or_else(|| AuthorizationError::UserNotFound(common_name.to_string()))?;

        for (name, group_dn) in candidates {
            if self.directory.is_member(&mut conn, group_dn, &user_dn)? {
                tracing::info!(common_name, %user_dn, profile = %name, "Client authorized");
                return Ok(name.clone());
            }
            tracing::debug!(common_name, %user_dn, group = %name, "Not a member");
        }

        Err(AuthorizationError::NoMatchingProfile(
            common_name.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use directory::memory::StaticDirectory;
    use test_log::test;

    use super::*;

    const DEVS: &str = "cn=devs,ou=groups,dc=example,dc=com";
    const OPS: &str = "cn=ops,ou=groups,dc=example,dc=com";
    const ALICE: &str = "uid=alice,ou=people,dc=example,dc=com";
    const BOB: &str = "uid=bob,ou=people,dc=example,dc=com";

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            host: "ldap.example.com".to_string(),
            port: None,
            tls: false,
            bind_dn: "cn=openvpn,dc=example,dc=com".to_string(),
            bind_password: "secret".to_string(),
            user_base_dn: "ou=people,dc=example,dc=com".to_string(),
            user_search_filter: "uid=%u".to_string(),
            group_base_dn: "ou=groups,dc=example,dc=com".to_string(),
            group_member_attr: "member".to_string(),
        }
    }

    fn groups() -> BTreeMap<String, String> {
        // inserted out of order on purpose
        [("ops", OPS), ("devs", DEVS)]
            .into_iter()
            .map(|(name, dn)| (name.to_string(), dn.to_string()))
            .collect()
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_credentials("cn=openvpn,dc=example,dc=com", "secret")
            .with_user("alice", ALICE)
            .with_user("bob", BOB)
            .with_member(DEVS, ALICE)
            .with_member(OPS, ALICE)
            .with_member(OPS, BOB)
    }

    #[test]
    fn common_name_as_username_picks_first_group_by_name() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert_eq!(resolver.resolve("alice", "alice").unwrap(), "devs");
        assert_eq!(directory.checked_groups(), vec![DEVS.to_string()]);
    }

    #[test]
    fn lexicographic_search_continues_past_non_member_groups() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert_eq!(resolver.resolve("bob", "bob").unwrap(), "ops");
        assert_eq!(
            directory.checked_groups(),
            vec![DEVS.to_string(), OPS.to_string()]
        );
    }

    #[test]
    fn requested_group_is_tested_alone() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert_eq!(resolver.resolve("alice", "ops").unwrap(), "ops");
        assert_eq!(directory.checked_groups(), vec![OPS.to_string()]);
    }

    #[test]
    fn requested_group_without_membership_fails() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert!(matches!(
            resolver.resolve("bob", "devs"),
            Err(AuthorizationError::NoMatchingProfile(user)) if user == "bob"
        ));
    }

    #[test]
    fn unknown_requested_group_fails_without_directory_access() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert!(matches!(
            resolver.resolve("alice", "admins"),
            Err(AuthorizationError::UnknownProfile(name)) if name == "admins"
        ));
        assert!(directory.checked_groups().is_empty());
    }

    #[test]
    fn unknown_user_fails_before_membership_tests() {
        let (directory, config, groups) = (directory(), config(), groups());
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert!(matches!(
            resolver.resolve("mallory", "mallory"),
            Err(AuthorizationError::UserNotFound(name)) if name == "mallory"
        ));
        assert!(directory.checked_groups().is_empty());
    }

    #[test]
    fn rejected_bind_is_a_directory_error() {
        let (directory, mut config, groups) = (directory(), config(), groups());
        config.bind_password = "wrong".to_string();
        let resolver = AuthorizationResolver::new(&directory, &config, &groups);
        assert!(matches!(
            resolver.resolve("alice", "alice"),
            Err(AuthorizationError::Directory(
                DirectoryError::AuthFailure { .. }
            ))
        ));
    }
}
