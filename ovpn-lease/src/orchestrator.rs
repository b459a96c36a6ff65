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
//! Per-event orchestration.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use address_manager::{
    allocator::{Allocation, LeaseAllocator, ReleaseOutcome},
    store::LeaseStore,
};
use directory::Directory;

use crate::{
    HookError,
    authorization::AuthorizationResolver,
    config::{HookConfig, InstanceConfig},
    directive::ClientDirective,
    event::{ConnectEvent, DisconnectEvent, HookEvent},
};

/// Result of a handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// The client was given an address.
    Connected {
        /// Common name of the client.
        common_name: String,
        /// Profile the client was authorized for.
        profile: String,
        /// The assigned address.
        allocation: Allocation,
    },
    /// The client's address was released.
    Disconnected {
        /// Common name of the client.
        common_name: String,
        /// What the release did.
        outcome: ReleaseOutcome,
    },
}

impl Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookOutcome::Connected {
                common_name,
                profile,
                allocation,
            } => {
                write!(
                    f,
                    "{common_name} connected with profile {profile}, address {} mask {}",
                    allocation.address, allocation.mask
                )
            }
            HookOutcome::Disconnected {
                common_name,
                outcome,
            } => write!(f, "{common_name} disconnected ({outcome:?})"),
        }
    }
}

/// Handles one hook event: authorize and allocate on connect, release on
/// disconnect.
pub struct ConnectionOrchestrator<'a, D, S> {
    config: &'a HookConfig,
    instance: &'a InstanceConfig,
    groups: BTreeMap<String, String>,
    directory: &'a D,
    allocator: LeaseAllocator<S>,
}

impl<'a, D: Directory, S: LeaseStore> ConnectionOrchestrator<'a, D, S> {
    /// Creates an orchestrator for one OpenVPN instance.
    pub fn new(
        config: &'a HookConfig,
        instance: &'a InstanceConfig,
        directory: &'a D,
        store: S,
    ) -> Self {
        Self {
            config,
            instance,
            groups: config.served_groups(instance),
            directory,
            allocator: LeaseAllocator::new(store),
        }
    }

    /// The allocator working on the instance's lease store.
    pub fn allocator(&self) -> &LeaseAllocator<S> {
        &self.allocator
    }

    /// Handles an event.
    pub fn handle(&self, event: &HookEvent) -> Result<HookOutcome, HookError> {
        match event {
            HookEvent::Connect(event) => self.connect(event),
            HookEvent::Disconnect(event) => self.disconnect(event),
        }
    }

    /// Writes an address push on success and a disable directive on any
    /// failure, so the client config file never carries a stale address.
    fn connect(&self, event: &ConnectEvent) -> Result<HookOutcome, HookError> {
        let (profile, allocation) = match self.authorize_and_allocate(event) {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(
                    common_name = %event.client.common_name,
                    error = %e,
                    "Connect refused"
                );
                if let Err(write_error) = ClientDirective::Disable.write_to(&event.config_file) {
                    tracing::error!(
                        path = %event.config_file.display(),
                        error = %write_error,
                        "Failed to write disable directive"
                    );
                }
                return Err(e);
            }
        };

        ClientDirective::Push {
            address: allocation.address,
            mask: allocation.mask,
        }
        .write_to(&event.config_file)
        .map_err(|source| {
            HookError::Directive {
                path: event.config_file.clone(),
                source,
            }
        })?;

        Ok(HookOutcome::Connected {
            common_name: event.client.common_name.clone(),
            profile,
            allocation,
        })
    }

    fn authorize_and_allocate(
        &self,
        event: &ConnectEvent,
    ) -> Result<(String, Allocation), HookError> {
        let client = &event.client;
        let session = client.session();

        let resolver =
            AuthorizationResolver::new(self.directory, self.config.ldap(), &self.groups);
        let profile_name = resolver.resolve(&client.common_name, &client.username)?;

        let profile = self.instance.profile(&profile_name).ok_or_else(|| {
            HookError::ProfileNotConfigured {
                profile: profile_name.clone(),
                instance: self.instance.name().to_string(),
            }
        })?;

        // The certificate identifies the owner, the username may name a group.
        let allocation = self
            .allocator
            .allocate(profile, &client.common_name, &session)?;
        Ok((profile_name, allocation))
    }

    /// Releases the client's address. Release anomalies are not errors.
    fn disconnect(&self, event: &DisconnectEvent) -> Result<HookOutcome, HookError> {
        let session = event.client.session();
        tracing::debug!(
            address = %event.address,
            mask = ?event.mask,
            %session,
            "Releasing address"
        );
        let outcome = self.allocator.release(event.address, &session)?;

        Ok(HookOutcome::Disconnected {
            common_name: event.client.common_name.clone(),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, net::Ipv4Addr, path::PathBuf};

    use address_manager::{
        allocator::{AllocationError, AllocationTier},
        pool::PoolError,
        store::InMemoryLeaseStore,
    };
    use directory::memory::StaticDirectory;
    use tempfile::TempDir;
    use test_log::test;

    use super::*;
    use crate::{
        authorization::AuthorizationError,
        event::{ClientContext, DisconnectEvent},
    };

    const CONFIG: &str = r#"
ldap:
  host: ldap.example.com
  bind_dn: cn=openvpn,dc=example,dc=com
  bind_password: secret
  user_base_dn: ou=people,dc=example,dc=com
  group_base_dn: ou=groups,dc=example,dc=com
groups:
  archive: cn=archive,ou=groups,dc=example,dc=com
  devs: cn=devs,ou=groups,dc=example,dc=com
  ops: cn=ops,ou=groups,dc=example,dc=com
  wide: cn=wide,ou=groups,dc=example,dc=com
profiles:
  server:
    devs: { base: 10.8.0.10, count: 2, mask: 255.255.255.0 }
    wide: { base: 10.8.0.253, count: 4, mask: 255.255.255.0 }
"#;

    const ARCHIVE: &str = "cn=archive,ou=groups,dc=example,dc=com";
    const DEVS: &str = "cn=devs,ou=groups,dc=example,dc=com";
    const OPS: &str = "cn=ops,ou=groups,dc=example,dc=com";
    const WIDE: &str = "cn=wide,ou=groups,dc=example,dc=com";

    struct Fixture {
        config: HookConfig,
        directory: StaticDirectory,
        store: InMemoryLeaseStore,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let mut directory = StaticDirectory::new();
            for user in ["alice", "bob", "carol"] {
                let dn = format!("uid={user},ou=people,dc=example,dc=com");
                directory = directory.with_user(user, &dn).with_member(DEVS, &dn);
            }
            // archive has no pool in this instance and sorts before devs
            directory = directory.with_member(ARCHIVE, "uid=alice,ou=people,dc=example,dc=com");
            let ops_dn = "uid=olga,ou=people,dc=example,dc=com";
            let wide_dn = "uid=walt,ou=people,dc=example,dc=com";
            directory = directory
                .with_user("olga", ops_dn)
                .with_member(OPS, ops_dn)
                .with_user("walt", wide_dn)
                .with_member(WIDE, wide_dn);

            Self {
                config: HookConfig::from_yaml(CONFIG).unwrap(),
                directory,
                store: InMemoryLeaseStore::new(),
                dir: TempDir::new().unwrap(),
            }
        }

        fn orchestrator(&self) -> ConnectionOrchestrator<'_, StaticDirectory, InMemoryLeaseStore> {
            ConnectionOrchestrator::new(
                &self.config,
                self.config.instance("server").unwrap(),
                &self.directory,
                self.store.clone(),
            )
        }

        fn config_file(&self, name: &str) -> PathBuf {
            self.dir.path().join(format!("{name}.cc"))
        }

        fn connect(&self, name: &str, port: u16) -> (Result<HookOutcome, HookError>, String) {
            self.connect_as(name, name, port)
        }

        fn connect_as(
            &self,
            name: &str,
            username: &str,
            port: u16,
        ) -> (Result<HookOutcome, HookError>, String) {
            let config_file = self.config_file(name);
            let mut client = client(name, port);
            client.username = username.to_string();
            let event = HookEvent::Connect(ConnectEvent {
                client,
                config_file: config_file.clone(),
            });
            let result = self.orchestrator().handle(&event);
            let written = fs::read_to_string(config_file).unwrap_or_default();
            (result, written)
        }

        fn disconnect(&self, name: &str, port: u16, address: Ipv4Addr) -> HookOutcome {
            let event = HookEvent::Disconnect(DisconnectEvent {
                client: client(name, port),
                address,
                mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            });
            self.orchestrator().handle(&event).unwrap()
        }
    }

    fn client(name: &str, port: u16) -> ClientContext {
        ClientContext {
            common_name: name.to_string(),
            username: name.to_string(),
            client_ip: "198.51.100.7".to_string(),
            client_port: port,
        }
    }

    #[test]
    fn connect_pushes_allocated_address() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect("alice", 40000);

        let HookOutcome::Connected {
            profile,
            allocation,
            ..
        } = result.unwrap()
        else {
            panic!("expected connect outcome");
        };
        assert_eq!(profile, "devs");
        assert_eq!(allocation.address, Ipv4Addr::new(10, 8, 0, 10));
        assert_eq!(written, "ifconfig-push 10.8.0.10 255.255.255.0\n");
    }

    #[test]
    fn unauthorized_client_is_disabled() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect("mallory", 40000);
        assert!(matches!(
            result,
            Err(HookError::Authorization(AuthorizationError::UserNotFound(_)))
        ));
        assert_eq!(written, "disable\n");
    }

    #[test]
    fn groups_without_pool_are_skipped() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect("alice", 40000);

        let HookOutcome::Connected { profile, .. } = result.unwrap() else {
            panic!("expected connect outcome");
        };
        assert_eq!(profile, "devs");
        assert_eq!(written, "ifconfig-push 10.8.0.10 255.255.255.0\n");
        assert!(!fixture.directory.checked_groups().contains(&ARCHIVE.to_string()));
    }

    #[test]
    fn member_of_unserved_group_only_is_disabled() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect("olga", 40000);
        assert!(matches!(
            result,
            Err(HookError::Authorization(AuthorizationError::NoMatchingProfile(_)))
        ));
        assert_eq!(written, "disable\n");
    }

    #[test]
    fn requesting_unserved_group_is_unknown_profile() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect_as("olga", "ops", 40000);
        assert!(matches!(
            result,
            Err(HookError::Authorization(AuthorizationError::UnknownProfile(ref name))) if name == "ops"
        ));
        assert_eq!(written, "disable\n");
        assert!(fixture.directory.checked_groups().is_empty());
    }

    #[test]
    fn lease_owner_is_the_common_name() {
        let fixture = Fixture::new();
        let (result, _) = fixture.connect_as("alice", "devs", 40000);
        let HookOutcome::Connected { allocation, .. } = result.unwrap() else {
            panic!("expected connect outcome");
        };

        let table = fixture.store.load().unwrap();
        assert_eq!(table.get(allocation.address).unwrap().username, "alice");
    }

    #[test]
    fn overflowing_profile_is_disabled() {
        let fixture = Fixture::new();
        let (result, written) = fixture.connect("walt", 40000);
        assert!(matches!(
            result,
            Err(HookError::Allocation(AllocationError::Pool(
                PoolError::SubnetOverflow { .. }
            )))
        ));
        assert_eq!(written, "disable\n");
        assert!(fixture.store.load().unwrap().is_empty());
    }

    #[test]
    fn exhausted_pool_overwrites_stale_push() {
        let fixture = Fixture::new();
        fixture.connect("alice", 40000).0.unwrap();
        fixture.connect("bob", 40000).0.unwrap();

        fs::write(
            fixture.config_file("carol"),
            "ifconfig-push 10.8.0.10 255.255.255.0\n",
        )
        .unwrap();
        let (result, written) = fixture.connect("carol", 40000);
        assert!(matches!(
            result,
            Err(HookError::Allocation(AllocationError::PoolExhausted(_)))
        ));
        assert_eq!(written, "disable\n");
    }

    #[test]
    fn disconnect_then_reconnect_keeps_address() {
        let fixture = Fixture::new();
        let (first, _) = fixture.connect("alice", 40000);
        let HookOutcome::Connected { allocation, .. } = first.unwrap() else {
            panic!("expected connect outcome");
        };

        let outcome = fixture.disconnect("alice", 40000, allocation.address);
        assert!(matches!(
            outcome,
            HookOutcome::Disconnected {
                outcome: ReleaseOutcome::Released,
                ..
            }
        ));

        // new source port, new session, same owner
        let (second, written) = fixture.connect("alice", 40001);
        let HookOutcome::Connected {
            allocation: again, ..
        } = second.unwrap()
        else {
            panic!("expected connect outcome");
        };
        assert_eq!(again.address, allocation.address);
        assert_eq!(again.tier, AllocationTier::Sticky);
        assert_eq!(written, format!("ifconfig-push {} 255.255.255.0\n", again.address));
    }

    #[test]
    fn disconnect_of_unknown_address_succeeds() {
        let fixture = Fixture::new();
        let outcome = fixture.disconnect("alice", 40000, Ipv4Addr::new(10, 8, 0, 99));
        assert!(matches!(
            outcome,
            HookOutcome::Disconnected {
                outcome: ReleaseOutcome::UnknownAddress,
                ..
            }
        ));
    }
}
