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

//! Integration tests for the OpenVPN address hook
//!
//! The tests drive the hook through its event handling with a lease database
//! on disk and an in-memory directory in place of LDAP.

use std::{fs, path::PathBuf};

use address_manager::store::FileLeaseStore;
use directory::memory::StaticDirectory;
use ovpn_lease::{
    HookError,
    config::HookConfig,
    event::{ClientContext, ConnectEvent, DisconnectEvent, HookEvent},
    orchestrator::{ConnectionOrchestrator, HookOutcome},
};
use tempfile::TempDir;

/// Installation name used for the lease databases.
pub const HOOK_NAME: &str = "ovpn-lease";
/// The OpenVPN instance all tests run against.
pub const INSTANCE: &str = "server";
/// DN of the developers group.
pub const DEVS_DN: &str = "cn=devs,ou=groups,dc=example,dc=com";
/// DN of the operators group.
pub const OPS_DN: &str = "cn=ops,ou=groups,dc=example,dc=com";

/// A hook installation in a temporary directory.
pub struct HookTestEnv {
    /// Holds the configuration, the lease database and client config files.
    pub dir: TempDir,
    /// Path of the written configuration file.
    pub config_path: PathBuf,
    /// The loaded configuration.
    pub config: HookConfig,
    /// The directory the hook authorizes against.
    pub directory: StaticDirectory,
}

impl HookTestEnv {
    /// Sets up an installation where `devs` and `ops` own `devs_count` and
    /// `ops_count` addresses.
    pub fn new(devs_count: u32, ops_count: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let yaml = format!(
            r#"
libdir: {libdir}
ldap:
  host: ldap.example.com
  bind_dn: cn=openvpn,dc=example,dc=com
  bind_password: secret
  user_base_dn: ou=people,dc=example,dc=com
  group_base_dn: ou=groups,dc=example,dc=com
groups:
  devs: {DEVS_DN}
  ops: {OPS_DN}
profiles:
  {INSTANCE}:
    devs: {{ base: 10.8.0.10, count: {devs_count}, mask: 255.255.255.0 }}
    ops: {{ base: 10.8.1.10, count: {ops_count}, mask: 255.255.255.0 }}
"#,
            libdir = dir.path().join("lib").display(),
        );
        let config_path = dir.path().join("ovpn-lease.yml");
        fs::write(&config_path, yaml).unwrap();
        let config = HookConfig::load(&config_path).unwrap();

        Self {
            dir,
            config_path,
            config,
            directory: StaticDirectory::new().with_credentials("cn=openvpn,dc=example,dc=com", "secret"),
        }
    }

    /// Adds a directory user belonging to `group_dn`.
    pub fn with_member(mut self, uid: &str, group_dn: &str) -> Self {
        let dn = format!("uid={uid},ou=people,dc=example,dc=com");
        self.directory = self
            .directory
            .with_user(uid, dn.clone())
            .with_member(group_dn, dn);
        self
    }

    /// A fresh handle on the instance's lease database.
    pub fn store(&self) -> FileLeaseStore {
        FileLeaseStore::for_instance(self.config.libdir(), HOOK_NAME, INSTANCE)
    }

    /// An orchestrator as one hook process would build it.
    pub fn orchestrator(&self) -> ConnectionOrchestrator<'_, StaticDirectory, FileLeaseStore> {
        ConnectionOrchestrator::new(
            &self.config,
            self.config.instance(INSTANCE).unwrap(),
            &self.directory,
            self.store(),
        )
    }

    /// Client config file of a client.
    pub fn client_config_file(&self, common_name: &str) -> PathBuf {
        self.dir.path().join(format!("{common_name}.cc"))
    }

    /// Runs `client-connect` and returns the result and the written client
    /// config.
    pub fn connect(
        &self,
        client: &ClientContext,
    ) -> (Result<HookOutcome, HookError>, Option<String>) {
        let config_file = self.client_config_file(&client.common_name);
        let _ = fs::remove_file(&config_file);
        let result = self.orchestrator().handle(&HookEvent::Connect(ConnectEvent {
            client: client.clone(),
            config_file: config_file.clone(),
        }));
        (result, fs::read_to_string(config_file).ok())
    }

    /// Runs `client-disconnect`.
    pub fn disconnect(
        &self,
        client: &ClientContext,
        address: std::net::Ipv4Addr,
    ) -> Result<HookOutcome, HookError> {
        self.orchestrator()
            .handle(&HookEvent::Disconnect(DisconnectEvent {
                client: client.clone(),
                address,
                mask: None,
            }))
    }
}

/// A client connecting with its common name as username.
pub fn client(common_name: &str, port: u16) -> ClientContext {
    ClientContext {
        common_name: common_name.to_string(),
        username: common_name.to_string(),
        client_ip: "203.0.113.5".to_string(),
        client_port: port,
    }
}
