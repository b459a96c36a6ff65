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
//! Directory connection parameters.

use serde::{Deserialize, Serialize};

const DEFAULT_LDAP_PORT: u16 = 389;
const DEFAULT_LDAPS_PORT: u16 = 636;
const DEFAULT_USER_SEARCH_FILTER: &str = "uid=%u";
const DEFAULT_GROUP_MEMBER_ATTR: &str = "member";

/// LDAP directory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Directory server host name.
    pub host: String,
    /// Directory server port. Defaults to 389, or 636 with TLS.
    #[serde(default)]
    pub port: Option<u16>,
    /// Connect with `ldaps://` instead of `ldap://`.
    #[serde(default)]
    pub tls: bool,
    /// DN of the service account used to search the directory.
    pub bind_dn: String,
    /// Password of the service account.
    pub bind_password: String,
    /// Base DN of user entries.
    pub user_base_dn: String,
    /// User search filter, `%u` is replaced by the escaped login name.
    #[serde(default = "default_user_search_filter")]
    pub user_search_filter: String,
    /// Base DN of group entries.
    pub group_base_dn: String,
    /// Group attribute listing member DNs.
    #[serde(default = "default_group_member_attr")]
    pub group_member_attr: String,
}

fn default_user_search_filter() -> String {
    DEFAULT_USER_SEARCH_FILTER.to_string()
}

fn default_group_member_attr() -> String {
    DEFAULT_GROUP_MEMBER_ATTR.to_string()
}

impl DirectoryConfig {
    /// URL of the directory server.
    pub fn url(&self) -> String {
        let (scheme, default_port) = if self.tls {
            ("ldaps", DEFAULT_LDAPS_PORT)
        } else {
            ("ldap", DEFAULT_LDAP_PORT)
        };
        format!(
            "{scheme}://{}:{}",
            self.host,
            self.port.unwrap_or(default_port)
        )
    }
}
