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
//! LDAP backed directory.

use ldap3::{LdapConn, Scope, SearchEntry, ldap_escape};

use crate::{Directory, DirectoryConfig, DirectoryError, dn_eq};

/// Requests no attributes in a search.
const NO_ATTRS: &str = "1.1";

/// Directory served by an LDAP server.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    config: DirectoryConfig,
}

/// A bound LDAP connection, unbound on drop.
pub struct LdapConnection {
    conn: LdapConn,
}

impl Drop for LdapConnection {
    fn drop(&mut self) {
        if let Err(e) = self.conn.unbind() {
            tracing::debug!(error = %e, "LDAP unbind failed");
        }
    }
}

impl LdapDirectory {
    /// Creates a new LDAP directory.
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }

    /// The directory configuration.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    fn search(
        &self,
        conn: &mut LdapConnection,
        base: &str,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let search_error = |source| {
            DirectoryError::Search {
                base: base.to_string(),
                filter: filter.to_string(),
                source,
            }
        };
        let (entries, _) = conn
            .conn
            .search(base, Scope::Subtree, filter, attrs)
            .and_then(|result| result.success())
            .map_err(search_error)?;

        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }
}

impl Directory for LdapDirectory {
    type Connection = LdapConnection;

    fn bind(&self, dn: &str, password: &str) -> Result<LdapConnection, DirectoryError> {
        // An empty password turns a simple bind into an anonymous one.
        if password.is_empty() {
            return Err(DirectoryError::AuthFailure {
                dn: dn.to_string(),
                reason: "empty password".to_string(),
            });
        }

        let url = self.config.url();
        let mut conn = LdapConn::new(&url).map_err(|source| DirectoryError::Connect {
            url: url.clone(),
            source,
        })?;
        conn.simple_bind(dn, password)
            .and_then(|result| result.success())
            .map_err(|e| {
                DirectoryError::AuthFailure {
                    dn: dn.to_string(),
                    reason: e.to_string(),
                }
            })?;

        tracing::debug!(%url, dn, "LDAP bind succeeded");
        Ok(LdapConnection { conn })
    }

    fn search_user(
        &self,
        conn: &mut LdapConnection,
        uid: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let filter = user_filter(&self.config.user_search_filter, uid);
        let entries = self.search(conn, &self.config.user_base_dn, &filter, vec![NO_ATTRS])?;
        if entries.len() > 1 {
            tracing::warn!(
                uid,
                matches = entries.len(),
                "Ambiguous user search, using first match"
            );
        }
        Ok(entries.into_iter().next().map(|entry| entry.dn))
    }

    fn is_member(
        &self,
        conn: &mut LdapConnection,
        group_dn: &str,
        user_dn: &str,
    ) -> Result<bool, DirectoryError> {
        let Some(filter) = group_filter(group_dn) else {
            tracing::warn!(group_dn, "Malformed group DN");
            return Ok(false);
        };
        let member_attr = self.config.group_member_attr.as_str();
        let entries = self.search(conn, &self.config.group_base_dn, &filter, vec![member_attr])?;

        Ok(entries
            .iter()
            .filter(|entry| dn_eq(&entry.dn, group_dn))
            .flat_map(|entry| {
                entry
                    .attrs
                    .iter()
                    .filter(|(name, _)| name.eq_ignore_ascii_case(member_attr))
                    .flat_map(|(_, values)| values)
            })
            .any(|member| dn_eq(member, user_dn)))
    }
}

/// Builds the user search filter from its template.
fn user_filter(template: &str, uid: &str) -> String {
    let filter = template.replace("%u", &ldap_escape(uid));
    if filter.starts_with('(') {
        filter
    } else {
        format!("({filter})")
    }
}

/// Builds a filter matching the first RDN of a group DN.
fn group_filter(group_dn: &str) -> Option<String> {
    let rdn = first_rdn(group_dn);
    let (attr, value) = rdn.split_once('=')?;
    let (attr, value) = (attr.trim(), value.trim());
    if attr.is_empty() || value.is_empty() {
        return None;
    }
    Some(format!("({attr}={})", ldap_escape(&unescape_dn_value(value))))
}

/// Resolves DN escapes (`\,` and `\2c` style) in an attribute value.
fn unescape_dn_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = bytes
            .get(i + 1..i + 3)
            .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match hex {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i + 1]);
                i += 2;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Returns the first RDN of a DN, honoring backslash escaped separators.
fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => return &dn[..i],
            _ => {}
        }
    }
    dn
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn user_filter_substitutes_and_wraps() {
        assert_eq!(user_filter("uid=%u", "alice"), "(uid=alice)");
        assert_eq!(
            user_filter("(&(objectClass=person)(uid=%u))", "alice"),
            "(&(objectClass=person)(uid=alice))"
        );
    }

    #[test]
    fn user_filter_escapes_login_name() {
        assert_eq!(user_filter("uid=%u", "a*)(x"), "(uid=a\\2a\\29\\28x)");
    }

    #[test]
    fn group_filter_uses_first_rdn() {
        assert_eq!(
            group_filter("cn=devs,ou=groups,dc=example,dc=com").as_deref(),
            Some("(cn=devs)")
        );
        assert_eq!(
            group_filter("cn=R\\, D,ou=groups").as_deref(),
            Some("(cn=R, D)")
        );
        assert_eq!(group_filter("ou=groups").as_deref(), Some("(ou=groups)"));
        assert_eq!(group_filter("garbage"), None);
    }

    #[test]
    fn group_filter_reescapes_dn_values_for_filters() {
        assert_eq!(
            group_filter("cn=a\\2a,ou=groups").as_deref(),
            Some("(cn=a\\2a)")
        );
        assert_eq!(
            group_filter("cn=back\\\\slash,ou=groups").as_deref(),
            Some("(cn=back\\5cslash)")
        );
        assert_eq!(unescape_dn_value("caf\\c3\\a9"), "caf\u{e9}");
    }

    #[test]
    fn empty_password_is_rejected_without_connecting() {
        let directory = LdapDirectory::new(DirectoryConfig {
            host: "ldap.invalid".to_string(),
            port: None,
            tls: false,
            bind_dn: "cn=openvpn".to_string(),
            bind_password: String::new(),
            user_base_dn: "ou=people".to_string(),
            user_search_filter: "uid=%u".to_string(),
            group_base_dn: "ou=groups".to_string(),
            group_member_attr: "member".to_string(),
        });
        let result = directory.bind("cn=openvpn", "");
        assert!(matches!(result, Err(DirectoryError::AuthFailure { .. })));
    }
}
