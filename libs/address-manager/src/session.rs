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
//! Session correlation tokens.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A deterministic fingerprint of a client connection.
///
/// Two events carrying the same common name, username, client IP and client
/// port produce the same token. This is what lets a reconnecting client
/// reclaim its address before its previous disconnect was processed.
///
/// The token is a SHA-256 digest. It only needs to be unique and
/// deterministic; it is not a secret and not an authenticator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Computes the token for a connection.
    pub fn compute(common_name: &str, username: &str, client_ip: &str, client_port: u16) -> Self {
        let mut hasher = Sha256::new();
        let port = client_port.to_string();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for field in [common_name, username, client_ip, port.as_str()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
