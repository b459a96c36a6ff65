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
//! Client configuration directives.

use std::{
    fmt::{self, Display},
    fs, io,
    net::Ipv4Addr,
    path::Path,
};

/// What OpenVPN is told to do with a connecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDirective {
    /// Refuse the client.
    Disable,
    /// Assign the client a fixed address.
    Push {
        /// Client address.
        address: Ipv4Addr,
        /// Subnet mask.
        mask: Ipv4Addr,
    },
}

impl ClientDirective {
    /// Replaces the contents of the client config file with this directive.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, format!("{self}\n"))
    }
}

impl Display for ClientDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientDirective::Disable => f.write_str("disable"),
            ClientDirective::Push { address, mask } => write!(f, "ifconfig-push {address} {mask}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_log::test;

    use super::*;

    #[test]
    fn directives_render_as_openvpn_options() {
        assert_eq!(ClientDirective::Disable.to_string(), "disable");
        let push = ClientDirective::Push {
            address: Ipv4Addr::new(10, 8, 0, 12),
            mask: Ipv4Addr::new(255, 255, 255, 0),
        };
        assert_eq!(push.to_string(), "ifconfig-push 10.8.0.12 255.255.255.0");
    }

    #[test]
    fn write_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cc.tmp");
        fs::write(&path, "ifconfig-push 10.8.0.1 255.255.255.0\npush \"route 10.0.0.0\"\n").unwrap();

        ClientDirective::Disable.write_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "disable\n");
    }
}
