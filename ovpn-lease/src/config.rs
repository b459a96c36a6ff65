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
//! Hook configuration.
//!
//! One YAML file holds the directory settings, the authorization groups and,
//! per OpenVPN instance, the address pool of every profile.

use std::{
    collections::BTreeMap,
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use address_manager::pool::Profile;
use anyhow::{Context, bail};
use directory::DirectoryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default directory of the lease databases.
pub const DEFAULT_LIBDIR: &str = "/var/lib/openvpn";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// Configuration file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid YAML or does not match the schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    /// The configuration is well formed but inconsistent.
    #[error("invalid configuration: {0:#}")]
    Invalid(anyhow::Error),
    /// The requested OpenVPN instance has no profiles.
    #[error("instance {0} not found in configuration")]
    UnknownInstance(String),
    /// The path of the configuration file could not be determined.
    #[error("cannot determine configuration path: {0}")]
    NoPath(String),
}

/// Validated hook configuration.
#[derive(Debug, Clone)]
pub struct HookConfig {
    libdir: PathBuf,
    ldap: DirectoryConfig,
    groups: BTreeMap<String, String>,
    instances: BTreeMap<String, InstanceConfig>,
}

/// Profiles of one OpenVPN instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    name: String,
    profiles: BTreeMap<String, Profile>,
}

impl InstanceConfig {
    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the profile with the given name.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// All profiles, ordered by name.
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }
}

impl HookConfig {
    /// Loads and validates the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let config = Self::from_yaml(&contents)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates a YAML configuration.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let dto: HookConfigDto = serde_yaml_ng::from_str(contents)?;
        let config = HookConfig::try_from(dto).map_err(ConfigError::Invalid)?;
        config.warn_suspicious_profiles();
        Ok(config)
    }

    /// Directory holding the lease databases.
    pub fn libdir(&self) -> &Path {
        &self.libdir
    }

    /// Directory connection settings.
    pub fn ldap(&self) -> &DirectoryConfig {
        &self.ldap
    }

    /// Authorization groups, group name to group DN, in lexicographic order.
    pub fn groups(&self) -> &BTreeMap<String, String> {
        &self.groups
    }

    /// Authorization groups that have a profile in `instance`, in
    /// lexicographic order.
    pub fn served_groups(&self, instance: &InstanceConfig) -> BTreeMap<String, String> {
        self.groups
            .iter()
            .filter(|(name, _)| instance.profile(name).is_some())
            .map(|(name, dn)| (name.clone(), dn.clone()))
            .collect()
    }

    /// Returns the configuration of an OpenVPN instance.
    pub fn instance(&self, name: &str) -> Result<&InstanceConfig, ConfigError> {
        self.instances
            .get(name)
            .ok_or_else(|| ConfigError::UnknownInstance(name.to_string()))
    }

    // Problems that only show up on allocation are logged once at load.
    fn warn_suspicious_profiles(&self) {
        for instance in self.instances.values() {
            let profiles: Vec<_> = instance.profiles().collect();
            for (i, profile) in profiles.iter().enumerate() {
                if !profile.fits_subnet() {
                    tracing::warn!(
                        instance = instance.name(),
                        %profile,
                        "Profile crosses a /24 boundary, allocations will fail"
                    );
                }
                if !self.groups.contains_key(profile.name()) {
                    tracing::warn!(
                        instance = instance.name(),
                        %profile,
                        "Profile has no authorization group and is never used"
                    );
                }
                for other in &profiles[i + 1..] {
                    if overlaps(profile, other) {
                        tracing::warn!(
                            instance = instance.name(),
                            %profile,
                            %other,
                            "Profiles share addresses"
                        );
                    }
                }
            }
        }
    }
}

fn overlaps(a: &Profile, b: &Profile) -> bool {
    a.count() > 0 && b.count() > 0 && (a.contains(b.base()) || b.contains(a.base()))
}

/// Configuration file layout.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HookConfigDto {
    /// Directory of the lease databases.
    #[serde(default)]
    pub libdir: Option<PathBuf>,
    /// Directory connection settings.
    pub ldap: DirectoryConfig,
    /// Group name to group DN.
    pub groups: BTreeMap<String, String>,
    /// Instance name to profile name to pool.
    pub profiles: BTreeMap<String, BTreeMap<String, ProfileDto>>,
}

/// Address pool of a profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProfileDto {
    /// First address of the pool.
    pub base: String,
    /// Number of addresses.
    pub count: u32,
    /// Subnet mask pushed to clients.
    pub mask: String,
}

impl TryFrom<HookConfigDto> for HookConfig {
    type Error = anyhow::Error;

    fn try_from(value: HookConfigDto) -> Result<Self, Self::Error> {
        if value.groups.is_empty() {
            bail!("no groups configured");
        }
        if value.profiles.is_empty() {
            bail!("no profiles configured");
        }

        let instances = value
            .profiles
            .into_iter()
            .map(|(instance, profiles)| {
                let profiles = profiles
                    .into_iter()
                    .map(|(name, profile)| {
                        let parsed = parse_profile(&name, profile)
                            .with_context(|| format!("invalid profile {instance}/{name}"))?;
                        Ok((name, parsed))
                    })
                    .collect::<Result<_, Self::Error>>()?;
                Ok((
                    instance.clone(),
                    InstanceConfig {
                        name: instance,
                        profiles,
                    },
                ))
            })
            .collect::<Result<_, Self::Error>>()?;

        Ok(Self {
            libdir: value
                .libdir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBDIR)),
            ldap: value.ldap,
            groups: value.groups,
            instances,
        })
    }
}

fn parse_profile(name: &str, dto: ProfileDto) -> anyhow::Result<Profile> {
    let base: Ipv4Addr = dto
        .base
        .parse()
        .with_context(|| format!("invalid base address {:?}", dto.base))?;
    let mask: Ipv4Addr = dto
        .mask
        .parse()
        .with_context(|| format!("invalid mask {:?}", dto.mask))?;
    Ok(Profile::new(name, base, dto.count, mask)?)
}
