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
//! OpenVPN hook assigning client addresses by directory group.
//!
//! On `client-connect` the client's common name is looked up in the
//! directory, the first group it belongs to selects an address profile, and a
//! sticky address of that profile's pool is pushed to the client. On
//! `client-disconnect` the address is released but stays reserved for its
//! last owner as long as other addresses are available.

use std::{env, path::PathBuf};

use address_manager::{
    allocator::AllocationError,
    store::{FileLeaseStore, LeaseStoreError},
};
use directory::ldap::LdapDirectory;
use thiserror::Error;

use crate::{
    authorization::AuthorizationError,
    cli::Opts,
    config::{ConfigError, HookConfig},
    event::{EventError, HookEvent, ScriptType},
    orchestrator::{ConnectionOrchestrator, HookOutcome},
};

pub mod authorization;
pub mod cli;
pub mod config;
pub mod directive;
pub mod event;
pub mod orchestrator;

/// Errors that make the hook fail.
#[derive(Debug, Error)]
pub enum HookError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Invocation environment was incomplete.
    #[error(transparent)]
    Event(#[from] EventError),
    /// Client is not authorized.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    /// No address could be assigned.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Lease database failed.
    #[error(transparent)]
    Store(#[from] LeaseStoreError),
    /// The client's group has no address pool in this instance.
    #[error("profile {profile} is not configured for instance {instance}")]
    ProfileNotConfigured {
        /// Resolved profile.
        profile: String,
        /// OpenVPN instance.
        instance: String,
    },
    /// Client config file could not be written.
    #[error("failed to write client configuration {path}: {source}")]
    Directive {
        /// Client config file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Runs the hook for the invocation described by `opts` and the process
/// environment.
///
/// `name` identifies this hook installation. It names the lease databases.
pub fn run(opts: &Opts, name: &str) -> Result<HookOutcome, HookError> {
    let script_type: ScriptType = opts.script_type.parse()?;

    let config_path = match &opts.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    tracing::debug!(path = %config_path.display(), "Loading configuration");
    let config = HookConfig::load(&config_path)?;
    let instance = config.instance(&opts.instance)?;

    let event = HookEvent::from_env(script_type, &opts.script_args, |var| env::var(var).ok())?;

    let store = FileLeaseStore::for_instance(config.libdir(), name, instance.name());
    let directory = LdapDirectory::new(config.ldap().clone());
    let orchestrator = ConnectionOrchestrator::new(&config, instance, &directory, store);
    orchestrator.handle(&event)
}

/// The configuration next to the executable, with a `.yml` extension.
fn default_config_path() -> Result<PathBuf, ConfigError> {
    env::current_exe()
        .map(|exe| exe.with_extension("yml"))
        .map_err(|e| ConfigError::NoPath(e.to_string()))
}
