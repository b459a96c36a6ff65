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
//! Command line options.
//!
//! OpenVPN runs the hook as `ovpn-lease <instance>` and appends the script
//! arguments of the event, the client config file on `client-connect`.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser};

/// Assigns sticky client addresses from the pool of the client's directory
/// group.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// The OpenVPN instance the hook runs for.
    pub instance: String,

    /// Arguments OpenVPN passes to the script.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub script_args: Vec<String>,

    /// The event, set by OpenVPN.
    #[arg(long, env = "script_type", hide_env_values = true)]
    pub script_type: String,

    /// Configuration file. Defaults to the executable path with a `.yml`
    /// extension.
    #[arg(long, env = "OVPN_LEASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of this installation, used for log and database file names.
    /// Defaults to the executable name.
    #[arg(long)]
    pub name: Option<String>,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log to stderr, which OpenVPN forwards to its own log.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub stderr: bool,

    /// Directory for the hook log.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
