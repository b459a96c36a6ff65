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
//! OpenVPN hook events.
//!
//! OpenVPN passes the event context in environment variables. This module
//! turns them into a typed [HookEvent].

use std::{
    fmt::{self, Display},
    net::Ipv4Addr,
    path::PathBuf,
    str::FromStr,
};

use address_manager::session::SessionToken;
use thiserror::Error;

/// Event parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// The script type is not one OpenVPN defines.
    #[error("script type {0} unknown")]
    UnknownScriptType(String),
    /// The script type exists but is not handled by this hook.
    #[error("script type {0} is not supported")]
    UnsupportedScriptType(ScriptType),
    /// A required environment variable is not set.
    #[error("environment variable {0} not set")]
    MissingVariable(&'static str),
    /// An environment variable has an unusable value.
    #[error("environment variable {name}={value:?} is invalid: {reason}")]
    InvalidVariable {
        /// Variable name.
        name: &'static str,
        /// Its value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
    /// client-connect was invoked without the client config file argument.
    #[error("no client config file argument given")]
    MissingConfigFile,
}

/// OpenVPN script hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// `up`
    Up,
    /// `down`
    Down,
    /// `ipchange`
    Ipchange,
    /// `route-up`
    RouteUp,
    /// `tls-verify`
    TlsVerify,
    /// `auth-user-pass-verify`
    AuthUserPassVerify,
    /// `client-connect`
    ClientConnect,
    /// `client-disconnect`
    ClientDisconnect,
    /// `learn-address`
    LearnAddress,
}

const SCRIPT_TYPES: [(&str, ScriptType); 9] = [
    ("up", ScriptType::Up),
    ("down", ScriptType::Down),
    ("ipchange", ScriptType::Ipchange),
    ("route-up", ScriptType::RouteUp),
    ("tls-verify", ScriptType::TlsVerify),
    ("auth-user-pass-verify", ScriptType::AuthUserPassVerify),
    ("client-connect", ScriptType::ClientConnect),
    ("client-disconnect", ScriptType::ClientDisconnect),
    ("learn-address", ScriptType::LearnAddress),
];

impl FromStr for ScriptType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SCRIPT_TYPES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, script_type)| *script_type)
            .ok_or_else(|| EventError::UnknownScriptType(s.to_string()))
    }
}

impl Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = SCRIPT_TYPES
            .iter()
            .find(|(_, script_type)| script_type == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        f.write_str(name)
    }
}

/// Identity of a connecting or disconnecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// Certificate common name.
    pub common_name: String,
    /// Username sent by the client, the common name if none was sent.
    pub username: String,
    /// Client's public IP.
    pub client_ip: String,
    /// Client's public port.
    pub client_port: u16,
}

impl ClientContext {
    /// The session token of this connection.
    pub fn session(&self) -> SessionToken {
        SessionToken::compute(
            &self.common_name,
            &self.username,
            &self.client_ip,
            self.client_port,
        )
    }
}

/// A client connects and needs an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEvent {
    /// The connecting client.
    pub client: ClientContext,
    /// File OpenVPN reads the generated client configuration from.
    pub config_file: PathBuf,
}

/// A client disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    /// The disconnected client.
    pub client: ClientContext,
    /// The address the client held.
    pub address: Ipv4Addr,
    /// The mask pushed together with the address, if OpenVPN reports it.
    pub mask: Option<Ipv4Addr>,
}

/// An event this hook acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// `client-connect`
    Connect(ConnectEvent),
    /// `client-disconnect`
    Disconnect(DisconnectEvent),
}

impl HookEvent {
    /// Builds the event of a script invocation.
    ///
    /// `lookup` returns the value of an environment variable, `script_args`
    /// are the arguments OpenVPN appended to the command line.
    pub fn from_env<F>(
        script_type: ScriptType,
        script_args: &[String],
        lookup: F,
    ) -> Result<Self, EventError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        match script_type {
            ScriptType::ClientConnect => {
                let config_file = script_args
                    .first()
                    .filter(|arg| !arg.is_empty())
                    .ok_or(EventError::MissingConfigFile)?;
                Ok(HookEvent::Connect(ConnectEvent {
                    client: env.client()?,
                    config_file: PathBuf::from(config_file),
                }))
            }
            ScriptType::ClientDisconnect => {
                Ok(HookEvent::Disconnect(DisconnectEvent {
                    client: env.client()?,
                    address: env.parse("ifconfig_pool_remote_ip")?,
                    mask: env
                        .optional("ifconfig_pool_netmask")
                        .map(|value| parse_var("ifconfig_pool_netmask", value))
                        .transpose()?,
                }))
            }
            other => Err(EventError::UnsupportedScriptType(other)),
        }
    }

    /// The client the event is about.
    pub fn client(&self) -> &ClientContext {
        match self {
            HookEvent::Connect(event) => &event.client,
            HookEvent::Disconnect(event) => &event.client,
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty value of a variable.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, EventError> {
        self.optional(name).ok_or(EventError::MissingVariable(name))
    }

    fn parse<T>(&self, name: &'static str) -> Result<T, EventError>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_var(name, self.required(name)?)
    }

    fn client(&self) -> Result<ClientContext, EventError> {
        let common_name = self.required("common_name")?;
        let username = self
            .optional("username")
            .unwrap_or_else(|| common_name.clone());

        // untrusted_* is what OpenVPN sets before the client is authenticated
        let (client_ip, client_port): (String, u16) = match self.optional("trusted_ip") {
            Some(ip) => (ip, self.parse("trusted_port")?),
            None => (self.required("untrusted_ip")?, self.parse("untrusted_port")?),
        };

        Ok(ClientContext {
            common_name,
            username,
            client_ip,
            client_port,
        })
    }
}

fn parse_var<T>(name: &'static str, value: String) -> Result<T, EventError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| {
        EventError::InvalidVariable {
            name,
            reason: e.to_string(),
            value,
        }
    })
}
