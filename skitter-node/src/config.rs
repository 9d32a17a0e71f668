// Copyright 2026 The Skitter Team
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

//! Node configuration, populated from the `SKITTER_*` environment.

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    net::SocketAddr,
    str::FromStr,
};

use skitter::NodeName;

/// Exit codes of the node binaries.
pub mod exit_code {
    /// Normal termination.
    pub const OK: i32 = 0;
    /// The configuration was invalid.
    pub const INVALID_CONFIG: i32 = 64;
    /// The node failed to join the cluster.
    pub const JOIN_FAILURE: i32 = 65;
    /// An internal invariant was violated.
    pub const INTERNAL: i32 = 70;
}

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Owns deployment decisions; exactly one per cluster.
    Master,
    /// Hosts workers and advertises its capabilities.
    Worker,
    /// A single in-process node without networking.
    Local,
}

impl fmt::Display for Mode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            Mode::Master => "master",
            Mode::Worker => "worker",
            Mode::Local => "local",
        };
        formatter.write_str(mode)
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "master" => Ok(Mode::Master),
            "worker" => Ok(Mode::Worker),
            "local" => Ok(Mode::Local),
            _ => Err(ConfigError::InvalidValue {
                var: "SKITTER_MODE".to_owned(),
                value: value.to_owned(),
            }),
        }
    }
}

/// An invalid or incomplete node configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("environment variable `{var}` is not set")]
    MissingVar { var: String },

    /// An environment variable holds an unusable value.
    #[error("invalid value `{value}` for `{var}`")]
    InvalidValue { var: String, value: String },
}

/// Tunables of the peer-to-peer transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    /// Maximum frame payload length in bytes.
    pub max_frame_len: u32,
    /// Whether to enable `TCP_NODELAY` on peer sockets.
    pub tcp_nodelay: bool,
    /// Delay between outgoing connection attempts, in milliseconds.
    pub connect_retry_timeout: u64,
    /// Number of outgoing connection attempts before giving up.
    pub connect_max_retries: usize,
    /// How long a master waits for its first worker, in milliseconds.
    pub join_timeout: u64,
    /// Delay between keepalive pings from the master, in milliseconds.
    pub ping_interval: u64,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        NetworkConfiguration {
            max_frame_len: 8 * 1024 * 1024,
            tcp_nodelay: true,
            connect_retry_timeout: 500,
            connect_max_retries: 10,
            join_timeout: 10_000,
            ping_interval: 5_000,
        }
    }
}

/// Complete configuration of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Role of the node.
    pub mode: Mode,
    /// Network-visible name, used by peers to connect (`host:port` for
    /// networked modes).
    pub name: NodeName,
    /// Shared secret for peer authentication.
    pub cookie: String,
    /// Worker addresses a master connects to at startup.
    pub workers: Vec<String>,
    /// Capability tags this node advertises.
    pub tags: BTreeSet<String>,
    /// Worker cores this node advertises.
    pub cores: usize,
    /// Transport tunables.
    pub network: NetworkConfiguration,
    /// Callback failures tolerated per deployment before teardown.
    pub failure_threshold: u32,
}

impl NodeConfig {
    /// A single-node configuration without networking.
    pub fn local() -> Self {
        NodeConfig {
            mode: Mode::Local,
            name: NodeName::new("local"),
            cookie: String::new(),
            workers: Vec::new(),
            tags: BTreeSet::new(),
            cores: num_cpus::get(),
            network: NetworkConfiguration::default(),
            failure_threshold: 5,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Reads the configuration from explicit `(name, value)` pairs; the
    /// testable back end of [`NodeConfig::from_env`].
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let mode = match vars.get("SKITTER_MODE") {
            Some(value) => value.parse()?,
            None => Mode::Local,
        };

        let mut config = Self::local();
        config.mode = mode;
        if let Some(name) = vars.get("SKITTER_NODENAME") {
            config.name = NodeName::new(name.as_str());
        } else if mode != Mode::Local {
            return Err(ConfigError::MissingVar {
                var: "SKITTER_NODENAME".to_owned(),
            });
        }
        if let Some(cookie) = vars.get("SKITTER_COOKIE") {
            config.cookie = cookie.clone();
        } else if mode != Mode::Local {
            return Err(ConfigError::MissingVar {
                var: "SKITTER_COOKIE".to_owned(),
            });
        }
        if let Some(workers) = vars.get("SKITTER_WORKERS") {
            config.workers = split_list(workers);
        }
        if let Some(tags) = vars.get("SKITTER_TAGS") {
            config.tags = split_list(tags).into_iter().collect();
        }
        if let Some(cores) = vars.get("SKITTER_CORES") {
            config.cores = cores.parse().map_err(|_| ConfigError::InvalidValue {
                var: "SKITTER_CORES".to_owned(),
                value: cores.clone(),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != Mode::Local {
            self.listen_address()?;
            if self.cookie.is_empty() {
                return Err(ConfigError::MissingVar {
                    var: "SKITTER_COOKIE".to_owned(),
                });
            }
        }
        if self.cores == 0 {
            return Err(ConfigError::InvalidValue {
                var: "SKITTER_CORES".to_owned(),
                value: "0".to_owned(),
            });
        }
        Ok(())
    }

    /// Socket address this node listens on, derived from its name.
    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        self.name
            .as_str()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var: "SKITTER_NODENAME".to_owned(),
                value: self.name.as_str().to_owned(),
            })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_local_mode() {
        let config = NodeConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.mode, Mode::Local);
        assert_eq!(config.name, NodeName::new("local"));
    }

    #[test]
    fn master_configuration() {
        let config = NodeConfig::from_vars(vars(&[
            ("SKITTER_MODE", "master"),
            ("SKITTER_NODENAME", "127.0.0.1:4000"),
            ("SKITTER_COOKIE", "secret"),
            ("SKITTER_WORKERS", "127.0.0.1:4001, 127.0.0.1:4002"),
        ]))
        .unwrap();
        assert_eq!(config.mode, Mode::Master);
        assert_eq!(
            config.workers,
            vec!["127.0.0.1:4001".to_owned(), "127.0.0.1:4002".to_owned()]
        );
        assert_eq!(
            config.listen_address().unwrap(),
            "127.0.0.1:4000".parse().unwrap()
        );
    }

    #[test]
    fn worker_tags() {
        let config = NodeConfig::from_vars(vars(&[
            ("SKITTER_MODE", "worker"),
            ("SKITTER_NODENAME", "127.0.0.1:4001"),
            ("SKITTER_COOKIE", "secret"),
            ("SKITTER_TAGS", "gpu,ssd"),
        ]))
        .unwrap();
        assert!(config.tags.contains("gpu"));
        assert!(config.tags.contains("ssd"));
    }

    #[test]
    fn missing_cookie_is_rejected() {
        let err = NodeConfig::from_vars(vars(&[
            ("SKITTER_MODE", "worker"),
            ("SKITTER_NODENAME", "127.0.0.1:4001"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingVar {
                var: "SKITTER_COOKIE".to_owned()
            }
        );
    }

    #[test]
    fn unparsable_nodename_is_rejected() {
        let err = NodeConfig::from_vars(vars(&[
            ("SKITTER_MODE", "master"),
            ("SKITTER_NODENAME", "not-an-address"),
            ("SKITTER_COOKIE", "secret"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "SKITTER_NODENAME".to_owned(),
                value: "not-an-address".to_owned()
            }
        );
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let err = NodeConfig::from_vars(vars(&[("SKITTER_MODE", "supervisor")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "SKITTER_MODE".to_owned(),
                value: "supervisor".to_owned()
            }
        );
    }
}
