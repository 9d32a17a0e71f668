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

//! `skitter master` / `skitter worker` entry points.
//!
//! Both commands read the shared `SKITTER_*` environment (see
//! `skitter-node`); the subcommand fixes the node mode. The binary hosts the
//! built-in strategies; applications embedding their own operations build on
//! `skitter-node` directly.

use structopt::StructOpt;

use std::process;

use skitter::operation::OperationRegistry;
use skitter_node::{config::exit_code, strategies, Mode, Node, NodeConfig, NodeError};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "skitter",
    about = "Distributed stream-processing runtime node."
)]
enum Command {
    /// Start a master node. Workers are taken from `SKITTER_WORKERS`.
    Master,
    /// Start a worker node advertising the tags in `SKITTER_TAGS`.
    Worker,
}

fn main() {
    env_logger::init();
    let command = Command::from_args();
    process::exit(match run(command) {
        Ok(()) => exit_code::OK,
        Err(err) => {
            log::error!("{}", err);
            err.exit_code()
        }
    });
}

fn run(command: Command) -> Result<(), NodeError> {
    let mut config = NodeConfig::from_env()?;
    let mode = match command {
        Command::Master => Mode::Master,
        Command::Worker => Mode::Worker,
    };
    if config.mode == Mode::Local {
        // SKITTER_MODE left unset; the subcommand decides.
        config.mode = mode;
        config.validate()?;
    } else if config.mode != mode {
        return Err(NodeError::Config(
            skitter_node::ConfigError::InvalidValue {
                var: "SKITTER_MODE".to_owned(),
                value: config.mode.to_string(),
            },
        ));
    }

    let node = Node::new(config, OperationRegistry::new(), strategies::builtin())?;
    let shutdown = node.shutdown_handle();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| NodeError::Internal(err.into()))?;
    runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.shutdown();
            }
        });
        node.run().await
    })
}
