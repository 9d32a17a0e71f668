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

use skitter::{Context, Placement, ProcessResult, Strategy, StrategyError, Value};

use super::{
    config_of, initial_worker_state, port_message, require_callback, resolve_config,
    split_port_message, workers_of,
};

/// Partitions state over one aggregator worker per worker core.
///
/// The operation's `key` callback maps each record to a key; records with
/// equal keys always land on the same aggregator, which holds the state for
/// its partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedHash;

impl Strategy for KeyedHash {
    fn name(&self) -> &str {
        "keyed_hash"
    }

    fn deploy(&self, context: &Context<'_>, args: &Value) -> Result<Value, StrategyError> {
        let operation = context.operation;
        require_callback(operation, "react", 1)?;
        require_callback(operation, "key", 1)?;

        let config = resolve_config(operation, args)?;
        let mut workers = Vec::new();
        for node in context.worker_cores() {
            let state = initial_worker_state(operation, &config)?;
            let worker = context.create_remote(state, "aggregator", Placement::On(node))?;
            workers.push(worker.to_value());
        }
        Ok(Value::record(vec![
            ("config", config),
            ("workers", Value::List(workers)),
        ]))
    }

    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        port: usize,
    ) -> Result<(), StrategyError> {
        let workers = workers_of(context.deployment_data)?;
        let config = config_of(context.deployment_data);
        let key = context
            .operation
            .call("key", Value::Nil, &config, &[record.clone()])?
            .value;
        let index = (hash_value(&key) % workers.len() as u64) as usize;
        context.send(&workers[index], port_message(port, record))?;
        Ok(())
    }

    fn process(
        &self,
        context: &Context<'_>,
        message: Value,
        state: &Value,
        _tag: &str,
    ) -> Result<ProcessResult, StrategyError> {
        let (_port, value) = split_port_message(&message)?;
        let config = config_of(context.deployment_data);
        let result = context
            .operation
            .call("react", state.clone(), &config, &[value])?;
        Ok(ProcessResult::unchanged()
            .with_state(result.state)
            .with_emit(result.emit))
    }
}

/// Deterministic value hash, identical on every node. Integer keys map to
/// themselves so modular key schemes partition stably.
fn hash_value(value: &Value) -> u64 {
    if let Value::Int(key) = value {
        return *key as u64;
    }
    let bytes = bincode::serialize(value).unwrap_or_default();
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
