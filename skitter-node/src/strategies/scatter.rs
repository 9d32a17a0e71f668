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

use std::{
    collections::HashMap,
    sync::Mutex,
};

use skitter::{
    Context, InstanceRef, Placement, ProcessResult, Strategy, StrategyError, Value,
};

use super::{
    config_of, port_message, require_callback, resolve_config, split_port_message, workers_of,
};

/// Fans records out round-robin over one stateless worker per worker core.
///
/// The operation must not keep state: `react` is called with `Nil` state and
/// state changes are discarded.
#[derive(Debug, Default)]
pub struct Scatter {
    cursors: Mutex<HashMap<InstanceRef, usize>>,
}

impl Strategy for Scatter {
    fn name(&self) -> &str {
        "scatter"
    }

    fn deploy(&self, context: &Context<'_>, args: &Value) -> Result<Value, StrategyError> {
        let operation = context.operation;
        require_callback(operation, "react", 1)?;

        let config = resolve_config(operation, args)?;
        let mut workers = Vec::new();
        for node in context.worker_cores() {
            let worker = context.create_remote(Value::Nil, "worker", Placement::On(node))?;
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
        let index = {
            let mut cursors = self.cursors.lock().unwrap();
            let cursor = cursors.entry(context.instance).or_insert(0);
            let index = *cursor % workers.len();
            *cursor += 1;
            index
        };
        context.send(&workers[index], port_message(port, record))?;
        Ok(())
    }

    fn process(
        &self,
        context: &Context<'_>,
        message: Value,
        _state: &Value,
        _tag: &str,
    ) -> Result<ProcessResult, StrategyError> {
        let (_port, value) = split_port_message(&message)?;
        let config = config_of(context.deployment_data);
        let result = context
            .operation
            .call("react", Value::Nil, &config, &[value])?;
        Ok(ProcessResult::unchanged().with_emit(result.emit))
    }
}
