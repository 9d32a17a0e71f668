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
    split_port_message, worker_of,
};

/// Runs the operation on a single worker holding its state; every record is
/// forwarded there, so `react` sees arrivals in delivery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl Strategy for Serial {
    fn name(&self) -> &str {
        "serial"
    }

    fn deploy(&self, context: &Context<'_>, args: &Value) -> Result<Value, StrategyError> {
        let operation = context.operation;
        require_callback(operation, "react", 1)?;

        let config = resolve_config(operation, args)?;
        let state = initial_worker_state(operation, &config)?;
        let worker = context.create_remote(state, "worker", Placement::Any)?;
        Ok(Value::record(vec![
            ("config", config),
            ("worker", worker.to_value()),
        ]))
    }

    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        port: usize,
    ) -> Result<(), StrategyError> {
        let worker = worker_of(context.deployment_data)?;
        context.send(&worker, port_message(port, record))?;
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
