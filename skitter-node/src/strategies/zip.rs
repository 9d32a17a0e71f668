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

use skitter::{
    Context, Matcher, Placement, ProcessResult, Strategy, StrategyError, Token, Value,
};

use super::{
    config_of, initial_worker_state, port_message, require_callback, resolve_config,
    split_port_message, worker_of,
};

/// Multi-input strategy: buffers partial token sets per invocation and fires
/// `react` once every in port of an invocation has arrived.
///
/// The worker state wraps the matcher next to the operation state, so
/// buffered tokens survive between messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPorts;

impl ZipPorts {
    fn wrap_state(matcher: &Matcher, state: Value) -> Value {
        Value::record(vec![("tokens", matcher.to_value()), ("state", state)])
    }
}

impl Strategy for ZipPorts {
    fn name(&self) -> &str {
        "zip_ports"
    }

    fn deploy(&self, context: &Context<'_>, args: &Value) -> Result<Value, StrategyError> {
        let operation = context.operation;
        require_callback(operation, "react", operation.arity())?;

        let config = resolve_config(operation, args)?;
        let state = Self::wrap_state(
            &Matcher::new(),
            initial_worker_state(operation, &config)?,
        );
        let worker = context.create_remote(state, "matcher", Placement::Any)?;
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
        let (port, value) = split_port_message(&message)?;
        let mut matcher = state
            .field("tokens")
            .and_then(Matcher::from_value)
            .ok_or_else(|| {
                StrategyError::MalformedMessage("worker state carries no matcher".to_owned())
            })?;
        let operation_state = state.field("state").cloned().unwrap_or(Value::Nil);

        let token = Token {
            invocation: context.invocation,
            port,
            value,
        };
        match matcher.add(token, context.operation.arity()) {
            skitter::Match::Ready { args, .. } => {
                let config = config_of(context.deployment_data);
                let result = context
                    .operation
                    .call("react", operation_state, &config, &args)?;
                Ok(ProcessResult::unchanged()
                    .with_state(Self::wrap_state(&matcher, result.state))
                    .with_emit(result.emit))
            }
            skitter::Match::Pending => Ok(ProcessResult::unchanged()
                .with_state(Self::wrap_state(&matcher, operation_state))),
        }
    }
}
