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

//! Built-in distribution policies.
//!
//! - [`Serial`] runs one worker holding the operation state; records arrive
//!   in delivery order.
//! - [`Scatter`] fans stateless records out round-robin over one worker per
//!   worker core.
//! - [`KeyedHash`] hashes a `key` callback result so equal keys always land
//!   on the same aggregator worker.
//! - [`ZipPorts`] buffers multi-input invocations until all in ports are
//!   present, then fires `react`.

pub use self::{keyed::KeyedHash, scatter::Scatter, serial::Serial, zip::ZipPorts};

mod keyed;
mod scatter;
mod serial;
mod zip;

use std::sync::Arc;

use skitter::{Operation, StrategyError, StrategyRegistry, Value, WorkerRef};

/// Registry holding every built-in strategy.
pub fn builtin() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry
        .register(Arc::new(Serial))
        .expect("builtin registry starts empty");
    registry
        .register(Arc::new(Scatter::default()))
        .expect("builtin registry starts empty");
    registry
        .register(Arc::new(KeyedHash))
        .expect("builtin registry starts empty");
    registry
        .register(Arc::new(ZipPorts))
        .expect("builtin registry starts empty");
    registry
}

/// Fails unless the operation provides the given callback.
pub(crate) fn require_callback(
    operation: &Operation,
    name: &str,
    arity: usize,
) -> Result<(), StrategyError> {
    if operation.has_callback(name, arity) {
        Ok(())
    } else {
        Err(StrategyError::MissingCallback {
            operation: operation.name().to_owned(),
            name: name.to_owned(),
            arity,
        })
    }
}

/// Computes the instance configuration: the `conf` callback applied to the
/// deploy arguments, or the arguments themselves when there is none.
pub(crate) fn resolve_config(operation: &Operation, args: &Value) -> Result<Value, StrategyError> {
    if operation.has_callback("conf", 1) {
        let result = operation.call("conf", Value::Nil, &Value::Nil, &[args.clone()])?;
        Ok(result.value)
    } else {
        Ok(args.clone())
    }
}

/// Computes the initial state of a fresh worker: the `init` callback, or the
/// operation's initial state when there is none.
pub(crate) fn initial_worker_state(
    operation: &Operation,
    config: &Value,
) -> Result<Value, StrategyError> {
    let result = operation.call_if_exists("init", operation.initial_state().clone(), config, &[])?;
    Ok(result.state)
}

/// Wraps a delivered record with its in port index for the worker mailbox.
pub(crate) fn port_message(port: usize, value: Value) -> Value {
    Value::record(vec![
        ("port", Value::Int(port as i64)),
        ("value", value),
    ])
}

/// Splits a mailbox message produced by [`port_message`].
pub(crate) fn split_port_message(message: &Value) -> Result<(usize, Value), StrategyError> {
    let port = message
        .field("port")
        .and_then(Value::as_int)
        .ok_or_else(|| StrategyError::MalformedMessage(message.to_string()))?;
    let value = message
        .field("value")
        .cloned()
        .ok_or_else(|| StrategyError::MalformedMessage(message.to_string()))?;
    Ok((port as usize, value))
}

/// Configuration stored inside deployment data.
pub(crate) fn config_of(data: &Value) -> Value {
    data.field("config").cloned().unwrap_or(Value::Nil)
}

/// The single worker stored inside deployment data.
pub(crate) fn worker_of(data: &Value) -> Result<WorkerRef, StrategyError> {
    data.field("worker")
        .and_then(WorkerRef::from_value)
        .ok_or_else(|| {
            StrategyError::MalformedMessage("deployment data carries no worker".to_owned())
        })
}

/// The worker table stored inside deployment data.
pub(crate) fn workers_of(data: &Value) -> Result<Vec<WorkerRef>, StrategyError> {
    data.field("workers")
        .and_then(Value::as_list)
        .and_then(|workers| workers.iter().map(WorkerRef::from_value).collect())
        .ok_or_else(|| {
            StrategyError::MalformedMessage("deployment data carries no worker table".to_owned())
        })
}
