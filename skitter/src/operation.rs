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

//! Operation descriptors and the operation registry.
//!
//! An operation is an immutable descriptor: typed ports, an initial state,
//! an optional default strategy and a set of callbacks keyed by
//! `(name, arity)`. Operations are registered at program start and resolved
//! by name at deploy time.

use std::{collections::HashMap, sync::Arc};

use crate::{
    callback::{Callback, CallbackInfo, CallbackResult, CallbackTrace},
    error::{CallbackError, DefinitionError},
    value::Value,
};

/// A stateful or stateless computation unit with typed ports and callbacks.
#[derive(Debug)]
pub struct Operation {
    name: String,
    in_ports: Vec<String>,
    out_ports: Vec<String>,
    default_strategy: Option<String>,
    initial_state: Value,
    callbacks: HashMap<(String, usize), Callback>,
}

impl Operation {
    /// Starts building an operation with the given name.
    pub fn builder(name: impl Into<String>) -> OperationBuilder {
        OperationBuilder {
            name: name.into(),
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            default_strategy: None,
            initial_state: Value::Nil,
            callbacks: HashMap::new(),
        }
    }

    /// Name of the operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered in port names.
    pub fn in_ports(&self) -> &[String] {
        &self.in_ports
    }

    /// Ordered out port names.
    pub fn out_ports(&self) -> &[String] {
        &self.out_ports
    }

    /// Number of in ports.
    pub fn arity(&self) -> usize {
        self.in_ports.len()
    }

    /// Name of the default strategy, if any.
    pub fn strategy(&self) -> Option<&str> {
        self.default_strategy.as_deref()
    }

    /// Initial state of a fresh worker for this operation.
    pub fn initial_state(&self) -> &Value {
        &self.initial_state
    }

    /// Index of an in port, by position in the port list.
    pub fn in_port_index(&self, port: &str) -> Option<usize> {
        self.in_ports.iter().position(|p| p == port)
    }

    /// Index of an out port, by position in the port list.
    pub fn out_port_index(&self, port: &str) -> Option<usize> {
        self.out_ports.iter().position(|p| p == port)
    }

    /// Name of the in port with the given index.
    pub fn index_to_in_port(&self, index: usize) -> Option<&str> {
        self.in_ports.get(index).map(String::as_str)
    }

    /// The `(name, arity)` pairs of all callbacks.
    pub fn callbacks(&self) -> impl Iterator<Item = (&str, usize)> {
        self.callbacks
            .keys()
            .map(|(name, arity)| (name.as_str(), *arity))
    }

    /// Returns `true` if the operation has the given callback.
    pub fn has_callback(&self, name: &str, arity: usize) -> bool {
        self.callbacks.contains_key(&(name.to_owned(), arity))
    }

    /// Declared info of a callback.
    pub fn callback_info(&self, name: &str, arity: usize) -> Option<&CallbackInfo> {
        self.callbacks
            .get(&(name.to_owned(), arity))
            .map(Callback::info)
    }

    /// Invokes a callback against `(state, config, args)`.
    pub fn call(
        &self,
        name: &str,
        state: Value,
        config: &Value,
        args: &[Value],
    ) -> Result<CallbackResult, CallbackError> {
        self.call_traced(name, state, config, args)
            .map(|(result, _)| result)
    }

    /// Invokes a callback and also returns the primitive trace of the
    /// execution.
    pub fn call_traced(
        &self,
        name: &str,
        state: Value,
        config: &Value,
        args: &[Value],
    ) -> Result<(CallbackResult, CallbackTrace), CallbackError> {
        let callback = self.callbacks.get(&(name.to_owned(), args.len())).ok_or(
            CallbackError::UnknownCallback {
                operation: self.name.clone(),
                name: name.to_owned(),
                arity: args.len(),
            },
        )?;
        callback.invoke(state, config, &self.out_ports, args)
    }

    /// Invokes a callback if it exists; otherwise returns an empty result
    /// whose state is the operation's initial state.
    pub fn call_if_exists(
        &self,
        name: &str,
        state: Value,
        config: &Value,
        args: &[Value],
    ) -> Result<CallbackResult, CallbackError> {
        if self.has_callback(name, args.len()) {
            self.call(name, state, config, args)
        } else {
            Ok(CallbackResult {
                value: Value::Nil,
                state: self.initial_state.clone(),
                emit: Default::default(),
            })
        }
    }
}

/// Builder for [`Operation`].
#[derive(Debug)]
pub struct OperationBuilder {
    name: String,
    in_ports: Vec<String>,
    out_ports: Vec<String>,
    default_strategy: Option<String>,
    initial_state: Value,
    callbacks: HashMap<(String, usize), Callback>,
}

impl OperationBuilder {
    /// Appends an in port.
    pub fn in_port(mut self, port: impl Into<String>) -> Self {
        self.in_ports.push(port.into());
        self
    }

    /// Appends an out port.
    pub fn out_port(mut self, port: impl Into<String>) -> Self {
        self.out_ports.push(port.into());
        self
    }

    /// Sets the default strategy, referenced by name.
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.default_strategy = Some(strategy.into());
        self
    }

    /// Sets the initial state.
    pub fn initial_state(mut self, state: Value) -> Self {
        self.initial_state = state;
        self
    }

    /// Adds a callback under `(name, arity)`.
    pub fn callback(mut self, name: impl Into<String>, callback: Callback) -> Self {
        self.callbacks.insert((name.into(), callback.arity()), callback);
        self
    }

    /// Validates port names and produces the operation.
    pub fn build(self) -> Result<Operation, DefinitionError> {
        for ports in [&self.in_ports, &self.out_ports] {
            for (i, port) in ports.iter().enumerate() {
                if ports[..i].contains(port) {
                    return Err(DefinitionError::DuplicatePort {
                        operation: self.name.clone(),
                        port: port.clone(),
                    });
                }
            }
        }
        Ok(Operation {
            name: self.name,
            in_ports: self.in_ports,
            out_ports: self.out_ports,
            default_strategy: self.default_strategy,
            initial_state: self.initial_state,
            callbacks: self.callbacks,
        })
    }
}

/// Holds operation descriptors, keyed by name.
///
/// Populated at program start; immutable afterwards. Strategies and the
/// deployer resolve operations by lookup, never by direct pointer.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<Operation>>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation; registering the same name twice is an error.
    pub fn register(&mut self, operation: Operation) -> Result<(), DefinitionError> {
        let name = operation.name().to_owned();
        if self.operations.contains_key(&name) {
            return Err(DefinitionError::DuplicateName { name });
        }
        log::trace!("Registered operation `{}`", name);
        self.operations.insert(name, Arc::new(operation));
        Ok(())
    }

    /// Looks up an operation by name.
    pub fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.operations.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::callback::CallbackContext;

    fn average_operation() -> Operation {
        Operation::builder("average")
            .in_port("value")
            .out_port("current")
            .initial_state(Value::record(vec![
                ("total", Value::Int(0)),
                ("count", Value::Int(0)),
            ]))
            .callback(
                "react",
                Callback::new(1, CallbackInfo::stateful_emitter(), |ctx, args| {
                    let total = ctx.read_field("total")?.as_int().unwrap_or(0)
                        + args[0].as_int().unwrap_or(0);
                    let count = ctx.read_field("count")?.as_int().unwrap_or(0) + 1;
                    ctx.write_field("total", Value::Int(total))?;
                    ctx.write_field("count", Value::Int(count))?;
                    ctx.emit("current", vec![Value::Float(total as f64 / count as f64)])?;
                    Ok(Value::Nil)
                }),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_port_is_rejected() {
        let err = Operation::builder("bad")
            .in_port("value")
            .in_port("value")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DuplicatePort {
                operation: "bad".to_owned(),
                port: "value".to_owned()
            }
        );
    }

    #[test]
    fn ports_are_dense_and_zero_based() {
        let operation = average_operation();
        assert_eq!(operation.arity(), 1);
        assert_eq!(operation.in_port_index("value"), Some(0));
        assert_eq!(operation.out_port_index("current"), Some(0));
        assert_eq!(operation.in_port_index("bogus"), None);
    }

    #[test]
    fn call_threads_state_and_emissions() {
        let operation = average_operation();
        let state = operation.initial_state().clone();
        let result = operation
            .call("react", state, &Value::Nil, &[Value::Int(10)])
            .unwrap();
        assert_eq!(result.state.field("total"), Some(&Value::Int(10)));
        assert_eq!(result.state.field("count"), Some(&Value::Int(1)));
        assert_eq!(
            result.emit.get("current"),
            Some(&vec![Value::Float(10.0)])
        );

        let result = operation
            .call("react", result.state, &Value::Nil, &[Value::Int(20)])
            .unwrap();
        assert_eq!(result.emit.get("current"), Some(&vec![Value::Float(15.0)]));
    }

    #[test]
    fn unknown_callback_is_an_error() {
        let operation = average_operation();
        let err = operation
            .call("bogus", Value::Nil, &Value::Nil, &[])
            .unwrap_err();
        assert_eq!(
            err,
            CallbackError::UnknownCallback {
                operation: "average".to_owned(),
                name: "bogus".to_owned(),
                arity: 0
            }
        );
    }

    #[test]
    fn call_if_exists_defaults_to_initial_state() {
        let operation = average_operation();
        let result = operation
            .call_if_exists("init", Value::Int(99), &Value::Nil, &[])
            .unwrap();
        assert_eq!(result.value, Value::Nil);
        assert_eq!(result.state, *operation.initial_state());
        assert!(result.emit.is_empty());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = OperationRegistry::new();
        registry.register(average_operation()).unwrap();
        let err = registry.register(average_operation()).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DuplicateName {
                name: "average".to_owned()
            }
        );
        assert!(registry.get("average").is_some());
    }

    // Dynamic-trace check of `CallbackInfo` faithfulness: over many random
    // inputs, each declared boolean holds exactly when at least one run of
    // the callback used the corresponding primitive.
    #[test]
    fn callback_info_matches_dynamic_trace() {
        fn key_body(
            _ctx: &mut CallbackContext<'_>,
            args: &[Value],
        ) -> Result<Value, CallbackError> {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) % 4))
        }

        let operation = Operation::builder("probe")
            .in_port("value")
            .out_port("current")
            .initial_state(Value::record(vec![
                ("total", Value::Int(0)),
                ("count", Value::Int(0)),
            ]))
            .callback(
                "react",
                average_callback(),
            )
            .callback("key", Callback::new(1, CallbackInfo::pure(), key_body))
            .build()
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        for (name, arity) in [("react", 1), ("key", 1)] {
            let info = *operation.callback_info(name, arity).unwrap();
            let mut observed = CallbackTrace::default();
            for _ in 0..100 {
                let state = Value::record(vec![
                    ("total", Value::Int(rng.gen_range(-100..100))),
                    ("count", Value::Int(rng.gen_range(1..100))),
                ]);
                let args = vec![Value::Int(rng.gen_range(-100..100))];
                let (_, trace) = operation
                    .call_traced(name, state, &Value::Nil, &args)
                    .unwrap();
                observed.read_state |= trace.read_state;
                observed.wrote_state |= trace.wrote_state;
                observed.emitted |= trace.emitted;
            }
            assert_eq!(observed.read_state, info.reads_state);
            assert_eq!(observed.wrote_state, info.writes_state);
            assert_eq!(observed.emitted, info.emits);
        }
    }

    fn average_callback() -> Callback {
        Callback::new(1, CallbackInfo::stateful_emitter(), |ctx, args| {
            let total =
                ctx.read_field("total")?.as_int().unwrap_or(0) + args[0].as_int().unwrap_or(0);
            let count = ctx.read_field("count")?.as_int().unwrap_or(0) + 1;
            ctx.write_field("total", Value::Int(total))?;
            ctx.write_field("count", Value::Int(count))?;
            ctx.emit("current", vec![Value::Float(total as f64 / count as f64)])?;
            Ok(Value::Nil)
        })
    }
}
