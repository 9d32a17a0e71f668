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

//! Callback IR and executor.
//!
//! A callback body is a closure over an explicit context exposing the five
//! primitives of the callback mini-language: `read_state`, `read_field`,
//! `write_state`, `write_field` and `emit`. The executor runs the body
//! against `(state, config, args)`, accumulates the final state and emit
//! map, and records which primitives actually ran so the declared
//! [`CallbackInfo`] can be checked against runtime behavior.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{error::CallbackError, value::Value};

/// Values emitted by a callback or a process hook, keyed by out port name.
pub type EmitMap = BTreeMap<String, Vec<Value>>;

/// Static description of a callback's behavior.
///
/// The booleans must be faithful: a strategy may assume that a callback
/// marked `reads_state: false` ignores any state passed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallbackInfo {
    /// The callback reads its state.
    pub reads_state: bool,
    /// The callback replaces its state.
    pub writes_state: bool,
    /// The callback emits records.
    pub emits: bool,
}

impl CallbackInfo {
    /// Info for a pure callback: no state access, no emissions.
    pub fn pure() -> Self {
        CallbackInfo::default()
    }

    /// Info for a callback that reads and writes state and emits records.
    pub fn stateful_emitter() -> Self {
        CallbackInfo {
            reads_state: true,
            writes_state: true,
            emits: true,
        }
    }
}

/// Which primitives a single callback execution actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallbackTrace {
    /// `read_state` or `read_field` ran.
    pub read_state: bool,
    /// `write_state` or `write_field` ran.
    pub wrote_state: bool,
    /// `emit` ran.
    pub emitted: bool,
}

impl CallbackTrace {
    /// Checks that the trace stays within the declared info. A callback may
    /// use fewer capabilities than declared on any given input, never more.
    fn check_within(&self, info: &CallbackInfo) -> Result<(), CallbackError> {
        if self.read_state && !info.reads_state {
            return Err(CallbackError::UndeclaredEffect {
                effect: "read_state",
            });
        }
        if self.wrote_state && !info.writes_state {
            return Err(CallbackError::UndeclaredEffect {
                effect: "write_state",
            });
        }
        if self.emitted && !info.emits {
            return Err(CallbackError::UndeclaredEffect { effect: "emit" });
        }
        Ok(())
    }
}

/// Result of executing a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResult {
    /// Value of the final expression of the body.
    pub value: Value,
    /// State after execution: the last `write_state` value, or the input
    /// state when the body never wrote.
    pub state: Value,
    /// Accumulated emissions, keyed by out port name.
    pub emit: EmitMap,
}

/// Execution context handed to a callback body; exposes the primitives of
/// the callback mini-language.
#[derive(Debug)]
pub struct CallbackContext<'a> {
    state: Value,
    config: &'a Value,
    out_ports: &'a [String],
    emit: EmitMap,
    trace: CallbackTrace,
}

impl<'a> CallbackContext<'a> {
    pub(crate) fn new(state: Value, config: &'a Value, out_ports: &'a [String]) -> Self {
        CallbackContext {
            state,
            config,
            out_ports,
            emit: EmitMap::new(),
            trace: CallbackTrace::default(),
        }
    }

    /// Returns the configuration of the operation instance.
    pub fn config(&self) -> &Value {
        self.config
    }

    /// Returns the current state.
    pub fn read_state(&mut self) -> Value {
        self.trace.read_state = true;
        self.state.clone()
    }

    /// Returns field `name` of the current state, which must be a record.
    pub fn read_field(&mut self, name: &str) -> Result<Value, CallbackError> {
        self.trace.read_state = true;
        self.state
            .field(name)
            .cloned()
            .ok_or_else(|| CallbackError::MissingField {
                field: name.to_owned(),
            })
    }

    /// Replaces the state.
    pub fn write_state(&mut self, value: Value) {
        self.trace.wrote_state = true;
        self.state = value;
    }

    /// Updates field `name` of the state, which must be a record already
    /// carrying that field.
    pub fn write_field(&mut self, name: &str, value: Value) -> Result<(), CallbackError> {
        self.trace.wrote_state = true;
        if self.state.set_field(name, value) {
            Ok(())
        } else {
            Err(CallbackError::MissingField {
                field: name.to_owned(),
            })
        }
    }

    /// Emits a sequence of values on an out port, overwriting any value the
    /// body previously emitted on that port.
    pub fn emit(&mut self, port: &str, values: Vec<Value>) -> Result<(), CallbackError> {
        self.trace.emitted = true;
        if !self.out_ports.iter().any(|p| p == port) {
            return Err(CallbackError::UnknownPort {
                port: port.to_owned(),
            });
        }
        self.emit.insert(port.to_owned(), values);
        Ok(())
    }
}

/// The executable body of a callback.
pub type CallbackBody =
    dyn Fn(&mut CallbackContext<'_>, &[Value]) -> Result<Value, CallbackError> + Send + Sync;

/// A named entry point of an operation.
#[derive(Clone)]
pub struct Callback {
    arity: usize,
    info: CallbackInfo,
    body: Arc<CallbackBody>,
}

impl Callback {
    /// Creates a callback from its arity, declared info and body.
    pub fn new<F>(arity: usize, info: CallbackInfo, body: F) -> Self
    where
        F: Fn(&mut CallbackContext<'_>, &[Value]) -> Result<Value, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Callback {
            arity,
            info,
            body: Arc::new(body),
        }
    }

    /// Number of arguments the callback takes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Declared behavior of the callback.
    pub fn info(&self) -> &CallbackInfo {
        &self.info
    }

    /// Runs the callback and returns its result along with the primitive
    /// trace of the execution. The trace may not exceed the declared info.
    pub fn invoke(
        &self,
        state: Value,
        config: &Value,
        out_ports: &[String],
        args: &[Value],
    ) -> Result<(CallbackResult, CallbackTrace), CallbackError> {
        debug_assert_eq!(args.len(), self.arity);
        let mut context = CallbackContext::new(state, config, out_ports);
        let value = (self.body)(&mut context, args)?;
        context.trace.check_within(&self.info)?;
        let result = CallbackResult {
            value,
            state: context.state,
            emit: context.emit,
        };
        Ok((result, context.trace))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Callback")
            .field("arity", &self.arity)
            .field("info", &self.info)
            .finish()
    }
}
