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

//! Token buffering for multi-input operations.
//!
//! When an operation has more than one in port and its strategy fires once
//! all inputs for an invocation are present, the strategy buffers partial
//! token sets here. Duplicate tokens for the same `(invocation, port)`
//! overwrite, which strategies use for replay.

use std::collections::{BTreeMap, HashMap};

use crate::{refs::Invocation, value::Value};

/// A single value arriving on an in port for some invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The invocation the token belongs to.
    pub invocation: Invocation,
    /// Index of the in port the token arrived on.
    pub port: usize,
    /// The value itself.
    pub value: Value,
}

/// Outcome of adding a token.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    /// All ports for the invocation are present; the entry was removed and
    /// the arguments are ordered by port index.
    Ready {
        invocation: Invocation,
        args: Vec<Value>,
    },
    /// The invocation is still missing ports.
    Pending,
}

/// Buffers partial token sets per invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matcher {
    entries: HashMap<Invocation, BTreeMap<usize, Value>>,
}

impl Matcher {
    /// Creates an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token for an operation with `arity` in ports.
    pub fn add(&mut self, token: Token, arity: usize) -> Match {
        let entry = self.entries.entry(token.invocation).or_default();
        entry.insert(token.port, token.value);
        if entry.len() == arity {
            let entry = self.entries.remove(&token.invocation).unwrap_or_default();
            Match::Ready {
                invocation: token.invocation,
                args: entry.into_iter().map(|(_, value)| value).collect(),
            }
        } else {
            Match::Pending
        }
    }

    /// Number of invocations with buffered tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the matcher as a [`Value`], so a strategy can keep it inside
    /// its worker state.
    pub fn to_value(&self) -> Value {
        Value::List(
            self.entries
                .iter()
                .map(|(invocation, tokens)| {
                    Value::record(vec![
                        ("invocation", invocation.to_value()),
                        (
                            "tokens",
                            Value::Record(
                                tokens
                                    .iter()
                                    .map(|(port, value)| (port.to_string(), value.clone()))
                                    .collect(),
                            ),
                        ),
                    ])
                })
                .collect(),
        )
    }

    /// Decodes a matcher previously produced by [`Matcher::to_value`].
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut entries = HashMap::new();
        for entry in value.as_list()? {
            let invocation = Invocation::from_value(entry.field("invocation")?)?;
            let tokens = match entry.field("tokens")? {
                Value::Record(fields) => fields
                    .iter()
                    .map(|(port, value)| Some((port.parse().ok()?, value.clone())))
                    .collect::<Option<BTreeMap<usize, Value>>>()?,
                _ => return None,
            };
            entries.insert(invocation, tokens);
        }
        Some(Matcher { entries })
    }
}
