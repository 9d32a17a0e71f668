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

//! Error taxonomy of the runtime.
//!
//! `DefinitionError` covers malformed operations and workflows and is fatal
//! at load time. `StrategyError` covers hook failures and is fatal for the
//! deployment. `PlacementError` and `SendError` are recoverable: the calling
//! strategy decides whether to retry or propagate.

use thiserror::Error;

use crate::refs::{NodeName, WorkerRef};

/// A malformed operation or workflow definition.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum DefinitionError {
    /// Two ports of an operation share a name.
    #[error("duplicate port `{port}` in operation `{operation}`")]
    DuplicatePort { operation: String, port: String },

    /// Two workflow nodes share a name.
    #[error("duplicate node `{node}` in workflow")]
    DuplicateNode { node: String },

    /// A name was registered twice.
    #[error("`{name}` is already registered")]
    DuplicateName { name: String },

    /// A link references a node absent from the workflow.
    #[error("link references unknown node `{node}`")]
    UnknownNode { node: String },

    /// A link or emit references a port the target does not declare.
    #[error("unknown port `{port}` on `{name}`")]
    UnknownPort { name: String, port: String },

    /// An operation instance has neither an explicit nor a default strategy.
    #[error("operation `{operation}` has no strategy")]
    MissingStrategy { operation: String },

    /// A strategy name did not resolve at deploy time.
    #[error("unknown strategy `{strategy}`")]
    UnknownStrategy { strategy: String },

    /// A workflow links one of its own in ports straight to an out port.
    #[error("workflow `{workflow}` links an in port directly to an out port")]
    PassThroughLink { workflow: String },

    /// `emit` and `emit_invocation` of one process result both name a port.
    #[error("process result emits on port `{port}` twice")]
    EmitCollision { port: String },
}

/// A callback could not run or misbehaved while running.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CallbackError {
    /// The `(name, arity)` pair is not a callback of the operation.
    #[error("operation `{operation}` has no callback `{name}/{arity}`")]
    UnknownCallback {
        operation: String,
        name: String,
        arity: usize,
    },

    /// A field primitive ran against a non-record state or an absent field.
    #[error("state has no field `{field}`")]
    MissingField { field: String },

    /// A callback emitted on a port its operation does not declare.
    #[error("emit on unknown port `{port}`")]
    UnknownPort { port: String },

    /// A callback used a primitive its `CallbackInfo` does not declare.
    #[error("callback used undeclared capability `{effect}`")]
    UndeclaredEffect { effect: &'static str },

    /// User code inside the callback failed.
    #[error("callback failed: {0}")]
    Failed(String),
}

/// A worker placement constraint could not be satisfied.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum PlacementError {
    /// The requested node is not part of the cluster.
    #[error("node `{node}` is unreachable")]
    NodeUnreachable { node: NodeName },

    /// No worker node is connected.
    #[error("no worker nodes available")]
    NoWorkerNodes,
}

/// A message could not be delivered to a worker.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SendError {
    /// The node hosting the worker left the cluster.
    #[error("node `{node}` is down")]
    NodeDown { node: NodeName },

    /// The worker was stopped.
    #[error("worker {worker} is stopped")]
    Stopped { worker: WorkerRef },
}

/// A strategy hook failed; fatal for the deployment it belongs to.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum StrategyError {
    /// The operation does not provide a callback the strategy requires.
    #[error("strategy requires callback `{name}/{arity}` on operation `{operation}`")]
    MissingCallback {
        operation: String,
        name: String,
        arity: usize,
    },

    /// A message the strategy sent to its own worker did not have the shape
    /// the strategy itself produces.
    #[error("malformed worker message: {0}")]
    MalformedMessage(String),

    /// A callback invoked by the hook failed.
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// Worker placement failed.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// A send issued by the hook failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The hook surfaced a definition problem.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}
