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

//! Core data model of the Skitter stream-processing runtime.
//!
//! A Skitter program describes a *workflow* — a graph of *operations*
//! connected through typed ports — which the runtime deploys across a
//! cluster. This crate contains everything the runtime and user code share:
//!
//! - [`Operation`] descriptors, the callback IR and its executor
//! - [`Workflow`] graphs and the flattener producing the dense runtime form
//! - the [`Strategy`] protocol: the `deploy`/`deliver`/`process` hooks every
//!   operation instance plugs into
//! - the [`Matcher`] used by multi-input strategies
//! - the shared error taxonomy
//!
//! The distributed runtime itself lives in the `skitter-node` crate.
//!
//! [`Operation`]: crate::Operation
//! [`Workflow`]: crate::Workflow
//! [`Strategy`]: crate::Strategy
//! [`Matcher`]: crate::Matcher

#![warn(
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    bare_trait_objects
)]

pub mod callback;
pub mod error;
pub mod matcher;
pub mod operation;
pub mod refs;
pub mod strategy;
pub mod value;
pub mod workflow;

pub use crate::{
    callback::{Callback, CallbackContext, CallbackInfo, CallbackResult, CallbackTrace, EmitMap},
    error::{CallbackError, DefinitionError, PlacementError, SendError, StrategyError},
    matcher::{Match, Matcher, Token},
    operation::{Operation, OperationBuilder, OperationRegistry},
    refs::{DeploymentId, InstanceRef, Invocation, Lifetime, NodeName, Placement, WorkerRef},
    strategy::{Context, ProcessResult, Strategy, StrategyRegistry, StrategyServices},
    value::Value,
    workflow::{FlatNode, FlattenedWorkflow, LinkDest, Source, Target, Workflow, WorkflowBuilder},
};
