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

//! The strategy protocol.
//!
//! A strategy is a named distribution policy plugged into every operation
//! instance. The runtime never routes a record directly: deployment goes
//! through `deploy`, every record crossing a workflow edge goes through
//! `deliver`, and every worker message goes through `process`.
//!
//! Hooks run against a [`Context`] and reach the runtime through the
//! [`StrategyServices`] trait, which the node crate implements. The core
//! crate only defines the seam, so strategies can be exercised against a
//! mock runtime in tests.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};

use crate::{
    callback::EmitMap,
    error::{DefinitionError, PlacementError, SendError, StrategyError},
    operation::Operation,
    refs::{InstanceRef, Invocation, Lifetime, NodeName, Placement, WorkerRef},
    value::Value,
};

/// Runtime services available to strategy hooks.
///
/// Implemented by the node runtime; the trait is object safe so contexts can
/// carry it without naming the runtime type.
pub trait StrategyServices {
    /// Name of the node the hook runs on.
    fn local_node(&self) -> NodeName;

    /// Connected worker nodes, one entry per node.
    fn worker_nodes(&self) -> Vec<NodeName>;

    /// Worker cores of the cluster: one entry per advertised core, so a
    /// node advertising four cores appears four times.
    fn worker_cores(&self) -> Vec<NodeName>;

    /// Mints a fresh invocation token.
    fn fresh_invocation(&self) -> Invocation;

    /// Creates a worker owned by `instance` under the given placement
    /// constraint. Identical inputs yield distinct workers with
    /// indistinguishable initial state.
    fn create_worker(
        &self,
        instance: InstanceRef,
        state: Value,
        tag: &str,
        lifetime: Lifetime,
        placement: Placement,
    ) -> Result<WorkerRef, PlacementError>;

    /// Sends a message to a worker, fire and forget. Ordering is preserved
    /// per sender/receiver pair.
    fn send(
        &self,
        worker: &WorkerRef,
        message: Value,
        invocation: Invocation,
    ) -> Result<(), SendError>;

    /// Schedules a message to a worker after a delay; strategies use this to
    /// implement timeouts by messaging their own workers.
    fn send_after(
        &self,
        delay: Duration,
        worker: WorkerRef,
        message: Value,
        invocation: Invocation,
    );

    /// Stops a worker.
    fn stop(&self, worker: &WorkerRef) -> Result<(), SendError>;

    /// Deployment data of another instance of the same deployment, if
    /// already deployed. During deployment, instances are populated in
    /// flattened order, so a hook may observe data of lower-indexed
    /// instances.
    fn instance_data(&self, instance: InstanceRef) -> Option<Value>;
}

/// Immutable environment passed into every strategy hook.
pub struct Context<'a> {
    /// Name of the strategy the hook belongs to.
    pub strategy: &'a str,
    /// The operation of the instance.
    pub operation: &'a Arc<Operation>,
    /// Deploy-time arguments of the instance.
    pub args: &'a Value,
    /// Data returned by the instance's deploy hook; `Nil` while deploying.
    pub deployment_data: &'a Value,
    /// The invocation of the current firing.
    pub invocation: Invocation,
    /// The operation instance the hook belongs to.
    pub instance: InstanceRef,
    services: &'a dyn StrategyServices,
}

impl<'a> Context<'a> {
    /// Builds a context; used by the runtime and by strategy tests.
    pub fn new(
        strategy: &'a str,
        operation: &'a Arc<Operation>,
        args: &'a Value,
        deployment_data: &'a Value,
        invocation: Invocation,
        instance: InstanceRef,
        services: &'a dyn StrategyServices,
    ) -> Self {
        Context {
            strategy,
            operation,
            args,
            deployment_data,
            invocation,
            instance,
            services,
        }
    }

    /// Creates a deployment-lifetime worker on the local node.
    pub fn create_local(&self, state: Value, tag: &str) -> Result<WorkerRef, PlacementError> {
        let node = self.services.local_node();
        self.services.create_worker(
            self.instance,
            state,
            tag,
            Lifetime::Deployment,
            Placement::On(node),
        )
    }

    /// Creates a deployment-lifetime worker under a placement constraint.
    pub fn create_remote(
        &self,
        state: Value,
        tag: &str,
        placement: Placement,
    ) -> Result<WorkerRef, PlacementError> {
        self.services
            .create_worker(self.instance, state, tag, Lifetime::Deployment, placement)
    }

    /// Creates a worker with full control over lifetime and placement.
    pub fn create_worker(
        &self,
        state: Value,
        tag: &str,
        lifetime: Lifetime,
        placement: Placement,
    ) -> Result<WorkerRef, PlacementError> {
        self.services
            .create_worker(self.instance, state, tag, lifetime, placement)
    }

    /// Sends a message to a worker under the context's invocation.
    pub fn send(&self, worker: &WorkerRef, message: Value) -> Result<(), SendError> {
        self.services.send(worker, message, self.invocation)
    }

    /// Sends a message to a worker under an explicit invocation.
    pub fn send_invocation(
        &self,
        worker: &WorkerRef,
        message: Value,
        invocation: Invocation,
    ) -> Result<(), SendError> {
        self.services.send(worker, message, invocation)
    }

    /// Schedules a message to a worker after a delay.
    pub fn send_after(&self, delay: Duration, worker: WorkerRef, message: Value) {
        self.services
            .send_after(delay, worker, message, self.invocation);
    }

    /// Stops a worker.
    pub fn stop(&self, worker: &WorkerRef) -> Result<(), SendError> {
        self.services.stop(worker)
    }

    /// Mints a fresh invocation token.
    pub fn fresh_invocation(&self) -> Invocation {
        self.services.fresh_invocation()
    }

    /// Name of the node the hook runs on.
    pub fn local_node(&self) -> NodeName {
        self.services.local_node()
    }

    /// Connected worker nodes.
    pub fn worker_nodes(&self) -> Vec<NodeName> {
        self.services.worker_nodes()
    }

    /// Worker cores of the cluster, one entry per core.
    pub fn worker_cores(&self) -> Vec<NodeName> {
        self.services.worker_cores()
    }

    /// Deployment data of a sibling instance in the same deployment.
    pub fn sibling_data(&self, index: usize) -> Option<Value> {
        self.services.instance_data(InstanceRef {
            deployment: self.instance.deployment,
            index,
        })
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Context")
            .field("strategy", &self.strategy)
            .field("operation", &self.operation.name())
            .field("invocation", &self.invocation)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Result of a strategy's `process` hook. Missing pieces mean "no change" /
/// "no emission".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessResult {
    /// Replacement worker state, if the hook changed it.
    pub state: Option<Value>,
    /// Emissions forwarded under the invocation of the processed message.
    pub emit: EmitMap,
    /// Emissions stamped with explicit per-element invocations; used by
    /// source-like strategies. Additive with `emit`, but the same port may
    /// not appear in both.
    pub emit_invocation: BTreeMap<String, Vec<(Value, Invocation)>>,
}

impl ProcessResult {
    /// A result that changes nothing and emits nothing.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Sets the replacement state.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Adds emissions under the processed message's invocation.
    pub fn with_emit(mut self, emit: EmitMap) -> Self {
        self.emit = emit;
        self
    }

    /// Adds an emission stamped with its own invocation.
    pub fn with_emit_invocation(
        mut self,
        port: impl Into<String>,
        values: Vec<(Value, Invocation)>,
    ) -> Self {
        self.emit_invocation.insert(port.into(), values);
        self
    }

    /// Rejects results that emit on the same port through both maps.
    pub fn check_ports(&self) -> Result<(), DefinitionError> {
        for port in self.emit.keys() {
            if self.emit_invocation.contains_key(port) {
                return Err(DefinitionError::EmitCollision { port: port.clone() });
            }
        }
        Ok(())
    }
}

/// A distribution policy: the three hooks every operation instance plugs
/// into.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Name under which the strategy is registered.
    fn name(&self) -> &str;

    /// Called once per operation instance during workflow deployment. May
    /// allocate workers; the returned value becomes the instance's
    /// read-only deployment data.
    fn deploy(&self, context: &Context<'_>, args: &Value) -> Result<Value, StrategyError>;

    /// Called by the router each time a record crosses a workflow edge into
    /// this operation. Must not compute results; forwards the record to an
    /// appropriate worker.
    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        port: usize,
    ) -> Result<(), StrategyError>;

    /// Called on the worker's node when the worker receives a message.
    fn process(
        &self,
        context: &Context<'_>,
        message: Value,
        state: &Value,
        tag: &str,
    ) -> Result<ProcessResult, StrategyError>;
}

/// Holds strategies, keyed by name. Resolution happens at deploy time, so
/// operations and strategies may reference each other without ownership
/// cycles.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy; registering the same name twice is an error.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<(), DefinitionError> {
        let name = strategy.name().to_owned();
        if self.strategies.contains_key(&name) {
            return Err(DefinitionError::DuplicateName { name });
        }
        log::trace!("Registered strategy `{}`", name);
        self.strategies.insert(name, strategy);
        Ok(())
    }

    /// Looks up a strategy by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn process_result_rejects_port_collisions() {
        let mut emit = EmitMap::new();
        emit.insert("out".to_owned(), vec![Value::Int(1)]);
        let result = ProcessResult::unchanged()
            .with_emit(emit)
            .with_emit_invocation("out", vec![(Value::Int(2), Invocation::Id(1))]);
        assert_eq!(
            result.check_ports(),
            Err(DefinitionError::EmitCollision {
                port: "out".to_owned()
            })
        );
    }

    #[test]
    fn process_result_allows_disjoint_ports() {
        let mut emit = EmitMap::new();
        emit.insert("left".to_owned(), vec![Value::Int(1)]);
        let result = ProcessResult::unchanged()
            .with_emit(emit)
            .with_emit_invocation("right", vec![(Value::Int(2), Invocation::Id(1))]);
        assert_eq!(result.check_ports(), Ok(()));
    }
}
