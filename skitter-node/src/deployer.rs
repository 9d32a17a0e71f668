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

//! The deployer.
//!
//! Deploying a workflow flattens it, publishes the resolved link table on
//! every node, drives the `deploy` hook of each instance in flattened order
//! — so a hook may observe the deployment data of lower-indexed instances —
//! and finally publishes the complete deployment vector. The returned
//! manager handle feeds records in from outside and tears the deployment
//! down again.

use std::{collections::BTreeMap, sync::Arc};

use skitter::{
    Context, DefinitionError, DeploymentId, InstanceRef, Invocation, LinkDest, StrategyError,
    Value, Workflow,
};

use crate::{
    messages::{RegistryKey, RegistryValue, WireMessage},
    router,
    runtime::RuntimeHandle,
    stores::{InstanceRecord, LinkTable},
};

impl RuntimeHandle {
    /// Deploys a workflow over the cluster and returns its manager.
    ///
    /// Must run inside the node's tokio runtime, since strategies spawn
    /// worker tasks while deploying.
    pub fn deploy(&self, workflow: &Workflow) -> Result<WorkflowManager, StrategyError> {
        let flattened = workflow.flatten()?;

        // Resolve every strategy up front so nothing is published for a
        // workflow that cannot deploy.
        let mut resolved = Vec::with_capacity(flattened.nodes.len());
        for node in &flattened.nodes {
            let strategy = self.inner.strategies.get(&node.strategy).ok_or_else(|| {
                DefinitionError::UnknownStrategy {
                    strategy: node.strategy.clone(),
                }
            })?;
            resolved.push(strategy);
        }

        let deployment = self.next_deployment_id();
        log::info!(
            "Deploying workflow `{}` with {} instances as {}",
            flattened.name,
            flattened.nodes.len(),
            deployment
        );

        let table = Arc::new(LinkTable::from_flattened(&flattened));
        self.inner.links.put(deployment, Arc::clone(&table));
        self.broadcast(WireMessage::RegistryPut {
            key: RegistryKey::Links(deployment),
            value: RegistryValue::Links((*table).clone()),
        });

        let mut records: BTreeMap<usize, InstanceRecord> = flattened
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let record = InstanceRecord {
                    operation: node.operation.name().to_owned(),
                    strategy: node.strategy.clone(),
                    args: node.args.clone(),
                    data: Value::Nil,
                };
                (index, record)
            })
            .collect();
        self.inner
            .deployments
            .put(deployment, Arc::new(records.clone()));

        for (index, node) in flattened.nodes.iter().enumerate() {
            let instance = InstanceRef { deployment, index };
            let nil = Value::Nil;
            let context = Context::new(
                &node.strategy,
                &node.operation,
                &node.args,
                &nil,
                Invocation::External,
                instance,
                self,
            );
            match resolved[index].deploy(&context, &node.args) {
                Ok(data) => {
                    if let Some(record) = records.get_mut(&index) {
                        record.data = data;
                    }
                    // Republish locally so later hooks observe this data.
                    self.inner
                        .deployments
                        .put(deployment, Arc::new(records.clone()));
                }
                Err(err) => {
                    log::error!(
                        "Deploying instance {} (`{}`) of {} failed: {}",
                        index,
                        node.name,
                        deployment,
                        err
                    );
                    self.teardown_deployment(deployment);
                    return Err(err);
                }
            }
        }

        self.broadcast(WireMessage::RegistryPut {
            key: RegistryKey::Deployment(deployment),
            value: RegistryValue::Deployment(records),
        });

        Ok(WorkflowManager {
            name: flattened.name,
            deployment,
            in_links: table.in_links.clone(),
            handle: self.clone(),
        })
    }
}

/// Handle to a deployed workflow instance.
///
/// Dropping the manager leaves the deployment running; call
/// [`WorkflowManager::stop`] to tear it down.
#[derive(Debug)]
pub struct WorkflowManager {
    name: String,
    deployment: DeploymentId,
    in_links: BTreeMap<String, Vec<LinkDest>>,
    handle: RuntimeHandle,
}

impl WorkflowManager {
    /// Reference of the deployment.
    pub fn deployment(&self) -> DeploymentId {
        self.deployment
    }

    /// Feeds a record into a workflow in port from outside the system.
    pub fn inject(&self, port: &str, value: Value) -> Result<(), DefinitionError> {
        self.inject_with(port, value, Invocation::External)
    }

    /// Feeds a record into a workflow in port under an explicit invocation.
    pub fn inject_with(
        &self,
        port: &str,
        value: Value,
        invocation: Invocation,
    ) -> Result<(), DefinitionError> {
        let dests = self
            .in_links
            .get(port)
            .ok_or_else(|| DefinitionError::UnknownPort {
                name: self.name.clone(),
                port: port.to_owned(),
            })?;
        for dest in dests {
            let instance = InstanceRef {
                deployment: self.deployment,
                index: dest.node,
            };
            router::deliver(&self.handle, instance, value.clone(), dest.port, invocation);
        }
        Ok(())
    }

    /// Returns `true` while the deployment is live on this node.
    pub fn is_alive(&self) -> bool {
        self.handle.links(self.deployment).is_some()
    }

    /// Stops all deployment-lifetime workers and unpublishes the constant
    /// store entries of the deployment.
    pub fn stop(self) {
        self.handle.teardown_deployment(self.deployment);
    }
}
