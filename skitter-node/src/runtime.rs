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

//! The per-node runtime.
//!
//! [`RuntimeHandle`] is the cheaply clonable handle to a node's shared
//! state: the registries, the replicated stores, the worker table and the
//! channel towards the network part. It implements [`StrategyServices`], so
//! strategy hooks reach worker creation, sends and placement through it.

use futures::channel::mpsc;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use skitter::{
    operation::OperationRegistry, strategy::StrategyRegistry, Context, DeploymentId, InstanceRef,
    Invocation, Lifetime, NodeName, Operation, Placement, PlacementError, SendError, Strategy,
    StrategyServices, Value, WorkerRef,
};

use crate::{
    config::{Mode, NodeConfig},
    events::NetworkRequest,
    messages::{RegistryKey, RegistryValue, WireMessage},
    placement::Placer,
    stores::{
        DeploymentStore, LinkStore, LinkTable, NodeRecord, NodeRegistry, SupervisorStore, TagStore,
    },
    supervisor::{self, SupervisorHandle},
    worker::{self, WorkerCommand, WorkerHandle, WorkerSeed},
};

/// Remote worker ids are assigned by the creating node from a per-target
/// counter above this base, so they never collide with ids the hosting node
/// assigns locally.
const REMOTE_ID_BASE: u64 = 1 << 32;

pub(crate) struct NodeInner {
    pub name: NodeName,
    pub mode: Mode,
    pub operations: OperationRegistry,
    pub strategies: StrategyRegistry,
    pub links: LinkStore,
    pub deployments: DeploymentStore,
    pub registry: NodeRegistry,
    pub tags: TagStore,
    pub supervisors: SupervisorStore,
    pub placer: Placer,
    pub failure_threshold: u32,
    workers: RwLock<HashMap<u64, WorkerHandle>>,
    next_worker_id: AtomicU64,
    remote_ids: Mutex<HashMap<NodeName, u64>>,
    next_invocation: AtomicU64,
    next_deployment: AtomicU64,
    network_tx: Mutex<Option<mpsc::UnboundedSender<NetworkRequest>>>,
}

impl fmt::Debug for NodeInner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NodeInner")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Handle to the runtime of a node.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    pub(crate) inner: Arc<NodeInner>,
}

impl RuntimeHandle {
    pub(crate) fn new(
        config: &NodeConfig,
        operations: OperationRegistry,
        strategies: StrategyRegistry,
    ) -> Self {
        let registry = NodeRegistry::new();
        let tags = TagStore::new();

        // Worker and local nodes are worker cores themselves; a master only
        // places workers on its remotes.
        if config.mode != Mode::Master {
            registry.put(
                config.name.clone(),
                NodeRecord {
                    address: config.name.as_str().to_owned(),
                    cores: config.cores,
                },
            );
            tags.put(config.name.clone(), config.tags.clone());
        }

        let placer = Placer::new(registry.clone(), config.name.clone());
        RuntimeHandle {
            inner: Arc::new(NodeInner {
                name: config.name.clone(),
                mode: config.mode,
                operations,
                strategies,
                links: LinkStore::new(),
                deployments: DeploymentStore::new(),
                registry,
                tags,
                supervisors: SupervisorStore::new(),
                placer,
                failure_threshold: config.failure_threshold,
                workers: RwLock::new(HashMap::new()),
                next_worker_id: AtomicU64::new(1),
                remote_ids: Mutex::new(HashMap::new()),
                // Seeded per node so tokens minted on different nodes do not
                // collide.
                next_invocation: AtomicU64::new((rand::random::<u32>() as u64) << 32),
                next_deployment: AtomicU64::new(1),
                network_tx: Mutex::new(None),
            }),
        }
    }

    /// Name of this node.
    pub fn node_name(&self) -> &NodeName {
        &self.inner.name
    }

    /// Role of this node.
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Registry of the operations this node was built with.
    pub fn operations(&self) -> &OperationRegistry {
        &self.inner.operations
    }

    pub(crate) fn attach_network(&self, tx: mpsc::UnboundedSender<NetworkRequest>) {
        *self.inner.network_tx.lock().unwrap() = Some(tx);
    }

    pub(crate) fn network_request(&self, request: NetworkRequest) -> bool {
        let guard = self.inner.network_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.unbounded_send(request).is_ok(),
            None => false,
        }
    }

    fn network_send(&self, node: &NodeName, message: WireMessage) -> bool {
        self.network_request(NetworkRequest::SendMessage(node.clone(), message))
    }

    /// Sends a frame to every registered worker node.
    pub(crate) fn broadcast(&self, message: WireMessage) {
        for node in self.inner.registry.nodes() {
            if node != self.inner.name {
                self.network_send(&node, message.clone());
            }
        }
    }

    pub(crate) fn next_deployment_id(&self) -> DeploymentId {
        DeploymentId(self.inner.next_deployment.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn links(&self, deployment: DeploymentId) -> Option<Arc<LinkTable>> {
        self.inner.links.get(&deployment)
    }

    pub(crate) fn ensure_supervisor(&self, deployment: DeploymentId) -> SupervisorHandle {
        let handle = self.clone();
        let threshold = self.inner.failure_threshold;
        self.inner
            .supervisors
            .register_if_absent(deployment, move || {
                supervisor::spawn(handle, deployment, threshold)
            })
    }

    pub(crate) fn spawn_local_worker(
        &self,
        instance: InstanceRef,
        state: Value,
        tag: &str,
        lifetime: Lifetime,
    ) -> WorkerRef {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.spawn_local_worker_with_id(id, instance, state, tag, lifetime)
    }

    pub(crate) fn spawn_local_worker_with_id(
        &self,
        id: u64,
        instance: InstanceRef,
        state: Value,
        tag: &str,
        lifetime: Lifetime,
    ) -> WorkerRef {
        let supervisor = self.ensure_supervisor(instance.deployment);
        let (tx, rx) = mpsc::unbounded();
        self.inner
            .workers
            .write()
            .unwrap()
            .insert(id, WorkerHandle { tx, instance });
        log::trace!(
            "Created worker {}/{} (tag = {}) for {}",
            self.inner.name,
            id,
            tag,
            instance
        );
        tokio::spawn(worker::worker_task(WorkerSeed {
            id,
            instance,
            tag: tag.to_owned(),
            lifetime,
            state,
            rx,
            handle: self.clone(),
            supervisor,
        }));
        WorkerRef {
            node: self.inner.name.clone(),
            id,
        }
    }

    fn next_remote_worker_id(&self, node: &NodeName) -> u64 {
        let mut guard = self.inner.remote_ids.lock().unwrap();
        let counter = guard.entry(node.clone()).or_insert(REMOTE_ID_BASE);
        let id = *counter;
        *counter += 1;
        id
    }

    pub(crate) fn remove_worker(&self, id: u64) {
        self.inner.workers.write().unwrap().remove(&id);
    }

    fn local_worker(&self, id: u64) -> Option<WorkerHandle> {
        self.inner.workers.read().unwrap().get(&id).cloned()
    }

    /// Mailboxes of all local workers belonging to a deployment.
    fn deployment_workers(&self, deployment: DeploymentId) -> Vec<WorkerHandle> {
        self.inner
            .workers
            .read()
            .unwrap()
            .values()
            .filter(|handle| handle.instance.deployment == deployment)
            .cloned()
            .collect()
    }

    pub(crate) fn instance_context(&self, instance: InstanceRef) -> Option<InstanceContext> {
        let record = self
            .inner
            .deployments
            .instance(instance.deployment, instance.index)?;
        let operation = self.inner.operations.get(&record.operation)?;
        let strategy = self.inner.strategies.get(&record.strategy)?;
        Some(InstanceContext {
            operation,
            strategy,
            strategy_name: record.strategy,
            args: record.args,
            data: record.data,
        })
    }

    /// Tears a deployment down cluster-wide (master) or locally (worker).
    pub(crate) fn teardown_deployment(&self, deployment: DeploymentId) {
        if self.inner.mode != Mode::Worker {
            self.broadcast(WireMessage::RegistryDel {
                key: RegistryKey::Links(deployment),
            });
            self.broadcast(WireMessage::RegistryDel {
                key: RegistryKey::Deployment(deployment),
            });
        }
        self.teardown_local(deployment);
    }

    /// Stops this node's workers for a deployment and unpublishes its
    /// constant store entries.
    ///
    /// The store entries go first: workers drain any message still in their
    /// mailbox against a gone deployment, which discards it.
    pub(crate) fn teardown_local(&self, deployment: DeploymentId) {
        self.inner.links.remove(&deployment);
        self.inner.deployments.remove(&deployment);
        self.inner.supervisors.remove(deployment);

        let workers = self.deployment_workers(deployment);
        if !workers.is_empty() {
            log::info!(
                "Stopping {} workers of {} on {}",
                workers.len(),
                deployment,
                self.inner.name
            );
        }
        for handle in workers {
            handle.tx.unbounded_send(WorkerCommand::Stop).ok();
        }
    }

    /// Applies a worker or constant-store frame received from a peer.
    pub(crate) fn handle_wire_message(&self, from: &NodeName, message: WireMessage) {
        match message {
            WireMessage::WorkerMsg {
                worker,
                invocation,
                payload,
            } => match self.local_worker(worker) {
                Some(handle) => {
                    handle
                        .tx
                        .unbounded_send(WorkerCommand::Deliver {
                            message: payload,
                            invocation,
                        })
                        .ok();
                }
                None => {
                    log::debug!(
                        "Dropping message from {} for stopped worker {}",
                        from,
                        worker
                    );
                }
            },
            WireMessage::DeployRemoteCreate {
                instance,
                worker,
                record,
                state,
                tag,
                lifetime,
            } => {
                self.inner
                    .deployments
                    .ensure_instance(instance.deployment, instance.index, record);
                self.spawn_local_worker_with_id(worker, instance, state, &tag, lifetime);
            }
            WireMessage::WorkerStop { worker } => {
                if let Some(handle) = self.local_worker(worker) {
                    handle.tx.unbounded_send(WorkerCommand::Stop).ok();
                }
            }
            WireMessage::RegistryPut {
                key: RegistryKey::Links(deployment),
                value: RegistryValue::Links(table),
            } => {
                self.inner.links.put(deployment, Arc::new(table));
            }
            WireMessage::RegistryPut {
                key: RegistryKey::Deployment(deployment),
                value: RegistryValue::Deployment(records),
            } => {
                self.inner.deployments.put(deployment, Arc::new(records));
            }
            WireMessage::RegistryDel {
                key: RegistryKey::Links(deployment),
            } => {
                self.inner.links.remove(&deployment);
            }
            WireMessage::RegistryDel {
                key: RegistryKey::Deployment(deployment),
            } => {
                self.teardown_local(deployment);
            }
            other => {
                log::debug!("Ignoring unexpected frame from {}: {:?}", from, other);
            }
        }
    }
}

impl StrategyServices for RuntimeHandle {
    fn local_node(&self) -> NodeName {
        self.inner.name.clone()
    }

    fn worker_nodes(&self) -> Vec<NodeName> {
        self.inner.registry.nodes()
    }

    fn worker_cores(&self) -> Vec<NodeName> {
        self.inner.registry.cores()
    }

    fn fresh_invocation(&self) -> Invocation {
        Invocation::Id(self.inner.next_invocation.fetch_add(1, Ordering::Relaxed))
    }

    fn create_worker(
        &self,
        instance: InstanceRef,
        state: Value,
        tag: &str,
        lifetime: Lifetime,
        placement: Placement,
    ) -> Result<WorkerRef, PlacementError> {
        let target = self.inner.placer.pick(&placement)?;
        if target == self.inner.name {
            return Ok(self.spawn_local_worker(instance, state, tag, lifetime));
        }

        let record = match self
            .inner
            .deployments
            .instance(instance.deployment, instance.index)
        {
            Some(record) => record,
            None => {
                log::error!("Creating a remote worker for unknown instance {}", instance);
                return Err(PlacementError::NodeUnreachable { node: target });
            }
        };
        let id = self.next_remote_worker_id(&target);
        let sent = self.network_send(
            &target,
            WireMessage::DeployRemoteCreate {
                instance,
                worker: id,
                record,
                state,
                tag: tag.to_owned(),
                lifetime,
            },
        );
        if !sent {
            return Err(PlacementError::NodeUnreachable { node: target });
        }
        Ok(WorkerRef { node: target, id })
    }

    fn send(
        &self,
        worker: &WorkerRef,
        message: Value,
        invocation: Invocation,
    ) -> Result<(), SendError> {
        if worker.node == self.inner.name {
            let handle = self.local_worker(worker.id).ok_or(SendError::Stopped {
                worker: worker.clone(),
            })?;
            handle
                .tx
                .unbounded_send(WorkerCommand::Deliver {
                    message,
                    invocation,
                })
                .map_err(|_| SendError::Stopped {
                    worker: worker.clone(),
                })
        } else {
            if !self.inner.registry.contains(&worker.node) {
                return Err(SendError::NodeDown {
                    node: worker.node.clone(),
                });
            }
            let sent = self.network_send(
                &worker.node,
                WireMessage::WorkerMsg {
                    worker: worker.id,
                    invocation,
                    payload: message,
                },
            );
            if sent {
                Ok(())
            } else {
                Err(SendError::NodeDown {
                    node: worker.node.clone(),
                })
            }
        }
    }

    fn send_after(
        &self,
        delay: Duration,
        worker: WorkerRef,
        message: Value,
        invocation: Invocation,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The worker may be gone by now; timers are best effort.
            this.send(&worker, message, invocation).ok();
        });
    }

    fn stop(&self, worker: &WorkerRef) -> Result<(), SendError> {
        if worker.node == self.inner.name {
            let handle = self.local_worker(worker.id).ok_or(SendError::Stopped {
                worker: worker.clone(),
            })?;
            handle
                .tx
                .unbounded_send(WorkerCommand::Stop)
                .map_err(|_| SendError::Stopped {
                    worker: worker.clone(),
                })
        } else {
            if !self.inner.registry.contains(&worker.node) {
                return Err(SendError::NodeDown {
                    node: worker.node.clone(),
                });
            }
            self.network_send(&worker.node, WireMessage::WorkerStop { worker: worker.id });
            Ok(())
        }
    }

    fn instance_data(&self, instance: InstanceRef) -> Option<Value> {
        self.inner
            .deployments
            .instance(instance.deployment, instance.index)
            .map(|record| record.data)
    }
}

/// Resolved per-instance context pieces, fetched from the stores once per
/// hook call.
pub(crate) struct InstanceContext {
    pub operation: Arc<Operation>,
    pub strategy: Arc<dyn Strategy>,
    pub strategy_name: String,
    pub args: Value,
    pub data: Value,
}

impl InstanceContext {
    pub fn context<'a>(
        &'a self,
        services: &'a dyn StrategyServices,
        invocation: Invocation,
        instance: InstanceRef,
    ) -> Context<'a> {
        Context::new(
            &self.strategy_name,
            &self.operation,
            &self.args,
            &self.data,
            invocation,
            instance,
            services,
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::strategies;

    fn local_handle() -> RuntimeHandle {
        let mut config = NodeConfig::local();
        config.cores = 2;
        RuntimeHandle::new(&config, OperationRegistry::new(), strategies::builtin())
    }

    #[tokio::test]
    async fn created_workers_are_distinct_but_identically_seeded() {
        let handle = local_handle();
        let instance = InstanceRef {
            deployment: DeploymentId(900),
            index: 0,
        };
        let first = handle
            .create_worker(
                instance,
                Value::Int(0),
                "worker",
                Lifetime::Deployment,
                Placement::Any,
            )
            .unwrap();
        let second = handle
            .create_worker(
                instance,
                Value::Int(0),
                "worker",
                Lifetime::Deployment,
                Placement::Any,
            )
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(first.node, second.node);
    }

    #[tokio::test]
    async fn sending_to_an_unknown_worker_reports_stopped() {
        let handle = local_handle();
        let worker = WorkerRef {
            node: handle.node_name().clone(),
            id: 4040,
        };
        assert_eq!(
            handle.send(&worker, Value::Nil, Invocation::External),
            Err(SendError::Stopped {
                worker: worker.clone()
            })
        );
    }

    #[tokio::test]
    async fn sending_to_a_down_node_reports_node_down() {
        let handle = local_handle();
        let worker = WorkerRef {
            node: NodeName::new("gone"),
            id: 1,
        };
        assert_eq!(
            handle.send(&worker, Value::Nil, Invocation::External),
            Err(SendError::NodeDown {
                node: NodeName::new("gone")
            })
        );
    }

    #[test]
    fn fresh_invocations_are_unique() {
        let handle = local_handle();
        let first = handle.fresh_invocation();
        let second = handle.fresh_invocation();
        assert_ne!(first, second);
    }
}
