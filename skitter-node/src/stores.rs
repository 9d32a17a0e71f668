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

//! Replicated, read-mostly stores.
//!
//! Link tables and deployment vectors are published once per deployment and
//! read-only afterwards; the node registry and tag store are mutated only by
//! the membership component. Each store is an `Arc<RwLock<_>>` with a single
//! writer and snapshot reads, so lookups never coordinate across nodes.

use serde_derive::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops,
    sync::{Arc, RwLock},
};

use skitter::{workflow::FlattenedWorkflow, DeploymentId, LinkDest, NodeName, Value};

use crate::supervisor::SupervisorHandle;

/// Resolved link table of a deployment, replicated identically on every
/// node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkTable {
    /// Per-instance tables: out port name → destinations.
    pub nodes: Vec<BTreeMap<String, Vec<LinkDest>>>,
    /// Workflow in port → destinations, used for records entering from
    /// outside the system.
    pub in_links: BTreeMap<String, Vec<LinkDest>>,
}

impl LinkTable {
    /// Extracts the link table of a flattened workflow.
    pub fn from_flattened(flattened: &FlattenedWorkflow) -> Self {
        LinkTable {
            nodes: flattened
                .nodes
                .iter()
                .map(|node| node.links.clone())
                .collect(),
            in_links: flattened.in_links.clone(),
        }
    }

    /// Destinations of an out port of an instance; `None` means the port is
    /// a sink.
    pub fn destinations(&self, node: usize, port: &str) -> Option<&Vec<LinkDest>> {
        self.nodes.get(node)?.get(port)
    }
}

/// Per-instance entry of a published deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Name of the operation, resolved through the operation registry.
    pub operation: String,
    /// Name of the strategy, resolved through the strategy registry.
    pub strategy: String,
    /// Deploy-time arguments of the instance.
    pub args: Value,
    /// Data returned by the instance's deploy hook; written exactly once.
    pub data: Value,
}

/// Registry entry of a connected worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Address peers use to connect to the node.
    pub address: String,
    /// Worker cores the node advertises.
    pub cores: usize,
}

macro_rules! shared_store {
    ($(#[$doc:meta])* $name:ident, $key:ty, $value:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            inner: Arc<RwLock<BTreeMap<$key, $value>>>,
        }

        impl $name {
            /// Creates an empty store.
            pub fn new() -> Self {
                Self::default()
            }

            pub(crate) fn read(&self) -> impl ops::Deref<Target = BTreeMap<$key, $value>> + '_ {
                self.inner.read().unwrap()
            }

            pub(crate) fn write(
                &self,
            ) -> impl ops::DerefMut<Target = BTreeMap<$key, $value>> + '_ {
                self.inner.write().unwrap()
            }

            /// Inserts or replaces an entry.
            pub fn put(&self, key: $key, value: $value) {
                self.write().insert(key, value);
            }

            /// Removes an entry; returns `true` if it existed.
            pub fn remove(&self, key: &$key) -> bool {
                self.write().remove(key).is_some()
            }

            /// Returns a snapshot of an entry.
            pub fn get(&self, key: &$key) -> Option<$value> {
                self.read().get(key).cloned()
            }

            /// Returns `true` if the entry exists.
            pub fn contains(&self, key: &$key) -> bool {
                self.read().contains_key(key)
            }

            /// Number of entries.
            pub fn len(&self) -> usize {
                self.read().len()
            }

            /// Returns `true` when the store is empty.
            pub fn is_empty(&self) -> bool {
                self.read().is_empty()
            }
        }
    };
}

shared_store!(
    /// Link tables, keyed by deployment.
    LinkStore,
    DeploymentId,
    Arc<LinkTable>
);

shared_store!(
    /// Deployment vectors, keyed by deployment. Entries are keyed by
    /// instance index so a vector can be observed while it is populated.
    DeploymentStore,
    DeploymentId,
    Arc<BTreeMap<usize, InstanceRecord>>
);

shared_store!(
    /// Connected worker nodes, written by the membership component.
    NodeRegistry,
    NodeName,
    NodeRecord
);

shared_store!(
    /// Capability tags of connected worker nodes.
    TagStore,
    NodeName,
    BTreeSet<String>
);

impl DeploymentStore {
    /// Snapshot of one instance record.
    pub fn instance(&self, deployment: DeploymentId, index: usize) -> Option<InstanceRecord> {
        self.read().get(&deployment)?.get(&index).cloned()
    }

    /// Inserts an instance record if the deployment does not know it yet;
    /// used when a remote create arrives before the deployment vector.
    pub fn ensure_instance(
        &self,
        deployment: DeploymentId,
        index: usize,
        record: InstanceRecord,
    ) {
        let mut guard = self.write();
        let entry = guard.entry(deployment).or_default();
        if !entry.contains_key(&index) {
            let mut updated = (**entry).clone();
            updated.insert(index, record);
            *entry = Arc::new(updated);
        }
    }
}

impl NodeRegistry {
    /// Names of all registered worker nodes.
    pub fn nodes(&self) -> Vec<NodeName> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of all registry entries.
    pub fn entries(&self) -> Vec<(NodeName, NodeRecord)> {
        self.read()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    /// One entry per advertised worker core.
    pub fn cores(&self) -> Vec<NodeName> {
        self.read()
            .iter()
            .flat_map(|(name, record)| std::iter::repeat(name.clone()).take(record.cores))
            .collect()
    }

    /// Drops every entry except `keep`; used when a worker loses its
    /// master and retains only itself.
    pub fn clear_except(&self, keep: &NodeName) {
        self.write().retain(|name, _| name == keep);
    }
}

impl TagStore {
    /// Drops every entry except `keep`.
    pub fn clear_except(&self, keep: &NodeName) {
        self.write().retain(|name, _| name == keep);
    }
}

/// Per-workflow supervisors running on this node.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStore {
    inner: Arc<RwLock<HashMap<DeploymentId, SupervisorHandle>>>,
}

impl SupervisorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a supervisor handle.
    pub(crate) fn get(&self, deployment: DeploymentId) -> Option<SupervisorHandle> {
        self.inner.read().unwrap().get(&deployment).cloned()
    }

    /// Registers a supervisor if none exists; returns the registered handle.
    pub(crate) fn register_if_absent(
        &self,
        deployment: DeploymentId,
        spawn: impl FnOnce() -> SupervisorHandle,
    ) -> SupervisorHandle {
        let mut guard = self.inner.write().unwrap();
        guard.entry(deployment).or_insert_with(spawn).clone()
    }

    /// Removes the supervisor of a deployment.
    pub(crate) fn remove(&self, deployment: DeploymentId) {
        self.inner.write().unwrap().remove(&deployment);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn registry_snapshots() {
        let registry = NodeRegistry::new();
        let node = NodeName::new("worker-1");
        registry.put(
            node.clone(),
            NodeRecord {
                address: "127.0.0.1:4001".to_owned(),
                cores: 2,
            },
        );
        assert!(registry.contains(&node));
        assert_eq!(registry.nodes(), vec![node.clone()]);
        assert_eq!(registry.cores(), vec![node.clone(), node.clone()]);
        assert!(registry.remove(&node));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_except_retains_only_self() {
        let registry = NodeRegistry::new();
        for name in ["a", "b", "c"] {
            registry.put(
                NodeName::new(name),
                NodeRecord {
                    address: String::new(),
                    cores: 1,
                },
            );
        }
        registry.clear_except(&NodeName::new("b"));
        assert_eq!(registry.nodes(), vec![NodeName::new("b")]);
    }

    #[test]
    fn deployment_entries_populate_incrementally() {
        let store = DeploymentStore::new();
        let deployment = DeploymentId(1);
        let record = InstanceRecord {
            operation: "average".to_owned(),
            strategy: "serial".to_owned(),
            args: Value::Nil,
            data: Value::Nil,
        };
        store.ensure_instance(deployment, 0, record.clone());
        // A later ensure never overwrites.
        let mut changed = record.clone();
        changed.data = Value::Int(1);
        store.ensure_instance(deployment, 0, changed);
        assert_eq!(store.instance(deployment, 0), Some(record));
        assert_eq!(store.instance(deployment, 1), None);
    }
}
