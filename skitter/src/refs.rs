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

//! Identifiers shared between the core model and the runtime: node names,
//! worker references, deployment references and invocation tokens.

use serde_derive::{Deserialize, Serialize};

use std::fmt;

use crate::value::Value;

/// Network-visible name of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeName(String);

impl NodeName {
    /// Creates a node name.
    pub fn new(name: impl Into<String>) -> Self {
        NodeName(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        NodeName(name.to_owned())
    }
}

/// Routable address of a worker: the node hosting it plus a node-unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerRef {
    /// Node hosting the worker.
    pub node: NodeName,
    /// Identifier of the worker, unique on its node.
    pub id: u64,
}

impl WorkerRef {
    /// Encodes the reference as a [`Value`], so strategies can store worker
    /// tables inside their deployment data.
    pub fn to_value(&self) -> Value {
        Value::record(vec![
            ("node", Value::Text(self.node.as_str().to_owned())),
            ("worker", Value::Int(self.id as i64)),
        ])
    }

    /// Decodes a reference previously produced by [`WorkerRef::to_value`].
    pub fn from_value(value: &Value) -> Option<Self> {
        let node = value.field("node")?.as_text()?;
        let id = value.field("worker")?.as_int()?;
        Some(WorkerRef {
            node: NodeName::new(node),
            id: id as u64,
        })
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.node, self.id)
    }
}

/// Opaque token identifying a logical firing of the workflow.
///
/// `External` marks records that entered the system from outside; all other
/// invocations are minted from a per-node counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Invocation {
    /// The record entered from outside the system.
    External,
    /// A runtime-minted invocation token.
    Id(u64),
}

impl Invocation {
    /// Encodes the invocation as a [`Value`].
    pub fn to_value(self) -> Value {
        match self {
            Invocation::External => Value::Text("external".to_owned()),
            Invocation::Id(id) => Value::Int(id as i64),
        }
    }

    /// Decodes an invocation previously produced by [`Invocation::to_value`].
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(text) if text == "external" => Some(Invocation::External),
            Value::Int(id) => Some(Invocation::Id(*id as u64)),
            _ => None,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::External => formatter.write_str("external"),
            Invocation::Id(id) => write!(formatter, "#{}", id),
        }
    }
}

/// Reference to a deployed workflow instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DeploymentId(pub u64);

impl fmt::Display for DeploymentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "deployment-{}", self.0)
    }
}

/// Reference to one operation instance inside a deployment: the deployment
/// plus the instance's index in the flattened workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceRef {
    /// The owning deployment.
    pub deployment: DeploymentId,
    /// Index of the operation instance in the flattened workflow.
    pub index: usize,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}[{}]", self.deployment, self.index)
    }
}

/// How long a worker lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifetime {
    /// The worker lives as long as the workflow deployment.
    Deployment,
    /// The worker is collected after its invocation completes.
    Invocation,
}

/// Placement constraint for a new worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Round-robin over the worker cores of the cluster.
    Any,
    /// The worker must live on this node; fails if the node is unreachable.
    On(NodeName),
    /// The worker must share a node with the referenced worker.
    With(WorkerRef),
    /// Prefer any node except the one hosting the referenced worker; falls
    /// back to the same node when no alternative exists.
    Avoid(WorkerRef),
}
