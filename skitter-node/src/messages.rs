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

//! Messages of the framed peer-to-peer protocol.
//!
//! Every frame carries one [`WireMessage`], encoded with bincode. The
//! handshake exchanges [`Hello`] frames; everything after that is worker
//! traffic, replicated-store updates and membership subscriptions.

use serde_derive::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use skitter::{DeploymentId, InstanceRef, Invocation, Lifetime, NodeName, Value};

use crate::{
    config::Mode,
    stores::{InstanceRecord, LinkTable, NodeRecord},
};

/// First frame exchanged on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Role of the peer.
    pub mode: Mode,
    /// Network-visible name of the peer.
    pub node: NodeName,
    /// Shared secret; connections with a mismatching cookie are rejected.
    pub cookie: String,
    /// Address other peers can use to reach the node.
    pub address: String,
    /// Capability tags the node advertises.
    pub tags: BTreeSet<String>,
    /// Worker cores the node advertises.
    pub cores: usize,
}

/// Key of an entry in the replicated constant store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryKey {
    /// A connected worker node.
    Node(NodeName),
    /// The link table of a deployment.
    Links(DeploymentId),
    /// The deployment vector of a deployment.
    Deployment(DeploymentId),
}

/// Value of an entry in the replicated constant store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryValue {
    /// Registry record of a worker node.
    Node(NodeRecord),
    /// Link table of a deployment.
    Links(LinkTable),
    /// Deployment vector of a deployment.
    Deployment(BTreeMap<usize, InstanceRecord>),
}

/// A single frame of the peer-to-peer protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Handshake frame; only valid as the first frame of a connection.
    Hello(Hello),

    /// A message for a worker hosted by the receiving node.
    WorkerMsg {
        /// Identifier of the worker on the receiving node.
        worker: u64,
        /// Invocation the message belongs to.
        invocation: Invocation,
        /// The message itself.
        payload: Value,
    },

    /// Instructs the receiving node to host a worker created elsewhere. The
    /// worker id is assigned by the sender, so no reply is needed.
    DeployRemoteCreate {
        /// Operation instance owning the worker.
        instance: InstanceRef,
        /// Sender-assigned worker id, unique on the receiving node.
        worker: u64,
        /// Partial instance record, in case the deployment vector has not
        /// reached the node yet.
        record: InstanceRecord,
        /// Initial worker state.
        state: Value,
        /// User-chosen worker tag.
        tag: String,
        /// Lifetime of the worker.
        lifetime: Lifetime,
    },

    /// Stops a worker hosted by the receiving node.
    WorkerStop {
        /// Identifier of the worker on the receiving node.
        worker: u64,
    },

    /// Publishes an entry of the replicated constant store.
    RegistryPut {
        /// Key of the entry.
        key: RegistryKey,
        /// Value of the entry.
        value: RegistryValue,
    },

    /// Unpublishes an entry of the replicated constant store.
    RegistryDel {
        /// Key of the entry.
        key: RegistryKey,
    },

    /// Publishes the tag set of a node.
    TagsPut {
        /// The node the tags belong to.
        node: NodeName,
        /// The advertised tags.
        tags: BTreeSet<String>,
    },

    /// Removes the tag set of a node.
    TagsDel {
        /// The node whose tags are dropped.
        node: NodeName,
    },

    /// Asks the master to report nodes joining the cluster.
    SubscribeUp,

    /// Asks the master to report nodes leaving the cluster.
    SubscribeDown,

    /// Keepalive probe.
    Ping,

    /// Keepalive response.
    Pong,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn encoding_is_deterministic() {
        let message = WireMessage::WorkerMsg {
            worker: 3,
            invocation: Invocation::Id(7),
            payload: Value::record(vec![
                ("port", Value::Int(0)),
                ("value", Value::Text("x".to_owned())),
            ]),
        };
        let first = bincode::serialize(&message).unwrap();
        let second = bincode::serialize(&message).unwrap();
        assert_eq!(first, second);
        let decoded: WireMessage = bincode::deserialize(&first).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn hello_round_trip() {
        let hello = Hello {
            mode: Mode::Worker,
            node: NodeName::new("127.0.0.1:4001"),
            cookie: "secret".to_owned(),
            address: "127.0.0.1:4001".to_owned(),
            tags: vec!["gpu".to_owned()].into_iter().collect(),
            cores: 4,
        };
        let bytes = bincode::serialize(&WireMessage::Hello(hello.clone())).unwrap();
        let decoded: WireMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, WireMessage::Hello(hello));
    }
}
