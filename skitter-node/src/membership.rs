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

//! Cluster membership.
//!
//! The master owns the Registry and Tags stores: it verifies every
//! connecting peer, registers workers, and fans registration changes out to
//! subscribed workers. Workers subscribe on `master_up` so each worker node
//! knows every other worker; on `master_down` a worker clears its view and
//! retains only itself.
//!
//! The component is written as a pure state machine producing [`Action`]s,
//! so the membership protocol is testable without sockets; the node event
//! loop applies the actions to the network part.

use std::collections::{BTreeSet, HashMap};

use skitter::NodeName;

use crate::{
    config::Mode,
    messages::{Hello, RegistryKey, RegistryValue, WireMessage},
    stores::{NodeRegistry, NodeRecord, TagStore},
};

/// Network side effects produced by a membership transition.
#[derive(Debug, PartialEq)]
pub(crate) enum Action {
    /// Send a frame to a peer.
    Send(NodeName, WireMessage),
    /// Drop the connection with a peer.
    Disconnect(NodeName),
}

/// State of a remote, tracked on the master per dialled address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteState {
    /// Handshake in progress.
    Verifying,
    /// The peer advertised `mode = worker` and is registered.
    Connected,
    /// The peer was never admitted, or has been lost.
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct Membership {
    mode: Mode,
    local: NodeName,
    registry: NodeRegistry,
    tags: TagStore,
    remotes: HashMap<String, RemoteState>,
    subscribers_up: BTreeSet<NodeName>,
    subscribers_down: BTreeSet<NodeName>,
    master: Option<NodeName>,
}

impl Membership {
    pub fn new(mode: Mode, local: NodeName, registry: NodeRegistry, tags: TagStore) -> Self {
        Membership {
            mode,
            local,
            registry,
            tags,
            remotes: HashMap::new(),
            subscribers_up: BTreeSet::new(),
            subscribers_down: BTreeSet::new(),
            master: None,
        }
    }

    /// Records an outgoing connection attempt.
    pub fn dialing(&mut self, address: &str) {
        self.remotes
            .insert(address.to_owned(), RemoteState::Verifying);
    }

    /// Records a failed connection attempt.
    pub fn unreachable(&mut self, address: &str) {
        self.remotes
            .insert(address.to_owned(), RemoteState::Disconnected);
    }

    /// Number of workers currently admitted to the cluster.
    pub fn connected_workers(&self) -> usize {
        self.remotes
            .values()
            .filter(|state| **state == RemoteState::Connected)
            .count()
    }

    /// The master this worker is subscribed to, if any.
    pub fn master(&self) -> Option<&NodeName> {
        self.master.as_ref()
    }

    /// A peer completed its handshake.
    pub fn on_peer_connected(&mut self, hello: &Hello) -> Vec<Action> {
        match self.mode {
            Mode::Master => self.admit_worker(hello),
            Mode::Worker => self.track_peer(hello),
            Mode::Local => Vec::new(),
        }
    }

    fn admit_worker(&mut self, hello: &Hello) -> Vec<Action> {
        if hello.mode != Mode::Worker {
            log::warn!(
                "Rejecting peer {}: mode mismatch (mode = {})",
                hello.node,
                hello.mode
            );
            self.remotes
                .insert(hello.address.clone(), RemoteState::Disconnected);
            return vec![Action::Disconnect(hello.node.clone())];
        }

        log::info!("Worker {} joined the cluster", hello.node);
        self.remotes
            .insert(hello.address.clone(), RemoteState::Connected);
        let record = NodeRecord {
            address: hello.address.clone(),
            cores: hello.cores,
        };
        self.registry.put(hello.node.clone(), record.clone());
        self.tags.put(hello.node.clone(), hello.tags.clone());

        let mut actions = Vec::new();
        for subscriber in &self.subscribers_up {
            if *subscriber == hello.node {
                continue;
            }
            actions.push(Action::Send(
                subscriber.clone(),
                WireMessage::RegistryPut {
                    key: RegistryKey::Node(hello.node.clone()),
                    value: RegistryValue::Node(record.clone()),
                },
            ));
            actions.push(Action::Send(
                subscriber.clone(),
                WireMessage::TagsPut {
                    node: hello.node.clone(),
                    tags: hello.tags.clone(),
                },
            ));
        }
        actions
    }

    fn track_peer(&mut self, hello: &Hello) -> Vec<Action> {
        match hello.mode {
            Mode::Master => {
                log::info!("Master {} is up", hello.node);
                self.master = Some(hello.node.clone());
                vec![
                    Action::Send(hello.node.clone(), WireMessage::SubscribeUp),
                    Action::Send(hello.node.clone(), WireMessage::SubscribeDown),
                ]
            }
            // Another worker dialled us to exchange worker messages.
            Mode::Worker => Vec::new(),
            Mode::Local => Vec::new(),
        }
    }

    /// A peer connection was lost.
    pub fn on_peer_disconnected(&mut self, node: &NodeName) -> Vec<Action> {
        match self.mode {
            Mode::Master => {
                let address = self.registry.get(node).map(|record| record.address);
                if let Some(address) = address {
                    self.remotes.insert(address, RemoteState::Disconnected);
                }
                if !self.registry.remove(node) {
                    return Vec::new();
                }
                log::warn!("Worker {} left the cluster", node);
                self.tags.remove(node);
                self.subscribers_up.remove(node);

                let mut actions = Vec::new();
                for subscriber in &self.subscribers_down {
                    if subscriber == node {
                        continue;
                    }
                    actions.push(Action::Send(
                        subscriber.clone(),
                        WireMessage::RegistryDel {
                            key: RegistryKey::Node(node.clone()),
                        },
                    ));
                    actions.push(Action::Send(
                        subscriber.clone(),
                        WireMessage::TagsDel { node: node.clone() },
                    ));
                }
                self.subscribers_down.remove(node);
                actions
            }
            Mode::Worker => {
                if self.master.as_ref() == Some(node) {
                    log::warn!("Master {} is down; clearing cluster view", node);
                    self.master = None;
                    self.registry.clear_except(&self.local);
                    self.tags.clear_except(&self.local);
                }
                Vec::new()
            }
            Mode::Local => Vec::new(),
        }
    }

    /// A membership frame arrived from a connected peer.
    pub fn on_message(&mut self, from: &NodeName, message: &WireMessage) -> Vec<Action> {
        match message {
            WireMessage::SubscribeUp => {
                self.subscribers_up.insert(from.clone());
                // Bring the new subscriber up to date.
                let mut actions = Vec::new();
                for (node, record) in self.registry.entries() {
                    if node == *from {
                        continue;
                    }
                    let tags = self.tags.get(&node).unwrap_or_default();
                    actions.push(Action::Send(
                        from.clone(),
                        WireMessage::RegistryPut {
                            key: RegistryKey::Node(node.clone()),
                            value: RegistryValue::Node(record),
                        },
                    ));
                    actions.push(Action::Send(
                        from.clone(),
                        WireMessage::TagsPut { node, tags },
                    ));
                }
                actions
            }
            WireMessage::SubscribeDown => {
                self.subscribers_down.insert(from.clone());
                Vec::new()
            }
            WireMessage::RegistryPut {
                key: RegistryKey::Node(node),
                value: RegistryValue::Node(record),
            } => {
                self.registry.put(node.clone(), record.clone());
                Vec::new()
            }
            WireMessage::RegistryDel {
                key: RegistryKey::Node(node),
            } => {
                self.registry.remove(node);
                self.tags.remove(node);
                Vec::new()
            }
            WireMessage::TagsPut { node, tags } => {
                self.tags.put(node.clone(), tags.clone());
                Vec::new()
            }
            WireMessage::TagsDel { node } => {
                self.tags.remove(node);
                Vec::new()
            }
            WireMessage::Ping => vec![Action::Send(from.clone(), WireMessage::Pong)],
            WireMessage::Pong => Vec::new(),
            _ => Vec::new(),
        }
    }
}
