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

//! Distributed runtime of the Skitter stream-processing system.
//!
//! # Overview
//!
//! This crate contains the following APIs:
//!
//! - [`Node`] encapsulates a full Skitter node in one of three modes:
//!   `master`, `worker` or `local`
//! - [`RuntimeHandle`] is the clonable handle strategies and user code use
//!   to deploy workflows and reach the runtime services
//! - [`WorkflowManager`] manages one deployed workflow: it feeds records in
//!   from outside and tears the deployment down again
//! - [`NodeConfig`] collects the `SKITTER_*` environment configuration
//!
//! The data model — operations, callbacks, workflows, strategies — lives in
//! the `skitter` crate.
//!
//! [`Node`]: struct.Node.html
//! [`RuntimeHandle`]: struct.RuntimeHandle.html
//! [`WorkflowManager`]: struct.WorkflowManager.html
//! [`NodeConfig`]: struct.NodeConfig.html

#![warn(
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    bare_trait_objects
)]

pub use crate::{
    config::{ConfigError, Mode, NetworkConfiguration, NodeConfig},
    deployer::WorkflowManager,
    runtime::RuntimeHandle,
};

use futures::{channel::mpsc, StreamExt};
use thiserror::Error;

use std::{pin::Pin, time::Duration};

use skitter::{operation::OperationRegistry, strategy::StrategyRegistry};

use crate::{
    config::exit_code,
    events::{NetworkEvent, NetworkPart, NetworkRequest},
    membership::{Action, Membership},
    messages::{Hello, RegistryKey, WireMessage},
};

pub mod config;
mod deployer;
pub mod events;
mod membership;
pub mod messages;
mod placement;
mod router;
mod runtime;
pub mod stores;
pub mod strategies;
mod supervisor;
mod worker;

/// A failure preventing a node from starting or keeping running.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The node could not join the cluster.
    #[error("failed to join the cluster: {0}")]
    ClusterJoin(String),

    /// An internal invariant was violated.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl NodeError {
    /// Process exit code matching the error category.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Config(_) => exit_code::INVALID_CONFIG,
            NodeError::ClusterJoin(_) => exit_code::JOIN_FAILURE,
            NodeError::Internal(_) => exit_code::INTERNAL,
        }
    }
}

/// Handle used to stop a running [`Node`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ShutdownHandle {
    /// Asks the node to shut down.
    pub fn shutdown(&self) {
        self.tx.unbounded_send(()).ok();
    }
}

/// A full Skitter node.
///
/// `local` nodes are complete runtimes without networking: their
/// [`RuntimeHandle`] can deploy workflows immediately and [`Node::run`] only
/// waits for shutdown. `master` and `worker` nodes additionally run the
/// framed TCP transport and the membership protocol.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    handle: RuntimeHandle,
    membership: Membership,
    network: Option<NetworkPart>,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

impl Node {
    /// Creates a node from its configuration and the registries of the
    /// operations and strategies this program provides.
    pub fn new(
        config: NodeConfig,
        operations: OperationRegistry,
        strategies: StrategyRegistry,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let handle = RuntimeHandle::new(&config, operations, strategies);
        let (events_tx, events_rx) = mpsc::unbounded();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded();

        let network = if config.mode == Mode::Local {
            None
        } else {
            let (requests_tx, requests_rx) = mpsc::unbounded();
            handle.attach_network(requests_tx);
            let our_hello = Hello {
                mode: config.mode,
                node: config.name.clone(),
                cookie: config.cookie.clone(),
                address: config.name.as_str().to_owned(),
                tags: config.tags.clone(),
                cores: config.cores,
            };
            Some(NetworkPart {
                our_hello,
                listen_address: config.listen_address()?,
                network_config: config.network,
                network_requests: requests_rx,
                network_tx: events_tx,
                address_book: handle.inner.registry.clone(),
            })
        };

        let membership = Membership::new(
            config.mode,
            config.name.clone(),
            handle.inner.registry.clone(),
            handle.inner.tags.clone(),
        );

        Ok(Node {
            config,
            handle,
            membership,
            network,
            events_rx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Creates a `local` node with the built-in strategies.
    pub fn local(operations: OperationRegistry) -> Result<Self, NodeError> {
        Node::new(NodeConfig::local(), operations, strategies::builtin())
    }

    /// Handle to the node's runtime.
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Handle used to stop the node from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Runs the node until it is shut down.
    ///
    /// A master dials its configured workers and fails with a join error
    /// when none of them connects in time.
    pub async fn run(mut self) -> Result<(), NodeError> {
        log::info!("Starting {} node {}", self.config.mode, self.config.name);

        let network_task = self.network.take().map(|network| tokio::spawn(network.run()));

        if self.config.mode == Mode::Master {
            for address in &self.config.workers {
                self.membership.dialing(address);
                self.handle
                    .network_request(NetworkRequest::ConnectPeer(address.clone()));
            }
        }

        let mut join_deadline: Option<Pin<Box<tokio::time::Sleep>>> =
            if self.config.mode == Mode::Master && !self.config.workers.is_empty() {
                Some(Box::pin(tokio::time::sleep(Duration::from_millis(
                    self.config.network.join_timeout,
                ))))
            } else {
                None
            };
        let mut ping_interval = tokio::time::interval(Duration::from_millis(
            self.config.network.ping_interval,
        ));

        let outcome = loop {
            tokio::select! {
                event = self.events_rx.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => break Ok(()),
                },
                _ = self.shutdown_rx.next() => {
                    log::info!("Shutting down node {}", self.config.name);
                    break Ok(());
                }
                _ = wait_deadline(&mut join_deadline) => {
                    if self.membership.connected_workers() == 0 {
                        break Err(NodeError::ClusterJoin(format!(
                            "no worker connected within {} ms",
                            self.config.network.join_timeout
                        )));
                    }
                }
                _ = ping_interval.tick() => {
                    if self.config.mode == Mode::Master {
                        for node in self.handle.inner.registry.nodes() {
                            self.handle.network_request(NetworkRequest::SendMessage(
                                node,
                                WireMessage::Ping,
                            ));
                        }
                    }
                }
            }
        };
        if let Some(task) = network_task {
            task.abort();
        }
        outcome
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerConnected { hello, .. } => {
                let actions = self.membership.on_peer_connected(&hello);
                self.apply(actions);
            }
            NetworkEvent::MessageReceived { node, message } => {
                if is_membership_frame(&message) {
                    let actions = self.membership.on_message(&node, &message);
                    self.apply(actions);
                } else {
                    self.handle.handle_wire_message(&node, message);
                }
            }
            NetworkEvent::PeerDisconnected(node) => {
                let actions = self.membership.on_peer_disconnected(&node);
                self.apply(actions);
            }
            NetworkEvent::UnableToConnect { address } => {
                log::warn!("Could not reach {}", address);
                self.membership.unreachable(&address);
            }
        }
    }

    fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(node, message) => {
                    self.handle
                        .network_request(NetworkRequest::SendMessage(node, message));
                }
                Action::Disconnect(node) => {
                    self.handle
                        .network_request(NetworkRequest::DisconnectWithPeer(node));
                }
            }
        }
    }
}

fn is_membership_frame(message: &WireMessage) -> bool {
    matches!(
        message,
        WireMessage::SubscribeUp
            | WireMessage::SubscribeDown
            | WireMessage::TagsPut { .. }
            | WireMessage::TagsDel { .. }
            | WireMessage::Ping
            | WireMessage::Pong
            | WireMessage::RegistryPut {
                key: RegistryKey::Node(_),
                ..
            }
            | WireMessage::RegistryDel {
                key: RegistryKey::Node(_),
            }
    )
}

/// Waits for the join deadline, if one is armed; pends forever otherwise.
/// The deadline disarms after firing so it is never polled again.
async fn wait_deadline(deadline: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match deadline {
        Some(sleep) => {
            sleep.as_mut().await;
            *deadline = None;
        }
        None => futures::future::pending::<()>().await,
    }
}
