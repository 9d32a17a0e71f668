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

use anyhow::{bail, ensure};
use futures::{channel::mpsc, future, prelude::*};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use std::{
    collections::HashMap,
    net::SocketAddr,
    ops,
    sync::{Arc, RwLock},
    time::Duration,
};

use skitter::NodeName;

use crate::{
    config::NetworkConfiguration,
    events::{
        codec::FrameCodec,
        retries::{retry_future, FixedInterval},
    },
    messages::{Hello, WireMessage},
    stores::NodeRegistry,
};

/// Network-side events handed to the node core.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum NetworkEvent {
    /// A connection completed its handshake.
    PeerConnected {
        /// Name the peer advertised.
        node: NodeName,
        /// Address of the remote end of the socket.
        address: String,
        /// The peer's handshake frame.
        hello: Hello,
    },
    /// A frame arrived from a connected peer.
    MessageReceived {
        /// The peer the frame came from.
        node: NodeName,
        /// The decoded frame.
        message: WireMessage,
    },
    /// A peer connection was lost or dropped.
    PeerDisconnected(NodeName),
    /// An outgoing connection could not be established.
    UnableToConnect {
        /// The address that was dialled.
        address: String,
    },
}

/// Requests the node core hands to the network part.
#[derive(Debug)]
pub enum NetworkRequest {
    /// Sends a frame to a peer, connecting on demand.
    SendMessage(NodeName, WireMessage),
    /// Dials a peer by address.
    ConnectPeer(String),
    /// Drops the connection with a peer.
    DisconnectWithPeer(NodeName),
}

#[derive(Debug)]
struct ConnectionPoolEntry {
    sender: mpsc::UnboundedSender<WireMessage>,
    // Connection ID assigned to the connection during instantiation. This ID
    // is unique among all connections and is used in `remove()` to figure
    // out whether it would make sense to remove a connection, or the request
    // has been obsoleted.
    id: u64,
}

#[derive(Clone, Debug)]
struct SharedConnectionPool {
    inner: Arc<RwLock<ConnectionPool>>,
}

impl SharedConnectionPool {
    fn new(our_name: NodeName) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnectionPool {
                peers: HashMap::new(),
                our_name,
                next_connection_id: 0,
            })),
        }
    }

    fn read(&self) -> impl ops::Deref<Target = ConnectionPool> + '_ {
        self.inner.read().unwrap()
    }

    fn write(&self) -> impl ops::DerefMut<Target = ConnectionPool> + '_ {
        self.inner.write().unwrap()
    }

    fn send_message(&self, peer: &NodeName, message: WireMessage) -> bool {
        let maybe_peer = {
            let peers = &self.read().peers;
            peers.get(peer).map(|entry| (entry.sender.clone(), entry.id))
        };

        if let Some((sender, connection_id)) = maybe_peer {
            if sender.unbounded_send(message).is_err() {
                log::warn!("Cannot send message to peer {}", peer);
                self.write().remove(peer, Some(connection_id));
            }
            true
        } else {
            false
        }
    }

    fn create_connection(
        &self,
        peer: NodeName,
        socket: Framed<TcpStream, FrameCodec>,
    ) -> Option<Connection> {
        let mut guard = self.write();

        if guard.contains(&peer) && Self::ignore_connection(&guard.our_name, &peer) {
            log::info!("Ignoring connection to {} per priority rules", peer);
            return None;
        }

        let (receiver_rx, connection_id) = guard.add(peer.clone());
        Some(Connection {
            socket,
            receiver_rx,
            node: peer,
            id: connection_id,
        })
    }

    /// Provides a complete, anti-symmetric relation among two peers bound in
    /// a connection. This is used by the peers to decide which one of two
    /// connections is left alive when the peers connect to each other
    /// simultaneously.
    fn ignore_connection(our_name: &NodeName, their_name: &NodeName) -> bool {
        our_name < their_name
    }
}

#[derive(Debug)]
struct ConnectionPool {
    peers: HashMap<NodeName, ConnectionPoolEntry>,
    our_name: NodeName,
    next_connection_id: u64,
}

impl ConnectionPool {
    fn add(&mut self, peer: NodeName) -> (mpsc::UnboundedReceiver<WireMessage>, u64) {
        let id = self.next_connection_id;
        let (sender, receiver_rx) = mpsc::unbounded();
        self.next_connection_id += 1;
        self.peers.insert(peer, ConnectionPoolEntry { sender, id });
        (receiver_rx, id)
    }

    fn contains(&self, peer: &NodeName) -> bool {
        self.peers.get(peer).is_some()
    }

    /// Drops the connection to a peer. The request can be optionally
    /// filtered by the connection ID in order to avoid issuing obsolete
    /// requests.
    fn remove(&mut self, peer: &NodeName, connection_id: Option<u64>) -> bool {
        if let Some(entry) = self.peers.get(peer) {
            if connection_id.map_or(true, |id| id == entry.id) {
                self.peers.remove(peer);
                return true;
            }
        }
        false
    }
}

struct Connection {
    socket: Framed<TcpStream, FrameCodec>,
    receiver_rx: mpsc::UnboundedReceiver<WireMessage>,
    node: NodeName,
    id: u64,
}

/// The network half of a node: a listener, a connection pool, and the task
/// translating [`NetworkRequest`]s into socket traffic.
#[derive(Debug)]
pub struct NetworkPart {
    /// Handshake frame sent on every connection.
    pub our_hello: Hello,
    /// Address the listener binds to.
    pub listen_address: SocketAddr,
    /// Transport tunables.
    pub network_config: NetworkConfiguration,
    /// Requests from the node core.
    pub network_requests: mpsc::UnboundedReceiver<NetworkRequest>,
    /// Events towards the node core.
    pub network_tx: mpsc::UnboundedSender<NetworkEvent>,
    /// Used to resolve node names to addresses for on-demand connects.
    pub address_book: NodeRegistry,
}

impl NetworkPart {
    /// Runs the listener and the request handler until either finishes.
    pub async fn run(self) {
        let handler = NetworkHandler {
            listen_address: self.listen_address,
            pool: SharedConnectionPool::new(self.our_hello.node.clone()),
            network_config: self.network_config,
            network_tx: self.network_tx,
            our_hello: self.our_hello,
            address_book: self.address_book,
        };

        let listener = handler.clone().listener().unwrap_or_else(|e| {
            log::error!("Listening to incoming peer connections failed: {}", e);
        });
        futures::pin_mut!(listener);
        let request_handler = handler.handle_requests(self.network_requests);
        futures::pin_mut!(request_handler);

        future::select(listener, request_handler).await;
    }
}

#[derive(Clone)]
struct NetworkHandler {
    listen_address: SocketAddr,
    pool: SharedConnectionPool,
    network_config: NetworkConfiguration,
    network_tx: mpsc::UnboundedSender<NetworkEvent>,
    our_hello: Hello,
    address_book: NodeRegistry,
}

impl NetworkHandler {
    async fn listener(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_address).await?;

        loop {
            let (socket, peer_address) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("Accepting an incoming connection failed: {}", err);
                    continue;
                }
            };

            let this = self.clone();
            let task = async move {
                let (socket, hello) = this.responder_handshake(socket).await?;
                let peer = hello.node.clone();
                let maybe_connection = this.pool.create_connection(peer, socket);
                if let Some(connection) = maybe_connection {
                    this.handle_connection(connection, hello, peer_address.to_string())
                        .await
                } else {
                    Ok(())
                }
            };
            tokio::spawn(task.unwrap_or_else(|err: anyhow::Error| log::warn!("{}", err)));
        }
    }

    /// Dials a peer, performs the handshake and registers the connection.
    /// The connection processing is spawned onto the runtime.
    async fn connect(&self, address: String) -> anyhow::Result<()> {
        let retry_timeout = Duration::from_millis(self.network_config.connect_retry_timeout);
        let max_retries = self.network_config.connect_max_retries;

        let target = address.clone();
        let socket = retry_future(FixedInterval::new(retry_timeout).take(max_retries), || {
            TcpStream::connect(target.clone())
        })
        .await?;
        self.configure_socket(&socket)?;

        let peer_address = socket
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| address.clone());
        let (socket, hello) = self.initiator_handshake(socket).await?;
        let peer = hello.node.clone();
        if let Some(connection) = self.pool.create_connection(peer, socket) {
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_connection(connection, hello, peer_address)
                    .await
                    .unwrap_or_else(|err| log::warn!("{}", err));
            });
        }
        Ok(())
    }

    fn configure_socket(&self, socket: &TcpStream) -> anyhow::Result<()> {
        socket.set_nodelay(self.network_config.tcp_nodelay)?;
        Ok(())
    }

    async fn initiator_handshake(
        &self,
        socket: TcpStream,
    ) -> anyhow::Result<(Framed<TcpStream, FrameCodec>, Hello)> {
        let codec = FrameCodec::new(self.network_config.max_frame_len);
        let mut framed = Framed::new(socket, codec);
        framed
            .send(WireMessage::Hello(self.our_hello.clone()))
            .await?;
        let hello = Self::expect_hello(&mut framed, &self.our_hello.cookie).await?;
        Ok((framed, hello))
    }

    async fn responder_handshake(
        &self,
        socket: TcpStream,
    ) -> anyhow::Result<(Framed<TcpStream, FrameCodec>, Hello)> {
        self.configure_socket(&socket)?;
        let codec = FrameCodec::new(self.network_config.max_frame_len);
        let mut framed = Framed::new(socket, codec);
        let hello = Self::expect_hello(&mut framed, &self.our_hello.cookie).await?;
        framed
            .send(WireMessage::Hello(self.our_hello.clone()))
            .await?;
        Ok((framed, hello))
    }

    async fn expect_hello(
        framed: &mut Framed<TcpStream, FrameCodec>,
        cookie: &str,
    ) -> anyhow::Result<Hello> {
        match framed.try_next().await? {
            Some(WireMessage::Hello(hello)) => {
                ensure!(
                    hello.cookie == cookie,
                    "Rejecting connection with peer {}: cookie mismatch",
                    hello.node
                );
                Ok(hello)
            }
            Some(other) => bail!(
                "First frame from a remote peer is not `Hello`, got={:?}",
                other
            ),
            None => bail!("Connection closed during handshake"),
        }
    }

    async fn handle_connection(
        &self,
        connection: Connection,
        hello: Hello,
        peer_address: String,
    ) -> anyhow::Result<()> {
        log::trace!("Established connection with peer {}", connection.node);

        self.network_tx
            .unbounded_send(NetworkEvent::PeerConnected {
                node: connection.node.clone(),
                address: peer_address,
                hello,
            })
            .ok();
        Self::process_messages(self.pool.clone(), connection, self.network_tx.clone()).await;
        Ok(())
    }

    async fn process_messages(
        pool: SharedConnectionPool,
        connection: Connection,
        network_tx: mpsc::UnboundedSender<NetworkEvent>,
    ) {
        let (sink, mut stream) = connection.socket.split();
        let node = connection.node;
        let connection_id = connection.id;

        // Processing of incoming frames.
        let incoming_node = node.clone();
        let incoming_tx = network_tx.clone();
        let incoming = async move {
            loop {
                match stream.try_next().await {
                    Ok(Some(message)) => {
                        let event = NetworkEvent::MessageReceived {
                            node: incoming_node.clone(),
                            message,
                        };
                        if incoming_tx.unbounded_send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::info!(
                            "Connection with peer {} terminated: {}",
                            incoming_node,
                            err
                        );
                        break;
                    }
                }
            }
        };
        futures::pin_mut!(incoming);

        // Processing of outgoing frames.
        let outgoing = connection
            .receiver_rx
            .map(Ok)
            .forward(sink)
            .map(|result| {
                if let Err(err) = result {
                    log::info!("Sending to a peer failed: {}", err);
                }
            });
        futures::pin_mut!(outgoing);

        // Whichever half terminates first tears down the connection.
        future::select(incoming, outgoing).await;

        if pool.write().remove(&node, Some(connection_id)) {
            network_tx
                .unbounded_send(NetworkEvent::PeerDisconnected(node))
                .ok();
        }
    }

    async fn handle_requests(self, mut receiver: mpsc::UnboundedReceiver<NetworkRequest>) {
        while let Some(request) = receiver.next().await {
            match request {
                NetworkRequest::SendMessage(node, message) => {
                    // Sends to a connected peer stay on this task, which
                    // preserves ordering per sender/receiver pair. Only a
                    // missing connection defers to a dialling task.
                    if !self.pool.send_message(&node, message.clone()) {
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.dial_and_send(node, message).await;
                        });
                    }
                }

                NetworkRequest::ConnectPeer(address) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.connect(address.clone()).await {
                            log::warn!("Connecting to {} failed: {}", address, err);
                            this.network_tx
                                .unbounded_send(NetworkEvent::UnableToConnect { address })
                                .ok();
                        }
                    });
                }

                NetworkRequest::DisconnectWithPeer(peer) => {
                    let disconnected = self.pool.write().remove(&peer, None);
                    if disconnected {
                        self.network_tx
                            .unbounded_send(NetworkEvent::PeerDisconnected(peer))
                            .ok();
                    }
                }
            }
        }
    }

    async fn dial_and_send(&self, node: NodeName, message: WireMessage) {
        // No live connection; dial the peer through its registry address.
        let address = match self.address_book.get(&node) {
            Some(record) => record.address,
            None => {
                log::warn!("Dropping message for unknown peer {}", node);
                return;
            }
        };
        if let Err(err) = self.connect(address).await {
            log::warn!("Cannot reach peer {}: {}", node, err);
            return;
        }
        if !self.pool.send_message(&node, message) {
            log::warn!("Dropping message for peer {}: connection not usable", node);
        }
    }
}
