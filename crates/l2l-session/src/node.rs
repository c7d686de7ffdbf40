//! SessionNode: TCP server and client for l2l sessions.
//!
//! A [`SessionNode`] binds a local TCP listener and accepts connections from
//! other sessions. It also connects outward to known peers. Each connection
//! starts with a hello exchange announcing both session ids, then carries
//! requests and responses in both directions.
//!
//! Outgoing requests are correlated with their responses by message id. When
//! a connection drops, every request still waiting on it fails with
//! [`SessionError::ConnectionClosed`].

use crate::action::{ActionTable, Answer, InboundMessage};
use crate::error::SessionError;
use crate::message::*;
use crate::registry::{PeerEntry, PeerRegistry, PeerState};
use crate::session::Session;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Configuration for a SessionNode.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// This node's session id.
    pub session_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A request waiting for its response.
struct PendingRequest {
    /// Session the request went to.
    peer: String,
    tx: oneshot::Sender<Result<Answer, SessionError>>,
}

/// The local network session. Listens for connections and connects to peers.
pub struct SessionNode {
    config: NodeConfig,
    registry: PeerRegistry,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    actions: ActionTable,
    /// Outgoing message queue per connected session.
    connections: DashMap<String, mpsc::UnboundedSender<WireMessage>>,
    pending: DashMap<String, PendingRequest>,
    online: watch::Sender<bool>,
}

impl SessionNode {
    /// Create and start listening on the configured address.
    pub async fn start(
        config: NodeConfig,
        registry: PeerRegistry,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), SessionError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "l2l: listening on {} (session={})",
            local_addr, config.session_id
        );

        let (online, _) = watch::channel(true);
        let node = Arc::new(Self {
            config,
            registry,
            local_addr,
            actions: ActionTable::new(),
            connections: DashMap::new(),
            pending: DashMap::new(),
            online,
        });

        let accept_handle = tokio::spawn(Self::accept_loop(listener, Arc::clone(&node)));

        Ok((node, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the peer registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Go offline and drop all connections.
    pub fn shutdown(&self) {
        self.online.send_replace(false);
        self.connections.clear();
        info!(session = %self.config.session_id, "l2l: session shut down");
    }

    /// Connect to a remote session and perform the hello exchange.
    ///
    /// Returns the session id the peer announced.
    pub async fn connect_to_peer(self: &Arc<Self>, addr: SocketAddr) -> Result<String, SessionError> {
        info!("l2l: connecting to peer at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = WireMessage {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Hello {
                session_id: self.config.session_id.clone(),
                protocol_version: PROTOCOL_VERSION,
            },
        };
        write_message(&mut writer, &hello).await?;

        let response = read_message(&mut reader).await?;
        let (peer_id, protocol_version) = match response.kind {
            WireMessageKind::HelloAck {
                session_id,
                protocol_version,
            } => (session_id, protocol_version),
            WireMessageKind::Response(WireResponse { error: Some(e), .. }) => {
                return Err(SessionError::HandshakeFailed(e));
            }
            _ => {
                return Err(SessionError::HandshakeFailed(
                    "Unexpected response to hello".to_string(),
                ));
            }
        };
        if protocol_version != PROTOCOL_VERSION {
            return Err(SessionError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: protocol_version,
            });
        }

        info!("l2l: connected to session {} at {}", peer_id, addr);
        self.register_peer(&peer_id, addr, protocol_version);
        self.spawn_connection(peer_id.clone(), reader, writer);
        Ok(peer_id)
    }

    /// Internal accept loop, run in a spawned task.
    async fn accept_loop(listener: TcpListener, node: Arc<SessionNode>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("l2l: accepted connection from {}", addr);
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_inbound(stream, addr).await {
                            debug!("l2l: inbound connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("l2l: accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle a single inbound connection: hello exchange, then message loop.
    async fn handle_inbound(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), SessionError> {
        let (mut reader, mut writer) = stream.into_split();

        let msg = read_message(&mut reader).await?;
        let (peer_id, protocol_version) = match msg.kind {
            WireMessageKind::Hello {
                session_id,
                protocol_version,
            } => (session_id, protocol_version),
            // Anything but a hello is refused before the connection is usable.
            _ => {
                warn!("l2l: rejected message from {} before hello", addr);
                let refusal = WireMessage {
                    id: msg.id,
                    kind: WireMessageKind::Response(WireResponse {
                        action: String::new(),
                        sender: self.config.session_id.clone(),
                        data: Value::Null,
                        error: Some("hello required before requests".to_string()),
                    }),
                };
                write_message(&mut writer, &refusal).await?;
                return Err(SessionError::HandshakeFailed(
                    "Request sent before hello".into(),
                ));
            }
        };

        let ack = WireMessage {
            id: msg.id,
            kind: WireMessageKind::HelloAck {
                session_id: self.config.session_id.clone(),
                protocol_version: PROTOCOL_VERSION,
            },
        };
        write_message(&mut writer, &ack).await?;

        if protocol_version != PROTOCOL_VERSION {
            return Err(SessionError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: protocol_version,
            });
        }

        info!("l2l: session {} connected from {}", peer_id, addr);
        self.register_peer(&peer_id, addr, protocol_version);
        self.spawn_connection(peer_id, reader, writer);
        Ok(())
    }

    fn register_peer(&self, peer_id: &str, address: SocketAddr, protocol_version: u32) {
        self.registry.add_peer(PeerEntry {
            session_id: peer_id.to_string(),
            address,
            state: PeerState::Connected,
            connected_at: chrono::Utc::now(),
            protocol_version,
        });
    }

    /// Start the writer and reader tasks of an established connection.
    fn spawn_connection(
        self: &Arc<Self>,
        peer_id: String,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
        self.connections.insert(peer_id.clone(), tx.clone());

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write_message(&mut writer, &msg).await {
                    debug!("l2l: write failed: {}", e);
                    break;
                }
            }
        });

        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = node.connection_loop(&mut reader, &peer_id, &tx).await {
                debug!("l2l: connection with {} ended: {}", peer_id, e);
            }
            node.drop_connection(&peer_id, &tx);
        });
    }

    /// Read loop for an established connection.
    async fn connection_loop(
        self: &Arc<Self>,
        reader: &mut OwnedReadHalf,
        peer_id: &str,
        reply: &mpsc::UnboundedSender<WireMessage>,
    ) -> Result<(), SessionError> {
        loop {
            let msg = match read_message(reader).await {
                Ok(m) => m,
                Err(SessionError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            match msg.kind {
                // Answer on a separate task: handlers may issue requests themselves.
                WireMessageKind::Request(req) => {
                    let node = Arc::clone(self);
                    let reply = reply.clone();
                    let id = msg.id;
                    tokio::spawn(async move {
                        let response = node.answer_request(id, req).await;
                        if reply.send(response).is_err() {
                            debug!("l2l: connection closed before answer was sent");
                        }
                    });
                }
                WireMessageKind::Response(resp) => self.complete(msg.id, resp),
                WireMessageKind::Hello { .. } | WireMessageKind::HelloAck { .. } => {
                    warn!("l2l: unexpected hello from {} ({})", peer_id, msg.id);
                }
            }
        }
    }

    async fn answer_request(&self, id: String, req: WireRequest) -> WireMessage {
        let inbound = InboundMessage {
            id: id.clone(),
            action: req.action,
            sender: req.sender,
            data: req.data,
        };
        let answer = self.actions.dispatch(inbound, &self.config.session_id).await;
        WireMessage {
            id,
            kind: WireMessageKind::Response(WireResponse {
                action: answer.action,
                sender: answer.sender,
                data: answer.data,
                error: answer.error,
            }),
        }
    }

    /// Resolve the pending request a response belongs to.
    fn complete(&self, id: String, resp: WireResponse) {
        let Some((_, pending)) = self.pending.remove(&id) else {
            debug!("l2l: response {} matches no pending request", id);
            return;
        };
        let answer = Answer {
            action: resp.action,
            sender: resp.sender,
            data: resp.data,
            error: resp.error,
        };
        // Receiver may have been dropped by a caller that gave up.
        let _ = pending.tx.send(Ok(answer));
    }

    /// Forget a closed connection and fail the requests still waiting on it.
    fn drop_connection(&self, peer_id: &str, tx: &mpsc::UnboundedSender<WireMessage>) {
        self.connections
            .remove_if(peer_id, |_, current| current.same_channel(tx));
        self.registry.mark_disconnected(peer_id);

        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.value().peer == peer_id)
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(SessionError::ConnectionClosed));
            }
        }
        info!("l2l: session {} disconnected", peer_id);
    }
}

#[async_trait]
impl Session for SessionNode {
    fn session_id(&self) -> &str {
        &self.config.session_id
    }

    fn online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    fn actions(&self) -> &ActionTable {
        &self.actions
    }

    async fn send_to(
        &self,
        target: &str,
        action: &str,
        data: Value,
    ) -> Result<Answer, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();

        if target == self.config.session_id {
            let msg = InboundMessage {
                id,
                action: action.to_string(),
                sender: self.config.session_id.clone(),
                data,
            };
            return Ok(self.actions.dispatch(msg, &self.config.session_id).await);
        }

        let tx = self
            .connections
            .get(target)
            .map(|c| c.value().clone())
            .ok_or_else(|| SessionError::UnknownPeer(target.to_string()))?;

        let (answer_tx, answer_rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                peer: target.to_string(),
                tx: answer_tx,
            },
        );

        let msg = WireMessage {
            id: id.clone(),
            kind: WireMessageKind::Request(WireRequest {
                action: action.to_string(),
                sender: self.config.session_id.clone(),
                target: target.to_string(),
                data,
            }),
        };
        if tx.send(msg).is_err() {
            self.pending.remove(&id);
            return Err(SessionError::ConnectionClosed);
        }

        answer_rx.await.unwrap_or(Err(SessionError::ConnectionClosed))
    }
}

/// Write a framed message (4-byte length + JSON) to a TCP stream.
pub async fn write_message(
    writer: &mut OwnedWriteHalf,
    msg: &WireMessage,
) -> Result<(), SessionError> {
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON) from a TCP stream.
pub async fn read_message(reader: &mut OwnedReadHalf) -> Result<WireMessage, SessionError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SessionError::ConnectionClosed);
        }
        Err(e) => return Err(SessionError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(SessionError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}
