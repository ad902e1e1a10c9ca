//! TCP transport between the consensus engine and the application.
//!
//! The engine opens several sockets (consensus, mempool, query, snapshot)
//! against the same listener. Each accepted socket gets its own read task,
//! keyed by the remote `ip:port`. Every decoded request is tagged with a
//! fresh request id before it is handed to the application, and the id is
//! remembered against the peer key so the response goes back out on the
//! socket that carried the request.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use prost::Message;
use tessera_core::{AbciRequest, AbciResponse};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::error::AbciError;
use crate::translator::{decode_request, encode_response};
use crate::wire;

/// Identifies one connected socket (`ip:port` of the remote end)
pub type PeerKey = String;

type PeerWriter = Arc<Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>>;

/// Lifecycle of a [`TcpChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ChannelState {
    fn name(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnecting => "disconnecting",
        }
    }

    fn can_move_to(&self, next: ChannelState) -> bool {
        matches!(
            (self, next),
            (ChannelState::Disconnected, ChannelState::Connecting)
                | (ChannelState::Connecting, ChannelState::Connected)
                | (ChannelState::Connecting, ChannelState::Disconnected)
                | (ChannelState::Connected, ChannelState::Disconnecting)
                | (ChannelState::Disconnecting, ChannelState::Disconnected)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request received from the engine, tagged for routing the reply
#[derive(Debug, Clone)]
pub struct Envelope {
    pub request_id: u64,
    pub peer: PeerKey,
    pub request: AbciRequest,
}

/// Shared routing tables, owned jointly by the channel and its peer tasks
#[derive(Default)]
struct Routes {
    peers: Mutex<HashMap<PeerKey, PeerWriter>>,
    in_flight: Mutex<HashMap<u64, PeerKey>>,
    next_request_id: AtomicU64,
}

impl Routes {
    async fn register(&self, peer: &PeerKey) -> u64 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight.lock().await.insert(id, peer.clone());
        id
    }

    async fn forget_peer(&self, peer: &PeerKey) {
        self.peers.lock().await.remove(peer);
        self.in_flight.lock().await.retain(|_, owner| owner != peer);
    }

    async fn clear(&self) {
        self.peers.lock().await.clear();
        self.in_flight.lock().await.clear();
    }
}

/// Listening side of the ABCI socket protocol
pub struct TcpChannel {
    listen_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    state: ChannelState,
    routes: Arc<Routes>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpChannel {
    pub fn new(listen_addr: SocketAddr) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        TcpChannel {
            listen_addr,
            local_addr: None,
            state: ChannelState::Disconnected,
            routes: Arc::new(Routes::default()),
            inbound_tx,
            inbound_rx,
            cancel: CancellationToken::new(),
            accept_task: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Address actually bound, once connected
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn peer_count(&self) -> usize {
        self.routes.peers.lock().await.len()
    }

    fn transition(&mut self, next: ChannelState) -> Result<(), AbciError> {
        if !self.state.can_move_to(next) {
            return Err(AbciError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        debug!(from = %self.state, to = %next, "ABCI channel state change");
        self.state = next;
        Ok(())
    }

    /// Bind the listener and start accepting engine connections
    pub async fn connect(&mut self) -> Result<SocketAddr, AbciError> {
        self.transition(ChannelState::Connecting)?;

        let listener = match TcpListener::bind(self.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.transition(ChannelState::Disconnected)?;
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        self.cancel = CancellationToken::new();

        let routes = Arc::clone(&self.routes);
        let inbound = self.inbound_tx.clone();
        let cancel = self.cancel.clone();
        self.accept_task = Some(tokio::spawn(accept_loop(listener, routes, inbound, cancel)));

        self.transition(ChannelState::Connected)?;
        info!("ABCI channel listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Next request from any peer, in arrival order per socket
    pub async fn receive(&mut self) -> Option<Envelope> {
        self.inbound_rx.recv().await
    }

    /// Write `response` back to the socket that sent request `request_id`
    pub async fn send(&self, request_id: u64, response: AbciResponse) -> Result<(), AbciError> {
        let peer = self
            .routes
            .in_flight
            .lock()
            .await
            .remove(&request_id)
            .ok_or(AbciError::UnknownRequest(request_id))?;

        let writer = self
            .routes
            .peers
            .lock()
            .await
            .get(&peer)
            .cloned()
            .ok_or_else(|| AbciError::PeerGone(peer.clone()))?;

        let kind = response.kind();
        let message: wire::Response = encode_response(response);
        writer.lock().await.send(message).await?;
        debug!(request_id, %peer, kind, "sent ABCI response");
        Ok(())
    }

    /// Stop accepting, cancel every peer read loop and drop routing state
    pub async fn disconnect(&mut self) -> Result<(), AbciError> {
        self.transition(ChannelState::Disconnecting)?;
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("ABCI accept task ended abnormally: {}", e);
            }
        }
        self.routes.clear().await;
        while self.inbound_rx.try_recv().is_ok() {}
        self.local_addr = None;
        self.transition(ChannelState::Disconnected)?;
        info!("ABCI channel disconnected");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    routes: Arc<Routes>,
    inbound: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = addr.to_string();
                    info!(%peer, "consensus engine connected");
                    let reader = attach_peer(stream, &peer, &routes).await;
                    readers.spawn(read_loop(
                        reader,
                        peer,
                        Arc::clone(&routes),
                        inbound.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    error!("failed to accept ABCI connection: {}", e);
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
    while readers.join_next().await.is_some() {}
}

async fn attach_peer(
    stream: TcpStream,
    peer: &PeerKey,
    routes: &Routes,
) -> FramedRead<OwnedReadHalf, FrameCodec> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "could not set TCP_NODELAY: {}", e);
    }
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(FramedWrite::new(write_half, FrameCodec)));
    routes.peers.lock().await.insert(peer.clone(), writer);
    FramedRead::new(read_half, FrameCodec)
}

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    peer: PeerKey,
    routes: Arc<Routes>,
    inbound: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => frame,
        };

        let bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                error!(%peer, "unrecoverable framing error, dropping connection: {}", e);
                break;
            }
            None => {
                info!(%peer, "consensus engine closed the connection");
                break;
            }
        };

        let message = match wire::Request::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, "skipping undecodable ABCI message: {}", e);
                continue;
            }
        };

        let request = match decode_request(message) {
            Ok(request) => request,
            Err(_) => {
                warn!(%peer, "received a request of unknown kind, no response will be sent");
                continue;
            }
        };

        let request_id = routes.register(&peer).await;
        debug!(request_id, %peer, kind = request.kind(), "received ABCI request");
        let envelope = Envelope {
            request_id,
            peer: peer.clone(),
            request,
        };
        if inbound.send(envelope).is_err() {
            break;
        }
    }
    routes.forget_peer(&peer).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use ChannelState::*;
        assert!(Disconnected.can_move_to(Connecting));
        assert!(Connecting.can_move_to(Connected));
        assert!(Connected.can_move_to(Disconnecting));
        assert!(Disconnecting.can_move_to(Disconnected));
        assert!(!Disconnected.can_move_to(Connected));
        assert!(!Connected.can_move_to(Connecting));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let mut channel = TcpChannel::new("127.0.0.1:0".parse().unwrap());
        let addr = channel.connect().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(channel.state(), ChannelState::Connected);
        assert!(channel.connect().await.is_err());

        channel.disconnect().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_send_unknown_request() {
        let mut channel = TcpChannel::new("127.0.0.1:0".parse().unwrap());
        channel.connect().await.unwrap();
        let result = channel.send(99, AbciResponse::Flush).await;
        assert!(matches!(result, Err(AbciError::UnknownRequest(99))));
        channel.disconnect().await.unwrap();
    }
}
