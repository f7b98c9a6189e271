//! LAN transport over TCP
//!
//! Advertising binds a listener; discovery reports the configured peer
//! addresses as found endpoints. Every frame is a big-endian `u32` length
//! followed by that many bytes. The connecting side opens with a hello frame
//! carrying its device name and the listening side answers with an accept or
//! reject frame.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ConnectionStatus, PeerId, Transport, TransportEvent, TransportEvents};
use crate::error::{Error, Result};

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const ACCEPT_FRAME: &[u8] = b"accept";
const REJECT_FRAME: &[u8] = b"reject";

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Transport(format!("frame of {} bytes is too large", payload.len())))?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Transport(format!("frame of {len} bytes exceeds limit")));
    }
    let mut buf = vec![0_u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

enum Pending {
    /// Remote device connected to our listener and sent its hello
    Inbound(TcpStream),
    /// We connected out and sent our hello
    Outbound(TcpStream),
}

struct Connection {
    writer: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

struct Inner {
    name: String,
    listen_addr: String,
    peers: Vec<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pending: DashMap<PeerId, Pending>,
    connections: DashMap<PeerId, Connection>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn register(self: &Arc<Self>, peer_id: PeerId, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, rx, peer_id.clone()));
        let reader = tokio::spawn(read_loop(Arc::clone(self), read_half, peer_id.clone()));
        self.connections.insert(
            peer_id.clone(),
            Connection { writer: tx, reader },
        );
        self.emit(TransportEvent::ConnectionResult {
            peer_id,
            status: ConnectionStatus::Ok,
        });
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>, peer_id: PeerId) {
    while let Some(payload) = rx.recv().await {
        if let Err(error) = write_frame(&mut writer, &payload).await {
            tracing::warn!(peer = %peer_id, "Failed to write frame: {error}");
            break;
        }
    }
    writer.shutdown().await.ok();
}

async fn read_loop(inner: Arc<Inner>, mut reader: OwnedReadHalf, peer_id: PeerId) {
    loop {
        match read_frame(&mut reader).await {
            Ok(payload) => inner.emit(TransportEvent::PayloadReceived {
                peer_id: peer_id.clone(),
                payload,
            }),
            Err(error) => {
                tracing::debug!(peer = %peer_id, "Connection closed: {error}");
                break;
            }
        }
    }
    if inner.connections.remove(&peer_id).is_some() {
        inner.emit(TransportEvent::Disconnected { peer_id });
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::warn!("Failed to accept connection: {error}");
                continue;
            }
        };
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            match read_frame(&mut stream).await {
                Ok(hello) => {
                    let name = String::from_utf8_lossy(&hello).to_string();
                    let peer_id = format!("{name}@{addr}");
                    inner.pending.insert(peer_id.clone(), Pending::Inbound(stream));
                    inner.emit(TransportEvent::ConnectionInitiated { peer_id, name });
                }
                Err(error) => tracing::warn!(%addr, "Peer sent no hello: {error}"),
            }
        });
    }
}

/// TCP transport for devices on the same network.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    pub fn new(
        name: impl Into<String>,
        listen_addr: impl Into<String>,
        peers: Vec<String>,
    ) -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            name: name.into(),
            listen_addr: listen_addr.into(),
            peers,
            events: tx,
            pending: DashMap::new(),
            connections: DashMap::new(),
            listener: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    fn take_pending(&self, peer_id: &str) -> Result<Pending> {
        self.inner
            .pending
            .remove(peer_id)
            .map(|(_, pending)| pending)
            .ok_or_else(|| Error::Transport(format!("no pending connection with {peer_id}")))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_name(&self) -> &str {
        &self.inner.name
    }

    async fn start_advertising(&self, _service_id: &str) -> Result<()> {
        if self.inner.listener.lock().is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.inner.listen_addr)
            .await
            .map_err(|error| {
                Error::Transport(format!("bind {} failed: {error}", self.inner.listen_addr))
            })?;
        tracing::info!(addr = %self.inner.listen_addr, "Listening for peers");
        let handle = tokio::spawn(accept_loop(Arc::clone(&self.inner), listener));
        *self.inner.listener.lock() = Some(handle);
        Ok(())
    }

    async fn stop_advertising(&self) {
        if let Some(handle) = self.inner.listener.lock().take() {
            handle.abort();
        }
    }

    async fn start_discovery(&self, _service_id: &str) -> Result<()> {
        for peer in &self.inner.peers {
            self.inner.emit(TransportEvent::EndpointFound {
                peer_id: peer.clone(),
                name: peer.clone(),
            });
        }
        Ok(())
    }

    async fn stop_discovery(&self) {}

    async fn request_connection(&self, peer_id: &str) -> Result<()> {
        if self.inner.connections.contains_key(peer_id) || self.inner.pending.contains_key(peer_id)
        {
            return Err(Error::Transport(format!(
                "connection to {peer_id} already exists"
            )));
        }
        let mut stream = TcpStream::connect(peer_id)
            .await
            .map_err(|error| Error::Transport(format!("connect {peer_id} failed: {error}")))?;
        write_frame(&mut stream, self.inner.name.as_bytes()).await?;
        self.inner
            .pending
            .insert(peer_id.to_string(), Pending::Outbound(stream));
        self.inner.emit(TransportEvent::ConnectionInitiated {
            peer_id: peer_id.to_string(),
            name: peer_id.to_string(),
        });
        Ok(())
    }

    async fn accept_connection(&self, peer_id: &str) -> Result<()> {
        match self.take_pending(peer_id)? {
            Pending::Inbound(mut stream) => {
                write_frame(&mut stream, ACCEPT_FRAME).await?;
                self.inner.register(peer_id.to_string(), stream);
            }
            Pending::Outbound(mut stream) => {
                let inner = Arc::clone(&self.inner);
                let peer_id = peer_id.to_string();
                tokio::spawn(async move {
                    match read_frame(&mut stream).await {
                        Ok(answer) if answer.as_ref() == ACCEPT_FRAME => {
                            inner.register(peer_id, stream);
                        }
                        Ok(_) => inner.emit(TransportEvent::ConnectionResult {
                            peer_id,
                            status: ConnectionStatus::Rejected,
                        }),
                        Err(error) => inner.emit(TransportEvent::ConnectionResult {
                            peer_id,
                            status: ConnectionStatus::Error(error.to_string()),
                        }),
                    }
                });
            }
        }
        Ok(())
    }

    async fn reject_connection(&self, peer_id: &str) -> Result<()> {
        if let Pending::Inbound(mut stream) = self.take_pending(peer_id)? {
            write_frame(&mut stream, REJECT_FRAME).await.ok();
        }
        self.inner.emit(TransportEvent::ConnectionResult {
            peer_id: peer_id.to_string(),
            status: ConnectionStatus::Rejected,
        });
        Ok(())
    }

    async fn send_payload(&self, peer_id: &str, payload: Bytes) -> Result<()> {
        let total_bytes = payload.len() as u64;
        let connection = self
            .inner
            .connections
            .get(peer_id)
            .ok_or_else(|| Error::Transport(format!("not connected to {peer_id}")))?;
        connection
            .writer
            .send(payload)
            .map_err(|_| Error::Transport(format!("connection to {peer_id} is closed")))?;
        drop(connection);
        self.inner.emit(TransportEvent::PayloadProgress {
            peer_id: peer_id.to_string(),
            bytes_transferred: total_bytes,
            total_bytes,
        });
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) {
        self.inner.pending.remove(peer_id);
        if let Some((_, connection)) = self.inner.connections.remove(peer_id) {
            connection.reader.abort();
        }
    }

    async fn disconnect_all(&self) {
        self.inner.pending.clear();
        let peers: Vec<PeerId> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for peer in peers {
            self.disconnect(&peer).await;
        }
    }
}
