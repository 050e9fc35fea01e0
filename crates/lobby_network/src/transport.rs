//! TCP transport: a long-lived accept loop and one-shot outbound sends.
//!
//! Inbound connections are read frame by frame until the peer disconnects or
//! misbehaves; decoded envelopes are forwarded into an mpsc channel. Every
//! outbound message opens a fresh connection, writes one frame, flushes and
//! closes.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::error::NetworkError;
use crate::message::Envelope;

/// An incoming event from the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// An envelope was received on an inbound connection.
    Message {
        from_addr: SocketAddr,
        envelope: Envelope,
    },
}

/// Bind the listener, trying each candidate port in turn.
pub async fn bind(host: IpAddr, candidates: &[u16]) -> Result<TcpListener, NetworkError> {
    for &port in candidates {
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => warn!("Port {port} unavailable, trying next: {e}"),
        }
    }
    Err(NetworkError::NoAvailablePort {
        attempts: candidates.len(),
    })
}

/// Public resolvers used as routing targets when detecting the local address.
/// A UDP `connect` picks a source address without sending anything.
const ROUTE_TARGET_V4: &str = "8.8.8.8:80";
const ROUTE_TARGET_V6: &str = "[2001:4860:4860::8888]:80";

/// Address of the interface that routes to the wider network, if any.
///
/// An IPv6 listener may be dual-stack, so IPv6 is tried first and IPv4 second.
/// An IPv4 listener only ever advertises an IPv4 address.
pub async fn detect_local_ip(bind_host: IpAddr) -> Option<IpAddr> {
    let families: &[(&str, &str)] = if bind_host.is_ipv6() {
        &[("[::]:0", ROUTE_TARGET_V6), ("0.0.0.0:0", ROUTE_TARGET_V4)]
    } else {
        &[("0.0.0.0:0", ROUTE_TARGET_V4)]
    };
    for (local, target) in families {
        match route_source(local, target).await {
            Ok(ip) if !ip.is_unspecified() => return Some(ip),
            Ok(_) => {}
            Err(e) => debug!("No route via {target}: {e}"),
        }
    }
    None
}

async fn route_source(local: &str, target: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

/// Run the accept loop until shutdown. The listener is dropped (and the port
/// released) when this returns.
pub async fn serve(
    listener: TcpListener,
    max_frame: usize,
    event_tx: mpsc::Sender<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr}");
    }

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        trace!("Inbound connection from {peer_addr}");
                        let event_tx = event_tx.clone();
                        tokio::spawn(read_connection(stream, peer_addr, max_frame, event_tx));
                    }
                    Err(e) => warn!("TCP accept failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                info!("Listener shutting down");
                break;
            }
        }
    }
}

/// Read frames from one inbound connection until EOF or a protocol fault.
async fn read_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    max_frame: usize,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        match codec::read_envelope(&mut stream, max_frame).await {
            Ok(Some(envelope)) => {
                let event = TransportEvent::Message {
                    from_addr: peer_addr,
                    envelope,
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                trace!("Peer {peer_addr} closed connection");
                break;
            }
            Err(NetworkError::FrameTooLarge { len, max }) => {
                warn!("Oversized frame from {peer_addr} ({len} > {max}), closing");
                break;
            }
            Err(e) => {
                warn!("Bad frame from {peer_addr}, closing: {e}");
                break;
            }
        }
    }
    let _ = stream.shutdown().await;
}

/// Open a connection to `host:port`, send one envelope and close.
///
/// The whole exchange is bounded by `timeout`.
pub async fn send_message(
    host: &str,
    port: u16,
    envelope: &Envelope,
    timeout: Duration,
    max_frame: usize,
) -> Result<(), NetworkError> {
    let frame = codec::encode(envelope, max_frame)?;
    let exchange = async {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| NetworkError::Transport(format!("Connect to {host}:{port} failed: {e}")))?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok::<(), NetworkError>(())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Send to {host}:{port} timed out");
            Err(NetworkError::Timeout(timeout))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
