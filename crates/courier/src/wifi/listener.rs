//! UDP listener for book requests
//!
//! Readers that want the advertised book send a datagram to the ack port.
//! The listener does not interpret it; every payload is handed to the
//! caller's handler as received.

use bytes::Bytes;
use common::{Error, Result};
use protocol::MAX_DATAGRAM_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Called once per received datagram, on the listener task
pub type PacketHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Background receive loop on a UDP port
pub struct AckListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl AckListener {
    /// Bind to `port` on all interfaces and start listening right away
    pub async fn bind(port: u16, handler: PacketHandler) -> Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), handler).await
    }

    pub async fn bind_addr(addr: SocketAddr, handler: PacketHandler) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("Failed to bind listener on {}: {}", addr, e)))?;
        let local_addr = socket.local_addr()?;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(listen(socket, handler, cancel.clone()));
        info!("Listening for book requests on {}", local_addr);

        Ok(Self {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the loop and release the socket
    ///
    /// Returns the fault that ended the loop early, if there was one.
    pub async fn stop_listener(&mut self) -> Result<()> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Other(format!("Listener task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for AckListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(socket: UdpSocket, handler: PacketHandler, cancel: CancellationToken) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    debug!("Received {} byte(s) from {}", n, from);
                    handler(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if cancel.is_cancelled() => {
                    debug!("Receive interrupted by stop: {}", e);
                    break;
                }
                Err(e) => {
                    error!("Book request listener failed: {}", e);
                    return Err(Error::Network(format!("Receive failed: {}", e)));
                }
            }
        }
    }

    debug!("Listener loop exited");
    Ok(())
}
