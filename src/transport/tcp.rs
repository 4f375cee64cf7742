//! TCP transport serving one client.

use crate::error::{Result, VoxError};
use crate::pipeline::stop::StopFlag;
use crate::transport::AudioTransport;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Listens on an address and streams raw PCM to the first client that
/// connects.
pub struct TcpTransport {
    listener: TcpListener,
    client: Option<TcpStream>,
}

impl TcpTransport {
    pub fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).map_err(|e| VoxError::Transport {
            message: format!("cannot listen on {address}: {e}"),
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client: None,
        })
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl AudioTransport for TcpTransport {
    fn ready(&mut self, stop: &StopFlag, poll_interval: Duration) -> Result<bool> {
        if self.client.is_some() {
            return Ok(true);
        }
        tracing::info!(address = %self.local_addr()?, "waiting for audio client");
        while !stop.is_set() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    tracing::info!(%peer, "audio client connected");
                    self.client = Some(stream);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    stop.wait_timeout(poll_interval);
                }
                Err(e) => {
                    return Err(VoxError::Transport {
                        message: format!("accept failed: {e}"),
                    });
                }
            }
        }
        Ok(false)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let client = self.client.as_mut().ok_or_else(|| VoxError::Transport {
            message: "no client connected".to_string(),
        })?;
        client.write_all(bytes).map_err(|e| VoxError::Transport {
            message: format!("client write failed: {e}"),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            match client.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
