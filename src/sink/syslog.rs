//! Best-effort UDP log sink.

use std::net::{SocketAddr, UdpSocket};

use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::sink::LogSink;

/// Sends each log message as one UDP datagram. Nothing is buffered or retried.
#[derive(Debug)]
pub struct SyslogSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl SyslogSink {
    /// Resolves `host:port` and binds an ephemeral local socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be resolved or the socket cannot be
    /// bound.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::Config {
                message: format!("cannot resolve syslog host {host}"),
            })?;
        let socket = bind_for(target)?;
        tracing::debug!("syslog datagrams go to {}", target);
        Ok(Self { socket, target })
    }

    /// Destination address.
    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }
}

/// Binds a blocking socket. A datagram send never waits on the peer, so the
/// call returns as soon as the kernel has queued it.
fn bind_for(target: SocketAddr) -> Result<UdpSocket> {
    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    Ok(UdpSocket::bind(local)?)
}

impl LogSink for SyslogSink {
    fn send(&self, message: &str) {
        if let Err(e) = self.socket.send_to(message.as_bytes(), self.target) {
            tracing::trace!("syslog datagram dropped: {}", e);
        }
    }

    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.socket = bind_for(self.target)?;
            Ok(())
        })
    }
}
