//! TCP listener producing framed connections

use crate::connection::Connection;
use crate::error::{Result, WireError};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};

/// Accepts inbound clients, one [`Connection`] each.
///
/// `start`/`stop` bracket the bound socket. `stop` only closes the listening
/// socket; connections already handed out stay open until their owners drop
/// them.
#[derive(Debug)]
pub struct Listener {
    host: String,
    port: u16,
    socket: Option<TcpListener>,
}

impl Listener {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: None,
        }
    }

    /// Bind and listen.
    ///
    /// The std listener enables `SO_REUSEADDR` on Unix so a restarted
    /// collector can rebind right away, and listens with a bounded backlog.
    pub fn start(&mut self) -> Result<()> {
        let socket = TcpListener::bind((self.host.as_str(), self.port))?;
        log::info!("Listening on {}", socket.local_addr()?);
        self.socket = Some(socket);
        Ok(())
    }

    /// Close the listening socket.
    pub fn stop(&mut self) {
        if let Some(socket) = self.socket.take()
            && let Ok(addr) = socket.local_addr()
        {
            log::info!("Stopped listening on {}", addr);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    /// Address actually bound (useful when started on port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket()?.local_addr()?)
    }

    /// Switch the listening socket between blocking and polling modes.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket()?.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Block until a client connects.
    pub fn accept(&self) -> Result<Connection> {
        let (stream, addr) = self.socket()?.accept()?;
        stream.set_nonblocking(false)?;
        log::debug!("Accepted connection from {}", addr);
        Ok(Connection::new(stream))
    }

    /// Accept without blocking; `Ok(None)` when nobody is waiting.
    ///
    /// Requires `set_nonblocking(true)`.
    pub fn try_accept(&self) -> Result<Option<Connection>> {
        match self.socket()?.accept() {
            Ok((stream, addr)) => {
                // Accepted sockets may inherit non-blocking mode
                stream.set_nonblocking(false)?;
                log::debug!("Accepted connection from {}", addr);
                Ok(Some(Connection::new(stream)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(WireError::Io(e)),
        }
    }

    fn socket(&self) -> Result<&TcpListener> {
        self.socket.as_ref().ok_or(WireError::NotListening)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}
