//! Framed TCP connection
//!
//! Wraps a `TcpStream` with the length-prefixed envelope from [`crate::frame`].
//! The socket is closed when the `Connection` is dropped, so every exit
//! path (including `?` propagation) releases it.

use crate::error::{Result, WireError};
use crate::frame::{self, DEFAULT_MAX_FRAME_LEN};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Bidirectional framed byte stream
pub struct Connection {
    stream: TcpStream,
    max_frame_len: usize,
}

impl Connection {
    /// Wrap an already-connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Connect to `addr`, trying each resolved address in turn.
    ///
    /// With `timeout = None` the OS connect timeout applies.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Option<Duration>) -> Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&candidate, t),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    log::debug!("Connected to {}", candidate);
                    return Ok(Self::new(stream));
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => last_err = Some(WireError::Timeout),
                Err(e) => last_err = Some(WireError::Io(e)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            WireError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "address resolved to nothing",
            ))
        }))
    }

    /// Override the largest frame `receive_message` will accept.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Bound how long a single read may block. `None` blocks forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Bound how long a single write may block.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Write raw bytes with no framing.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    /// Write one length-prefixed message.
    ///
    /// Takes `&mut self`, so two messages can never interleave on one
    /// connection.
    pub fn send_message(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        frame::write_frame(&mut self.stream, payload.as_ref())
    }

    /// Block until one complete message has been read.
    pub fn receive_message(&mut self) -> Result<Vec<u8>> {
        frame::read_frame(&mut self.stream, self.max_frame_len)
    }

    /// Second handle to the same socket, e.g. to shut it down from another
    /// thread while this one blocks in `receive_message`.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            max_frame_len: self.max_frame_len,
        })
    }

    /// Shut the socket down in both directions, unblocking any reader.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Shut the socket down and drop it.
    pub fn close(self) {
        self.shutdown();
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.stream.local_addr(), self.stream.peer_addr()) {
            (Ok(local), Ok(peer)) => write!(f, "<Connection from {} to {}>", local, peer),
            _ => write!(f, "<Connection (disconnected)>"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
