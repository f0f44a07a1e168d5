//! Reference uploader
//!
//! Opens one connection per message, sends it, and waits for the
//! collector's `OK!` / `ERROR:` reply. Retry policy belongs to the caller.

use crate::codec::{self, Reply, WireMessage};
use crate::connection::Connection;
use crate::error::Result;
use crate::model::{Snapshot, UserData};
use crate::sample::SampleReader;
use std::path::Path;
use std::time::Duration;

/// Default time to wait for the collector's reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a running collector
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Some(DEFAULT_REPLY_TIMEOUT),
        }
    }

    /// Connect and reply timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one message over a fresh connection and return the reply.
    pub fn send(&self, user_id: u64, message: &WireMessage) -> Result<Reply> {
        let mut connection = Connection::connect((self.host.as_str(), self.port), self.timeout)?;
        connection.set_read_timeout(self.timeout)?;

        connection.send_message(codec::encode(user_id, message))?;
        let reply = Reply::parse(&connection.receive_message()?);
        log::debug!(
            "{:?} for user {} -> {}",
            message.msg_type(),
            user_id,
            reply
        );
        Ok(reply)
    }

    pub fn upload_user(&self, user: &UserData) -> Result<Reply> {
        self.send(user.user_id, &WireMessage::UserData(user.clone()))
    }

    pub fn upload_snapshot(&self, user_id: u64, snapshot: &Snapshot) -> Result<Reply> {
        self.send(user_id, &WireMessage::Snapshot(snapshot.clone()))
    }

    /// Upload the user record followed by each snapshot, stopping at the
    /// first rejected message.
    pub fn upload_session(&self, user: &UserData, snapshots: &[Snapshot]) -> Result<Reply> {
        let reply = self.upload_user(user)?;
        if !reply.is_ok() {
            return Ok(reply);
        }
        for snapshot in snapshots {
            let reply = self.upload_snapshot(user.user_id, snapshot)?;
            if !reply.is_ok() {
                log::warn!("Snapshot {} rejected: {}", snapshot.id(), reply);
                return Ok(reply);
            }
        }
        Ok(Reply::Ok)
    }

    /// Upload a capture file: its user header, then every snapshot in order.
    pub fn upload_sample(&self, path: impl AsRef<Path>) -> Result<Reply> {
        let reader = SampleReader::open(path.as_ref())?;
        let user = reader.user().clone();
        let snapshots = reader.snapshots()?;
        log::info!(
            "Uploading {} snapshots of user {} ({}) from {}",
            snapshots.len(),
            user.user_id,
            user.username,
            path.as_ref().display()
        );
        self.upload_session(&user, &snapshots)
    }
}
