//! Per-connection request handling
//!
//! One handler owns one accepted connection and processes exactly one
//! message on it: receive, decode, publish, then reply `OK!` or
//! `ERROR: <reason>`. The connection is closed when the handler returns.

use crate::error::Error;
use crate::publisher::Publisher;
use sensa_wire::{Connection, Reply, WireError, decode};
use std::fmt;
use std::sync::Arc;

/// How a connection ended
#[derive(Debug)]
pub enum Disposition {
    /// Published and acknowledged with `OK!`
    Acknowledged,
    /// Client got `ERROR: <reason>`; the collector keeps serving
    Rejected(String),
    /// Broker connectivity lost; the collector must stop
    Fatal(Error),
}

impl Disposition {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Disposition::Fatal(_))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Acknowledged => f.write_str("acknowledged"),
            Disposition::Rejected(reason) => write!(f, "rejected ({})", reason),
            Disposition::Fatal(e) => write!(f, "fatal ({})", e),
        }
    }
}

pub struct Handler {
    connection: Connection,
    publisher: Arc<Publisher>,
}

impl Handler {
    pub fn new(connection: Connection, publisher: Arc<Publisher>) -> Self {
        Self {
            connection,
            publisher,
        }
    }

    pub fn run(mut self) -> Disposition {
        let peer = self.connection.to_string();
        log::debug!("Handling {}", peer);

        let payload = match self.connection.receive_message() {
            Ok(payload) => payload,
            Err(e) if e.is_disconnect() => {
                log::debug!("{} closed without sending a message", peer);
                return Disposition::Rejected(e.to_string());
            }
            Err(e) => {
                log::warn!("Receive failed on {}: {}", peer, e);
                return self.reject(e.to_string());
            }
        };

        let (envelope, message) = match decode(&payload) {
            Ok(decoded) => decoded,
            Err(WireError::UnknownMessageType(tag)) => {
                log::warn!("Unknown message type {} from {}", tag, peer);
                return self.reject("Unknown message type");
            }
            Err(e) => {
                log::warn!("Could not decode message from {}: {}", peer, e);
                return self.reject("could not decode message");
            }
        };
        log::debug!(
            "{:?} for user {} from {}",
            envelope.msg_type,
            envelope.user_id,
            peer
        );

        match self.publisher.publish(&envelope, &message) {
            Ok(()) => {
                self.reply(&Reply::Ok);
                Disposition::Acknowledged
            }
            Err(e) if e.is_fatal() => {
                log::error!("CRITICAL: {}", e);
                self.reply(&Reply::error(&e));
                Disposition::Fatal(e)
            }
            Err(e) => {
                log::error!("Failed to publish message from {}: {}", peer, e);
                self.reject(e.to_string())
            }
        }
    }

    fn reject(&mut self, reason: impl Into<String>) -> Disposition {
        let reason = reason.into();
        self.reply(&Reply::error(&reason));
        Disposition::Rejected(reason)
    }

    fn reply(&mut self, reply: &Reply) {
        if let Err(e) = self.connection.send_message(reply.to_wire()) {
            log::warn!("Could not deliver \"{}\" to client: {}", reply, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, Exchange, MemoryBroker};
    use crate::store::SnapshotStore;
    use crate::topics;
    use sensa_wire::{Gender, UserData, WireMessage, encode};
    use std::io::Write;
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::time::Duration;

    /// Connected (client, server) pair over loopback
    fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Connection::new(client), Connection::new(server))
    }

    fn handle(broker: &MemoryBroker, payload: &[u8]) -> (Disposition, Reply) {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(
            Arc::new(broker.clone()),
            SnapshotStore::new(dir.path()),
        ));
        let (mut client, server) = pair();
        client.send_message(payload).unwrap();
        let disposition = Handler::new(server, publisher).run();
        let reply = Reply::parse(&client.receive_message().unwrap());
        (disposition, reply)
    }

    #[test]
    fn test_acknowledges_published_user() {
        let broker = MemoryBroker::new();
        let users = broker.subscribe(Exchange::ParseResults, &[topics::USERS]).unwrap();
        let user = UserData::new(123, "Test Testenson", 1000, Gender::Other);

        let (disposition, reply) = handle(&broker, &encode(123, &WireMessage::UserData(user)));

        assert!(matches!(disposition, Disposition::Acknowledged));
        assert_eq!(reply, Reply::Ok);
        assert!(users.recv_timeout(Duration::from_millis(200)).unwrap().is_some());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut payload = vec![9, 0, 0, 0];
        payload.extend_from_slice(&1u64.to_le_bytes());

        let (disposition, reply) = handle(&MemoryBroker::new(), &payload);

        assert!(matches!(disposition, Disposition::Rejected(_)));
        assert_eq!(reply, Reply::Error("Unknown message type".to_string()));
    }

    #[test]
    fn test_garbage_body_is_rejected() {
        let mut payload = vec![1, 0, 0, 0];
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(&[0xff, 0xff, 0xff]);

        let (_, reply) = handle(&MemoryBroker::new(), &payload);
        assert_eq!(reply, Reply::Error("could not decode message".to_string()));

        let (_, reply) = handle(&MemoryBroker::new(), &[1, 0]);
        assert_eq!(reply, Reply::Error("could not decode message".to_string()));
    }

    #[test]
    fn test_silent_close_and_truncated_frame() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(
            Arc::new(MemoryBroker::new()),
            SnapshotStore::new(dir.path()),
        ));

        let (client, server) = pair();
        drop(client);
        let disposition = Handler::new(server, Arc::clone(&publisher)).run();
        assert!(matches!(disposition, Disposition::Rejected(ref r) if r.contains("closed")));

        // Prefix announces 4 bytes, then the client stops writing
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        raw.write_all(&4u32.to_le_bytes()).unwrap();
        raw.shutdown(Shutdown::Write).unwrap();
        let disposition = Handler::new(Connection::new(server), publisher).run();
        assert!(matches!(disposition, Disposition::Rejected(ref r) if r.contains("incomplete")));
    }

    #[test]
    fn test_unreachable_broker_is_fatal() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let user = UserData::new(1, "a", 0, Gender::Male);

        let (disposition, reply) = handle(&broker, &encode(1, &WireMessage::UserData(user)));

        assert!(disposition.is_fatal());
        assert!(!reply.is_ok());
    }
}
