//! Hands decoded client messages to the broker
//!
//! | Message  | Side effects                                                  |
//! |----------|---------------------------------------------------------------|
//! | UserData | `parse_results/users` ← user projection                        |
//! | Snapshot | blob on disk, `raw_snapshot` ← `{user_id, address}`,            |
//! |          | `parse_results/snapshots` ← capture metadata                   |
//!
//! The broker channel is opened before anything else, so an unreachable
//! broker fails the message without leaving an orphaned blob behind. A link
//! that drops after the blob is written has the blob removed again.

use crate::broker::{Broker, Channel, Exchange};
use crate::error::Result;
use crate::records::{RawSnapshotRecord, snapshot_metadata, user_projection};
use crate::store::SnapshotStore;
use crate::topics;
use sensa_wire::{Envelope, Snapshot, UserData, WireMessage};
use std::sync::Arc;

/// Shared by every collector handler
pub struct Publisher {
    broker: Arc<dyn Broker>,
    store: SnapshotStore,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, store: SnapshotStore) -> Self {
        Self { broker, store }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Distribute one decoded message.
    pub fn publish(&self, envelope: &Envelope, message: &WireMessage) -> Result<()> {
        let mut channel = self.broker.open()?;
        match message {
            WireMessage::UserData(user) => {
                self.check_owner(envelope, user);
                let body = serde_json::to_vec(&user_projection(user))?;
                channel.publish(Exchange::ParseResults, topics::USERS, &body)?;
                log::info!("Published user {} ({})", user.user_id, user.username);
            }
            WireMessage::Snapshot(snapshot) => {
                self.publish_snapshot(channel.as_mut(), envelope.user_id, snapshot)?;
            }
        }
        Ok(())
    }

    fn publish_snapshot(
        &self,
        channel: &mut dyn Channel,
        user_id: u64,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let address = self.store.write(user_id, snapshot)?;
        let record = RawSnapshotRecord { user_id, address };
        let announced = record
            .to_json()
            .and_then(|body| channel.publish(Exchange::RawSnapshot, "", &body));
        if let Err(e) = announced {
            // Nobody will ever read a blob that was never announced
            self.store.remove(&record.address);
            return Err(e);
        }

        let metadata = serde_json::to_vec(&snapshot_metadata(user_id, snapshot))?;
        channel.publish(Exchange::ParseResults, topics::SNAPSHOTS, &metadata)?;

        log::info!(
            "Published snapshot {} of user {} ({})",
            snapshot.id(),
            user_id,
            record.address.display()
        );
        Ok(())
    }

    fn check_owner(&self, envelope: &Envelope, user: &UserData) {
        if envelope.user_id != user.user_id {
            log::warn!(
                "Envelope user {} differs from user data {}; publishing as {}",
                envelope.user_id,
                user.user_id,
                user.user_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use sensa_wire::{Gender, MessageType};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(200);

    fn publisher(broker: &MemoryBroker, dir: &tempfile::TempDir) -> Publisher {
        Publisher::new(Arc::new(broker.clone()), SnapshotStore::new(dir.path()))
    }

    #[test]
    fn test_user_goes_to_users_topic() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let users = broker.subscribe(Exchange::ParseResults, &[topics::USERS]).unwrap();

        let user = UserData::new(123, "Test Testenson", 1000, Gender::Other);
        publisher(&broker, &dir)
            .publish(&Envelope::new(MessageType::UserData, 123), &user.into())
            .unwrap();

        let delivery = users.recv_timeout(WAIT).unwrap().unwrap();
        let record: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(record["user_id"], 123);
        assert_eq!(record["gender"], "other");
    }

    #[test]
    fn test_snapshot_written_then_announced() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let raw = broker.subscribe(Exchange::RawSnapshot, &[]).unwrap();
        let meta = broker
            .subscribe(Exchange::ParseResults, &[topics::SNAPSHOTS])
            .unwrap();

        let snapshot = Snapshot::at(1575446887339);
        publisher(&broker, &dir)
            .publish(&Envelope::new(MessageType::Snapshot, 7), &snapshot.clone().into())
            .unwrap();

        let notice = RawSnapshotRecord::from_json(&raw.recv_timeout(WAIT).unwrap().unwrap().body)
            .unwrap();
        assert_eq!(notice.user_id, 7);
        assert_eq!(SnapshotStore::read(&notice.address).unwrap(), snapshot);

        let metadata: serde_json::Value =
            serde_json::from_slice(&meta.recv_timeout(WAIT).unwrap().unwrap().body).unwrap();
        assert_eq!(metadata["id"], 1575446887339u64);
        assert_eq!(metadata["datetime"], "December 4, 2019 at 08:08:07.339");
    }

    /// Opens channels whose every publish fails as a dropped link
    struct DroppingBroker;

    struct DroppingChannel;

    impl Channel for DroppingChannel {
        fn publish(&mut self, _: Exchange, _: &str, _: &[u8]) -> Result<()> {
            Err(crate::error::Error::Connection("link dropped".to_string()))
        }
    }

    impl Broker for DroppingBroker {
        fn open(&self) -> Result<Box<dyn Channel>> {
            Ok(Box::new(DroppingChannel))
        }

        fn subscribe(&self, _: Exchange, _: &[&str]) -> Result<crate::broker::Subscription> {
            Err(crate::error::Error::Connection("link dropped".to_string()))
        }
    }

    #[test]
    fn test_link_lost_after_write_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(Arc::new(DroppingBroker), SnapshotStore::new(dir.path()));

        let err = publisher
            .publish(
                &Envelope::new(MessageType::Snapshot, 7),
                &Snapshot::at(1575446887339).into(),
            )
            .unwrap_err();

        assert!(err.is_fatal());
        let blob = publisher.store().path_for(7, 1575446887339);
        assert!(!blob.exists());
        assert!(!blob.with_file_name("snapshot.raw.tmp").exists());
    }

    #[test]
    fn test_unreachable_broker_leaves_no_blob() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.set_available(false);

        let publisher = publisher(&broker, &dir);
        let err = publisher
            .publish(
                &Envelope::new(MessageType::Snapshot, 7),
                &Snapshot::at(1575446887339).into(),
            )
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(!publisher.store().path_for(7, 1575446887339).exists());
    }
}
