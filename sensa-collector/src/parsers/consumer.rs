//! Runs a parser against the raw snapshot fan-out

use super::Parser;
use crate::broker::{Broker, Exchange};
use crate::error::{Error, Result};
use crate::records::{ParsedResult, RawSnapshotRecord};
use crate::store::SnapshotStore;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often an idle consumer rechecks the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ParserConsumer {
    parser: Box<dyn Parser>,
    broker: Arc<dyn Broker>,
}

impl ParserConsumer {
    pub fn new(parser: Box<dyn Parser>, broker: Arc<dyn Broker>) -> Self {
        Self { parser, broker }
    }

    /// Parse one fan-out message and publish the result.
    pub fn handle(&self, body: &[u8]) -> Result<ParsedResult> {
        let record = RawSnapshotRecord::from_json(body)?;
        let snapshot = SnapshotStore::read(&record.address)?;
        let result = self.parser.parse(record.user_id, &snapshot)?;

        let mut channel = self.broker.open()?;
        channel.publish(Exchange::ParseResults, self.parser.topic(), &result.to_json()?)?;
        log::debug!(
            "{} parsed snapshot {} of user {}",
            self.parser.name(),
            snapshot.id(),
            record.user_id
        );
        Ok(result)
    }

    /// Consume raw snapshots until `running` is cleared or the broker goes
    /// away. Messages that fail to parse are logged and skipped.
    pub fn run(&self, running: Arc<AtomicBool>) -> Result<()> {
        let subscription = self.broker.subscribe(Exchange::RawSnapshot, &[])?;
        log::info!("Parser {} consuming {}", self.parser.name(), Exchange::RawSnapshot);

        while running.load(Ordering::Relaxed) {
            let delivery = match subscription.recv_timeout(POLL_INTERVAL)? {
                Some(delivery) => delivery,
                None => continue,
            };
            match self.handle(&delivery.body) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(Error::MissingField(field)) => {
                    log::debug!("{}: snapshot has no {}, skipping", self.parser.name(), field);
                }
                Err(e) => log::warn!("{} failed on message: {}", self.parser.name(), e),
            }
        }
        log::info!("Parser {} stopped", self.parser.name());
        Ok(())
    }
}

/// Run `parser` on a raw snapshot blob and return its JSON.
pub fn parse_file(parser: &dyn Parser, path: &Path) -> Result<String> {
    let user_id = SnapshotStore::user_id_from_path(path).unwrap_or_default();
    let snapshot = SnapshotStore::read(path)?;
    let result = parser.parse(user_id, &snapshot)?;
    Ok(serde_json::to_string(&result.fields)?)
}
