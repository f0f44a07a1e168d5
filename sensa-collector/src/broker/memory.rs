//! In-process broker
//!
//! Exchanges live in a shared subscriber table; each subscription owns an
//! unbounded crossbeam queue. Used directly by tests and single-process
//! deployments, and as the routing core of [`super::BrokerServer`].

use super::{Broker, Channel, Delivery, Exchange, Subscription};
use crate::error::{Error, Result};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct Subscriber {
    id: u64,
    exchange: Exchange,
    bindings: Vec<String>,
    sender: Sender<Delivery>,
}

struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    available: AtomicBool,
    published: AtomicU64,
}

/// Shared in-memory exchanges
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate an outage: `open` and `subscribe` fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `exchange`.
    pub fn subscriber_count(&self, exchange: Exchange) -> usize {
        self.inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.exchange == exchange)
            .count()
    }

    /// Total messages accepted by `publish` so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Route one message to every matching subscriber. Returns how many
    /// queues received it.
    pub fn route(&self, exchange: Exchange, routing_key: &str, body: &[u8]) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|s| {
            if s.exchange != exchange || !exchange.routes(&s.bindings, routing_key) {
                return true;
            }
            let delivery = Delivery {
                exchange,
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
            };
            match s.sender.send(delivery) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    log::debug!("Dropping closed subscription {} on {}", s.id, exchange);
                    false
                }
            }
        });
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        log::trace!("{}/{} -> {} queue(s)", exchange, routing_key, delivered);
        delivered
    }

    fn ensure_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("in-memory broker is unavailable".to_string()))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
}

impl Channel for MemoryChannel {
    fn publish(&mut self, exchange: Exchange, routing_key: &str, body: &[u8]) -> Result<()> {
        self.broker.ensure_available()?;
        self.broker.route(exchange, routing_key, body);
        Ok(())
    }
}

impl Broker for MemoryBroker {
    fn open(&self) -> Result<Box<dyn Channel>> {
        self.ensure_available()?;
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
        }))
    }

    fn subscribe(&self, exchange: Exchange, bindings: &[&str]) -> Result<Subscription> {
        self.ensure_available()?;
        let (sender, receiver) = unbounded();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            exchange,
            bindings: bindings.iter().map(|b| b.to_string()).collect(),
            sender,
        });
        log::debug!("Subscription {} bound to {} {:?}", id, exchange, bindings);

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(receiver).with_cleanup(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().retain(|s| s.id != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(100);

    #[test]
    fn test_fanout_reaches_every_subscriber_once() {
        let broker = MemoryBroker::new();
        let subs: Vec<_> = (0..3)
            .map(|_| broker.subscribe(Exchange::RawSnapshot, &[]).unwrap())
            .collect();

        broker
            .open()
            .unwrap()
            .publish(Exchange::RawSnapshot, "", b"blob")
            .unwrap();

        for sub in &subs {
            let delivery = sub.recv_timeout(WAIT).unwrap().unwrap();
            assert_eq!(delivery.body, b"blob");
            assert!(sub.try_recv().is_none());
        }
    }

    #[test]
    fn test_topic_routes_only_bound_keys() {
        let broker = MemoryBroker::new();
        let pose = broker.subscribe(Exchange::ParseResults, &["pose"]).unwrap();
        let both = broker
            .subscribe(Exchange::ParseResults, &["pose", "feelings"])
            .unwrap();

        let mut channel = broker.open().unwrap();
        channel.publish(Exchange::ParseResults, "feelings", b"f").unwrap();
        channel.publish(Exchange::ParseResults, "pose", b"p").unwrap();

        assert_eq!(pose.recv_timeout(WAIT).unwrap().unwrap().body, b"p");
        assert!(pose.try_recv().is_none());

        assert_eq!(both.recv_timeout(WAIT).unwrap().unwrap().routing_key, "feelings");
        assert_eq!(both.recv_timeout(WAIT).unwrap().unwrap().routing_key, "pose");
    }

    #[test]
    fn test_exchanges_are_isolated() {
        let broker = MemoryBroker::new();
        let raw = broker.subscribe(Exchange::RawSnapshot, &[]).unwrap();
        assert_eq!(broker.route(Exchange::ParseResults, "users", b"{}"), 0);
        assert!(raw.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscription_unbinds() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe(Exchange::RawSnapshot, &[]).unwrap();
        assert_eq!(broker.subscriber_count(Exchange::RawSnapshot), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count(Exchange::RawSnapshot), 0);
        assert_eq!(broker.route(Exchange::RawSnapshot, "", b"x"), 0);
    }

    #[test]
    fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        let mut channel = broker.open().unwrap();
        broker.set_available(false);

        assert!(matches!(broker.open().err(), Some(Error::Connection(_))));
        assert!(matches!(
            channel.publish(Exchange::RawSnapshot, "", b"x"),
            Err(Error::Connection(_))
        ));
        assert!(broker.subscribe(Exchange::RawSnapshot, &[]).is_err());

        broker.set_available(true);
        assert!(broker.open().is_ok());
    }
}
