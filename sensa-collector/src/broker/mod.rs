//! Message broker abstraction
//!
//! Two exchanges carry everything downstream of the collector:
//!
//! | Exchange        | Kind    | Routing                                   |
//! |-----------------|---------|-------------------------------------------|
//! | `raw_snapshot`  | fan-out | every subscriber gets every message       |
//! | `parse_results` | topic   | subscribers get the keys they are bound to |
//!
//! Any transport offering these semantics can implement [`Broker`].
//! Implementations are picked from a [`BrokerRegistry`] by URL scheme.

pub mod memory;
pub mod protocol;
pub mod server;
pub mod tcp;

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use memory::MemoryBroker;
pub use server::BrokerServer;
pub use tcp::TcpBroker;

/// Exchange kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Fanout,
    Topic,
}

/// The exchanges of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    /// Raw snapshot notices for parsers
    RawSnapshot,
    /// Parser and collector projections for the saver
    ParseResults,
}

impl Exchange {
    pub fn name(self) -> &'static str {
        match self {
            Exchange::RawSnapshot => "raw_snapshot",
            Exchange::ParseResults => "parse_results",
        }
    }

    pub fn kind(self) -> ExchangeKind {
        match self {
            Exchange::RawSnapshot => ExchangeKind::Fanout,
            Exchange::ParseResults => ExchangeKind::Topic,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "raw_snapshot" => Some(Exchange::RawSnapshot),
            "parse_results" => Some(Exchange::ParseResults),
            _ => None,
        }
    }

    /// Whether a message with `routing_key` reaches a subscriber bound with `bindings`.
    pub fn routes(self, bindings: &[String], routing_key: &str) -> bool {
        match self.kind() {
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => bindings.iter().any(|b| topic_matches(b, routing_key)),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// AMQP-style topic match: words split on `.`, `*` matches exactly one
/// word, `#` matches zero or more.
pub fn topic_matches(binding: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = binding.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

/// A message handed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: Exchange,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Publishing side of a broker session
pub trait Channel: Send {
    fn publish(&mut self, exchange: Exchange, routing_key: &str, body: &[u8]) -> Result<()>;
}

/// A pub/sub transport with fan-out and topic exchanges
pub trait Broker: Send + Sync {
    /// Open a publishing session. Fails with [`Error::Connection`] when the
    /// broker cannot be reached.
    fn open(&self) -> Result<Box<dyn Channel>>;

    /// Bind a new queue to `exchange`. `bindings` are ignored on fan-out
    /// exchanges.
    fn subscribe(&self, exchange: Exchange, bindings: &[&str]) -> Result<Subscription>;
}

/// Receiving end of a bound queue
///
/// Dropping it unbinds the queue.
pub struct Subscription {
    receiver: Receiver<Delivery>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(receiver: Receiver<Delivery>) -> Self {
        Self {
            receiver,
            on_drop: None,
        }
    }

    /// Run `f` when the subscription is dropped (closing a socket, etc).
    pub fn with_cleanup(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(f));
        self
    }

    /// Wait up to `timeout` for the next delivery. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Connection(
                "broker closed the subscription".to_string(),
            )),
        }
    }

    /// Next delivery if one is already queued.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queued", &self.receiver.len())
            .finish()
    }
}

/// `scheme://host:port` broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s)?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("no host provided for publisher service in \"{}\"", s)))?;
        let port = url
            .port()
            .ok_or_else(|| Error::Config(format!("no port provided for publisher service in \"{}\"", s)))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Options handed to broker constructors
#[derive(Debug, Clone, Copy)]
pub struct BrokerOptions {
    pub connect_timeout: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

type BrokerConstructor = fn(&BrokerUrl, BrokerOptions) -> Result<Arc<dyn Broker>>;

/// Scheme → broker constructor, resolved once at startup
#[derive(Clone)]
pub struct BrokerRegistry {
    constructors: BTreeMap<&'static str, BrokerConstructor>,
}

impl BrokerRegistry {
    /// Registry with the brokers shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register("tcp", |url, options| {
            Ok(Arc::new(TcpBroker::new(&url.host, url.port, options.connect_timeout)))
        });
        registry
    }

    pub fn register(&mut self, scheme: &'static str, constructor: BrokerConstructor) {
        self.constructors.insert(scheme, constructor);
    }

    pub fn schemes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Build the broker for `url`, rejecting unknown schemes.
    pub fn connect(&self, url: &BrokerUrl, options: BrokerOptions) -> Result<Arc<dyn Broker>> {
        let constructor = self
            .constructors
            .get(url.scheme.as_str())
            .ok_or_else(|| Error::UnknownScheme(url.scheme.clone()))?;
        constructor(url, options)
    }
}

impl fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
