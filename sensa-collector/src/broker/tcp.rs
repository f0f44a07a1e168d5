//! Client for a [`super::BrokerServer`] over TCP
//!
//! Each `open()` dials a fresh connection with a bounded connect timeout,
//! so a broker outage surfaces immediately as [`Error::Connection`].
//! Subscriptions hold a long-lived connection drained by a reader thread.

use super::protocol::{BrokerFrame, Op};
use super::{Broker, Channel, Delivery, Exchange, Subscription};
use crate::error::{Error, Result};
use crossbeam_channel::unbounded;
use sensa_wire::{Connection, WireError};
use std::thread;
use std::time::Duration;

/// Default wait for the broker to acknowledge a request
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP broker client
#[derive(Debug, Clone)]
pub struct TcpBroker {
    host: String,
    port: u16,
    connect_timeout: Duration,
    reply_timeout: Duration,
}

impl TcpBroker {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    fn dial(&self) -> Result<Connection> {
        let connection =
            Connection::connect((self.host.as_str(), self.port), Some(self.connect_timeout))
                .map_err(|e| {
                    Error::Connection(format!(
                        "could not connect to broker through host {} and port {}: {}",
                        self.host, self.port, e
                    ))
                })?;
        connection.set_read_timeout(Some(self.reply_timeout))?;
        connection.set_write_timeout(Some(self.reply_timeout))?;
        Ok(connection)
    }
}

/// Send one request frame and wait for its ack.
fn request(connection: &mut Connection, frame: &BrokerFrame) -> Result<()> {
    connection
        .send_message(frame.encode()?)
        .map_err(link_error)?;
    let reply = BrokerFrame::decode(&connection.receive_message().map_err(link_error)?)?;
    match reply.op {
        Op::Ack => Ok(()),
        Op::Nack => Err(Error::Broker(
            String::from_utf8_lossy(&reply.body).into_owned(),
        )),
        other => Err(Error::Broker(format!("unexpected reply {:?}", other))),
    }
}

/// A dropped broker link is an outage, not a per-message failure.
fn link_error(e: WireError) -> Error {
    match e {
        WireError::Timeout => Error::Timeout,
        e if e.is_disconnect() || matches!(e, WireError::DataIncomplete { .. }) => {
            Error::Connection(format!("lost connection to broker: {}", e))
        }
        e => Error::Wire(e),
    }
}

struct TcpChannel {
    connection: Connection,
}

impl Channel for TcpChannel {
    fn publish(&mut self, exchange: Exchange, routing_key: &str, body: &[u8]) -> Result<()> {
        request(
            &mut self.connection,
            &BrokerFrame::publish(exchange, routing_key, body),
        )
    }
}

impl Broker for TcpBroker {
    fn open(&self) -> Result<Box<dyn Channel>> {
        Ok(Box::new(TcpChannel {
            connection: self.dial()?,
        }))
    }

    fn subscribe(&self, exchange: Exchange, bindings: &[&str]) -> Result<Subscription> {
        let mut connection = self.dial()?;
        request(&mut connection, &BrokerFrame::subscribe(exchange, bindings))?;
        // Deliveries may be arbitrarily far apart
        connection.set_read_timeout(None)?;

        let closer = connection.try_clone()?;
        let (sender, receiver) = unbounded();
        thread::Builder::new()
            .name(format!("broker-sub-{}", exchange))
            .spawn(move || {
                loop {
                    let payload = match connection.receive_message() {
                        Ok(payload) => payload,
                        Err(e) if e.is_disconnect() => {
                            log::info!("Broker closed {} subscription", exchange);
                            break;
                        }
                        Err(e) => {
                            log::warn!("Subscription to {} ended: {}", exchange, e);
                            break;
                        }
                    };
                    let frame = match BrokerFrame::decode(&payload) {
                        Ok(frame) if frame.op == Op::Deliver => frame,
                        Ok(frame) => {
                            log::warn!("Ignoring {:?} frame on subscription", frame.op);
                            continue;
                        }
                        Err(e) => {
                            log::warn!("Malformed delivery: {}", e);
                            continue;
                        }
                    };
                    let delivery = Delivery {
                        exchange,
                        routing_key: frame.routing_key,
                        body: frame.body,
                    };
                    if sender.send(delivery).is_err() {
                        break;
                    }
                }
            })?;

        log::debug!(
            "Subscribed to {} on {}:{} {:?}",
            exchange,
            self.host,
            self.port,
            bindings
        );
        Ok(Subscription::new(receiver).with_cleanup(move || closer.shutdown()))
    }
}
