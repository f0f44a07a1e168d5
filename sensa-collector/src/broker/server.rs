//! Standalone broker daemon
//!
//! Hosts a [`MemoryBroker`] behind a TCP listener. A connection's first
//! frame decides its role for the rest of its life:
//!
//! - `publish`: the connection is a publishing channel; every publish is
//!   routed and acknowledged in order.
//! - `subscribe`: the connection is a bound queue; the broker acks once and
//!   then streams `deliver` frames until either side goes away.

use super::protocol::{BrokerFrame, Op};
use super::{Broker, MemoryBroker};
use crate::error::Result;
use sensa_wire::{Connection, Listener};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How often an idle subscriber connection rechecks the running flag
const DELIVERY_POLL: Duration = Duration::from_millis(200);

/// A slow subscriber may hold a delivery this long before it is dropped
const DELIVERY_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BrokerServer {
    broker: MemoryBroker,
    listener: Listener,
}

impl BrokerServer {
    /// Bind a fresh broker on `host:port` (port 0 picks a free one).
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        Self::with_broker(MemoryBroker::new(), host, port)
    }

    pub fn with_broker(broker: MemoryBroker, host: &str, port: u16) -> Result<Self> {
        let mut listener = Listener::new(host, port);
        listener.start()?;
        listener.set_nonblocking(true)?;
        Ok(Self { broker, listener })
    }

    /// The exchanges this server routes through.
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `running` is cleared.
    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        log::info!("Broker listening on {}", self.local_addr()?);

        while running.load(Ordering::Relaxed) {
            match self.listener.try_accept() {
                Ok(Some(connection)) => {
                    let broker = self.broker.clone();
                    let running = Arc::clone(&running);
                    let spawned = thread::Builder::new()
                        .name("broker-conn".to_string())
                        .spawn(move || serve(connection, broker, running));
                    if let Err(e) = spawned {
                        log::error!("Failed to spawn broker connection thread: {}", e);
                    }
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(e) => log::error!("Accept error: {}", e),
            }
        }

        self.listener.stop();
        log::info!("Broker stopped");
        Ok(())
    }
}

fn serve(mut connection: Connection, broker: MemoryBroker, running: Arc<AtomicBool>) {
    let peer = connection
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());

    let first = match next_frame(&mut connection) {
        Some(frame) => frame,
        None => return,
    };
    match first.op {
        Op::Publish => serve_publisher(connection, &broker, first, &peer),
        Op::Subscribe => serve_subscriber(connection, &broker, first, &running, &peer),
        other => {
            log::warn!("{} opened with {:?}, closing", peer, other);
            let _ = reply(&mut connection, &BrokerFrame::nack("expected publish or subscribe"));
        }
    }
}

/// Read one broker frame, logging and swallowing the end of the stream.
fn next_frame(connection: &mut Connection) -> Option<BrokerFrame> {
    let payload = match connection.receive_message() {
        Ok(payload) => payload,
        Err(e) if e.is_disconnect() => return None,
        Err(e) => {
            log::warn!("Broker connection read failed: {}", e);
            return None;
        }
    };
    match BrokerFrame::decode(&payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::warn!("Malformed broker frame: {}", e);
            let _ = reply(connection, &BrokerFrame::nack(&e));
            None
        }
    }
}

fn reply(connection: &mut Connection, frame: &BrokerFrame) -> Result<()> {
    connection.send_message(frame.encode()?)?;
    Ok(())
}

fn serve_publisher(
    mut connection: Connection,
    broker: &MemoryBroker,
    first: BrokerFrame,
    peer: &str,
) {
    log::debug!("Publisher connected from {}", peer);
    let mut frame = first;
    loop {
        let response = match (frame.op, frame.exchange()) {
            (Op::Publish, Ok(exchange)) => {
                broker.route(exchange, &frame.routing_key, &frame.body);
                BrokerFrame::ack()
            }
            (Op::Publish, Err(e)) => BrokerFrame::nack(&e),
            (other, _) => BrokerFrame::nack(format!("{:?} on a publishing channel", other)),
        };
        if let Err(e) = reply(&mut connection, &response) {
            log::warn!("Could not answer publisher {}: {}", peer, e);
            return;
        }
        frame = match next_frame(&mut connection) {
            Some(frame) => frame,
            None => break,
        };
    }
    log::debug!("Publisher {} disconnected", peer);
}

fn serve_subscriber(
    mut connection: Connection,
    broker: &MemoryBroker,
    first: BrokerFrame,
    running: &AtomicBool,
    peer: &str,
) {
    let exchange = match first.exchange() {
        Ok(exchange) => exchange,
        Err(e) => {
            let _ = reply(&mut connection, &BrokerFrame::nack(&e));
            return;
        }
    };
    let bindings = first.bindings();
    let binding_refs: Vec<&str> = bindings.iter().map(String::as_str).collect();
    let subscription = match broker.subscribe(exchange, &binding_refs) {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = reply(&mut connection, &BrokerFrame::nack(&e));
            return;
        }
    };
    if reply(&mut connection, &BrokerFrame::ack()).is_err() {
        return;
    }
    if let Err(e) = connection.set_write_timeout(Some(DELIVERY_WRITE_TIMEOUT)) {
        log::warn!("Failed to set write timeout for {}: {}", peer, e);
    }
    log::info!("{} subscribed to {} {:?}", peer, exchange, bindings);

    while running.load(Ordering::Relaxed) {
        let delivery = match subscription.recv_timeout(DELIVERY_POLL) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(_) => break,
        };
        let frame = BrokerFrame::deliver(exchange, &delivery.routing_key, &delivery.body);
        if let Err(e) = reply(&mut connection, &frame) {
            log::info!("Subscriber {} went away: {}", peer, e);
            break;
        }
    }
    connection.close();
}
