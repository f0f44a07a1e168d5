//! Collector daemon
//!
//! Polls a non-blocking listener, spawning one [`Handler`] thread per
//! accepted client. Clearing the `running` flag stops accepting; in-flight
//! handlers are joined before `run` returns.
//!
//! A [`Disposition::Fatal`] from any handler means the broker is gone.
//! The collector then invokes its fatal hook, which by default terminates
//! the process with exit status 1 so a supervisor can restart it.

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::{Disposition, Handler};
use crate::publisher::Publisher;
use sensa_wire::Listener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Called with the fatal disposition of a handler
pub type FatalHook = Arc<dyn Fn(&Disposition) + Send + Sync>;

/// Accept loop poll interval
const ACCEPT_POLL: Duration = Duration::from_millis(10);

pub struct Collector {
    config: ServerConfig,
    publisher: Arc<Publisher>,
    listener: Listener,
    on_fatal: FatalHook,
}

impl Collector {
    pub fn new(config: ServerConfig, publisher: Publisher) -> Self {
        let listener = Listener::new(config.host.clone(), config.port);
        Self {
            config,
            publisher: Arc::new(publisher),
            listener,
            on_fatal: Arc::new(|disposition: &Disposition| {
                eprintln!("ERROR: {}", disposition);
                std::process::exit(1);
            }),
        }
    }

    /// Replace the default exit-on-fatal behavior.
    pub fn with_fatal_hook(mut self, hook: impl Fn(&Disposition) + Send + Sync + 'static) -> Self {
        self.on_fatal = Arc::new(hook);
        self
    }

    /// Bind the listening socket.
    pub fn bind(&mut self) -> Result<()> {
        self.listener.start()?;
        self.listener.set_nonblocking(true)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `running` is cleared. Binds first if needed.
    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        if !self.listener.is_listening() {
            self.bind()?;
        }
        log::info!("Collector listening on {}", self.local_addr()?);

        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        while running.load(Ordering::Relaxed) {
            match self.listener.try_accept() {
                Ok(Some(connection)) => {
                    if let Err(e) = connection.set_read_timeout(self.config.read_timeout()) {
                        log::warn!("Failed to set read timeout: {}", e);
                    }
                    let publisher = Arc::clone(&self.publisher);
                    let on_fatal = Arc::clone(&self.on_fatal);
                    let spawned = thread::Builder::new()
                        .name("collector-handler".to_string())
                        .spawn(move || {
                            let disposition = Handler::new(connection, publisher).run();
                            log::debug!("Connection {}", disposition);
                            if disposition.is_fatal() {
                                on_fatal(&disposition);
                            }
                        });
                    match spawned {
                        Ok(handle) => handlers.push(handle),
                        Err(e) => log::error!("Failed to spawn handler thread: {}", e),
                    }
                }
                Ok(None) => thread::sleep(ACCEPT_POLL),
                Err(e) => log::error!("Accept error: {}", e),
            }
            handlers.retain(|h| !h.is_finished());
        }

        log::info!("Shutting down...");
        self.listener.stop();
        if !handlers.is_empty() {
            log::info!("Waiting for {} in-flight handler(s)", handlers.len());
        }
        for handle in handlers {
            if handle.join().is_err() {
                log::error!("Handler thread panicked");
            }
        }
        log::info!("Collector stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::store::SnapshotStore;
    use sensa_wire::{Client, Gender, Reply, UserData};

    #[test]
    fn test_serves_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(
            Arc::new(MemoryBroker::new()),
            SnapshotStore::new(dir.path()),
        );
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let mut collector = Collector::new(config, publisher);
        collector.bind().unwrap();
        let addr = collector.local_addr().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let server = thread::spawn(move || collector.run(flag));

        let client = Client::new("127.0.0.1", addr.port());
        for id in 0..3 {
            let user = UserData::new(id, "user", 0, Gender::Female);
            assert_eq!(client.upload_user(&user).unwrap(), Reply::Ok);
        }

        running.store(false, Ordering::Relaxed);
        server.join().unwrap().unwrap();
        assert!(std::net::TcpStream::connect(addr).is_err());
    }
}
