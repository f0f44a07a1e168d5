//! `sensa` - snapshot collector, broker, parsers and saver
//!
//! ## Processes
//!
//! - **run-broker**: hosts the `raw_snapshot` / `parse_results` exchanges
//! - **run-server**: accepts client uploads and publishes them
//! - **run-parser NAME**: one per parser, consumes `raw_snapshot`
//! - **run-saver**: persists everything on `parse_results`
//!
//! `upload-sample`, `upload-user` and `upload-snapshot` feed a running
//! collector; `parse` and `save` work on single files.
//!
//! Every command reads `-c/--config FILE` (TOML); flags override it.

use clap::{Args, Parser, Subcommand};
use sensa_collector::broker::{BrokerOptions, BrokerServer};
use sensa_collector::parsers::{ParserContext, parse_file};
use sensa_collector::{
    Broker, BrokerRegistry, BrokerUrl, Collector, Error, FileStore, ParserConsumer, ParserRegistry,
    Publisher, Result, Saver, SensaConfig, SnapshotStore, signal, topics,
};
use sensa_wire::{Client, Reply, Snapshot, UserData};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sensa", version)]
#[command(about = "Snapshot ingestion and distribution pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// `-h` is `--host` here, so help is `--help` only
#[derive(Args)]
struct Endpoint {
    #[arg(short = 'h', long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Subcommand)]
enum Command {
    /// Accept client uploads and publish them to the broker
    #[command(disable_help_flag = true)]
    RunServer {
        #[command(flatten)]
        endpoint: Endpoint,
        /// e.g. tcp://127.0.0.1:5672
        broker_url: Option<String>,
    },
    /// Host the message broker
    #[command(disable_help_flag = true)]
    RunBroker {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Consume raw snapshots with one parser
    RunParser {
        name: String,
        broker_url: Option<String>,
    },
    /// Run one parser on a raw snapshot file and print the result
    Parse { name: String, raw_path: PathBuf },
    /// Persist parse results
    RunSaver {
        store_dir: Option<PathBuf>,
        broker_url: Option<String>,
    },
    /// Store one JSON result file under TOPIC
    Save {
        #[arg(short = 'd', long)]
        store_dir: Option<PathBuf>,
        topic: String,
        data_path: PathBuf,
    },
    /// Upload a user described by a JSON file
    #[command(disable_help_flag = true)]
    UploadUser {
        #[command(flatten)]
        endpoint: Endpoint,
        path: PathBuf,
    },
    /// Upload a gzip capture file: its user, then every snapshot
    #[command(disable_help_flag = true)]
    UploadSample {
        #[command(flatten)]
        endpoint: Endpoint,
        path: PathBuf,
    },
    /// Upload a snapshot described by a JSON file
    #[command(disable_help_flag = true)]
    UploadSnapshot {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(short, long)]
        user_id: u64,
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match SensaConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    if let Err(e) = run(cli.command, config) {
        log::error!("{}", e);
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command, mut config: SensaConfig) -> Result<()> {
    match command {
        Command::RunServer {
            endpoint,
            broker_url,
        } => {
            if let Some(host) = endpoint.host {
                config.server.host = host;
            }
            if let Some(port) = endpoint.port {
                config.server.port = port;
            }
            let broker = connect_broker(&config, broker_url)?;
            let publisher = Publisher::new(broker, SnapshotStore::new(&config.storage.data_dir));
            log::info!(
                "Sensa v{} collector, raw snapshots under {}",
                env!("CARGO_PKG_VERSION"),
                config.storage.data_dir.display()
            );
            let running = signal::shutdown_flag()?;
            Collector::new(config.server, publisher).run(running)
        }
        Command::RunBroker { endpoint } => {
            let host = endpoint.host.unwrap_or(config.broker.host);
            let port = endpoint.port.unwrap_or(config.broker.port);
            let server = BrokerServer::bind(&host, port)?;
            let running = signal::shutdown_flag()?;
            server.run(running)
        }
        Command::RunParser { name, broker_url } => {
            let parser = ParserRegistry::builtin()
                .create(&name, &ParserContext::new(&config.storage.data_dir))?;
            let broker = connect_broker(&config, broker_url)?;
            let running = signal::shutdown_flag()?;
            ParserConsumer::new(parser, broker).run(running)
        }
        Command::Parse { name, raw_path } => {
            let parser = ParserRegistry::builtin()
                .create(&name, &ParserContext::new(&config.storage.data_dir))?;
            println!("{}", parse_file(parser.as_ref(), &raw_path)?);
            Ok(())
        }
        Command::RunSaver {
            store_dir,
            broker_url,
        } => {
            let store_dir = store_dir.unwrap_or_else(|| config.saver.store_dir.clone());
            let broker = connect_broker(&config, broker_url)?;
            let saver = Saver::new(FileStore::new(&store_dir));
            log::info!("Saving to {}", store_dir.display());
            let running = signal::shutdown_flag()?;
            saver.run(broker.as_ref(), topics::ALL, &running)
        }
        Command::Save {
            store_dir,
            topic,
            data_path,
        } => {
            let store_dir = store_dir.unwrap_or_else(|| config.saver.store_dir.clone());
            let saver = Saver::new(FileStore::new(&store_dir));
            let outcome = saver.save_file(&topic, &data_path)?;
            println!("{} {:?} in {}", topic, outcome, store_dir.display());
            Ok(())
        }
        Command::UploadSample { endpoint, path } => {
            let reply = client(&config, endpoint).upload_sample(&path)?;
            report(reply)
        }
        Command::UploadUser { endpoint, path } => {
            let user: UserData = read_json(&path)?;
            let reply = client(&config, endpoint).upload_user(&user)?;
            report(reply)
        }
        Command::UploadSnapshot {
            endpoint,
            user_id,
            path,
        } => {
            let snapshot: Snapshot = read_json(&path)?;
            let reply = client(&config, endpoint).upload_snapshot(user_id, &snapshot)?;
            report(reply)
        }
    }
}

fn connect_broker(
    config: &SensaConfig,
    url: Option<String>,
) -> Result<Arc<dyn Broker>> {
    let url: BrokerUrl = url.as_deref().unwrap_or(&config.broker.url).parse()?;
    let options = BrokerOptions {
        connect_timeout: config.broker.connect_timeout(),
    };
    log::info!("Using broker {}", url);
    BrokerRegistry::builtin().connect(&url, options)
}

fn client(config: &SensaConfig, endpoint: Endpoint) -> Client {
    Client::new(
        endpoint.host.unwrap_or_else(|| config.server.host.clone()),
        endpoint.port.unwrap_or(config.server.port),
    )
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn report(reply: Reply) -> Result<()> {
    match reply {
        Reply::Ok => {
            println!("{}", reply);
            Ok(())
        }
        Reply::Error(reason) => Err(Error::Other(format!("collector rejected upload: {}", reason))),
    }
}
