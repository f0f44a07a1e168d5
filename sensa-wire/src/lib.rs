//! Sensa wire protocol
//!
//! The link between a capture client and the snapshot collector:
//!
//! - [`frame`]: 4-byte little-endian length prefix framing
//! - [`connection`]: framed `TcpStream` wrapper
//! - [`listener`]: accepts inbound clients
//! - [`codec`]: (type, user id) envelope plus protobuf bodies
//! - [`model`]: `UserData` and `Snapshot` records
//! - [`sample`]: gzip capture files (user header plus snapshots)
//! - [`client`]: reference uploader

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod model;
pub mod sample;

pub use client::Client;
pub use codec::{Envelope, MessageType, Reply, WireMessage, decode, encode};
pub use connection::Connection;
pub use error::{Result, WireError};
pub use listener::Listener;
pub use model::{ColorImage, DepthImage, Feelings, Gender, Pose, Rotation, Snapshot, Translation, UserData};
pub use sample::{SampleReader, SampleWriter};
