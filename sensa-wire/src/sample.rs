//! Capture files
//!
//! A capture is a gzip stream holding one `UserData` header followed by
//! any number of `Snapshot`s. Each record carries the same u32 LE length
//! prefix used on the collector link:
//!
//! ```text
//! gzip( [len][UserData] [len][Snapshot] [len][Snapshot] ... )
//! ```
//!
//! The stream ends cleanly at a record boundary; EOF inside a record is
//! reported as `DataIncomplete`.

use crate::error::{Result, WireError};
use crate::frame::{self, DEFAULT_MAX_FRAME_LEN};
use crate::model::{Snapshot, UserData};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use prost::Message as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Streams the records of a capture file
pub struct SampleReader<R: Read> {
    user: UserData,
    inner: GzDecoder<R>,
    max_frame_len: usize,
}

impl SampleReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> SampleReader<R> {
    /// Wrap a compressed stream and read its user header.
    pub fn new(reader: R) -> Result<Self> {
        let mut inner = GzDecoder::new(reader);
        let header = match frame::read_frame(&mut inner, DEFAULT_MAX_FRAME_LEN) {
            Err(WireError::Closed) => {
                return Err(WireError::DataIncomplete {
                    expected: frame::LENGTH_PREFIX_LEN,
                    received: 0,
                });
            }
            other => other?,
        };
        let user = UserData::decode(header.as_slice())?;
        log::debug!("Capture of user {} ({})", user.user_id, user.username);
        Ok(Self {
            user,
            inner,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    pub fn user(&self) -> &UserData {
        &self.user
    }

    /// Next snapshot, or `None` at the end of the capture.
    pub fn next_snapshot(&mut self) -> Result<Option<Snapshot>> {
        match frame::read_frame(&mut self.inner, self.max_frame_len) {
            Ok(bytes) => Ok(Some(Snapshot::decode(bytes.as_slice())?)),
            Err(WireError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read every remaining snapshot.
    pub fn snapshots(mut self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = self.next_snapshot()? {
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }
}

/// Writes capture files in the layout [`SampleReader`] expects
pub struct SampleWriter<W: Write> {
    inner: GzEncoder<W>,
}

impl SampleWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, user: &UserData) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), user)
    }
}

impl<W: Write> SampleWriter<W> {
    pub fn new(writer: W, user: &UserData) -> Result<Self> {
        let mut inner = GzEncoder::new(writer, Compression::default());
        frame::write_frame(&mut inner, &user.encode_to_vec())?;
        Ok(Self { inner })
    }

    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        frame::write_frame(&mut self.inner, &snapshot.encode_to_vec())
    }

    /// Flush the gzip trailer and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.inner.finish()?)
    }
}
