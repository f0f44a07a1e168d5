//! Length-prefixed framing
//!
//! Every message on the collector link is delimited the same way:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Little-endian u32│ `length` bytes           │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! A reader keeps pulling from the transport until it holds exactly
//! `length` bytes. Short reads are normal on TCP and are retried. EOF before
//! the first prefix byte is a clean close (`Closed`); EOF anywhere later in
//! the frame is `DataIncomplete`.

use crate::error::{Result, WireError};
use std::io::{ErrorKind, Read, Write};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame (color images can be several MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write `payload` as a single frame.
///
/// Header and payload go out in one `write_all` so a frame is never split
/// by another writer holding the same socket between the two halves.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buffer = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);

    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame, rejecting declared lengths above `max_len`.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match read_full(reader, &mut len_buf) {
        Err(WireError::DataIncomplete { received: 0, .. }) => return Err(WireError::Closed),
        other => other?,
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_len {
        return Err(WireError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload)?;
    log::trace!("Read frame of {} bytes", len);
    Ok(payload)
}

/// Fill `buf` completely, accumulating partial reads.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(WireError::DataIncomplete {
                    expected: buf.len(),
                    received,
                });
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                return Err(WireError::Timeout);
            }
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(())
}
