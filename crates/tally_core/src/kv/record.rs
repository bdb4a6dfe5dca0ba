//! Commit record framing.
//!
//! Each committed transaction is one record:
//!
//! ```text
//! magic "TKV1" (4) | format version u16 LE (2) | payload length u32 LE (4)
//! payload: CBOR array of writes
//! crc32 u32 LE over everything before it (4)
//! ```

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every commit record.
pub const RECORD_MAGIC: [u8; 4] = *b"TKV1";

/// Current commit record format version.
pub const RECORD_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub const HEADER_SIZE: usize = 10;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// One write inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Write {
    /// Insert or replace `table[key]`.
    Put {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// Row bytes.
        value: Vec<u8>,
    },
    /// Remove `table[key]`.
    Delete {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
}

/// Frames a write set as a commit record.
pub fn encode(writes: &[Write]) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(writes, &mut payload).map_err(CoreError::codec)?;

    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec("commit record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&RECORD_MAGIC);
    data.extend_from_slice(&RECORD_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning one record out of a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// A complete, verified record and its total framed length.
    Record(Vec<Write>, usize),
    /// The buffer ends before the record does.
    Incomplete,
    /// The record is complete but its checksum does not match.
    BadChecksum,
}

/// Reads the record starting at `buf[0]`.
///
/// # Errors
///
/// [`CoreError::Corrupted`] for a bad magic or unknown version, reported at
/// `offset`.
pub fn scan(buf: &[u8], offset: u64) -> CoreResult<Scan> {
    if buf.len() < HEADER_SIZE {
        return Ok(Scan::Incomplete);
    }

    if buf[0..4] != RECORD_MAGIC {
        return Err(CoreError::Corrupted {
            offset,
            message: "invalid magic".into(),
        });
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version > RECORD_VERSION {
        return Err(CoreError::Corrupted {
            offset,
            message: format!("unsupported record version {version}"),
        });
    }

    let payload_len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if buf.len() < total {
        return Ok(Scan::Incomplete);
    }

    let payload_end = HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        buf[payload_end],
        buf[payload_end + 1],
        buf[payload_end + 2],
        buf[payload_end + 3],
    ]);
    if stored != compute_crc32(&buf[..payload_end]) {
        return Ok(Scan::BadChecksum);
    }

    let writes: Vec<Write> =
        ciborium::from_reader(&buf[HEADER_SIZE..payload_end]).map_err(|e| CoreError::Corrupted {
            offset,
            message: format!("undecodable payload: {e}"),
        })?;

    Ok(Scan::Record(writes, total))
}

/// CRC-32 (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
