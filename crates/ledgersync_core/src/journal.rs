//! Commit journal.
//!
//! Every committed write transaction becomes one framed record:
//!
//! ```text
//! | magic "LSJ1" (4) | version u16 (2) | length u32 (4) | CBOR payload | crc32 (4) |
//! ```
//!
//! The checksum covers the header and payload. On open the journal is
//! replayed from offset zero. An incomplete frame, or a corrupt one with no
//! intact frame after it, is a torn tail and is truncated. A corrupt frame
//! followed by intact frames fails the open.

use crate::error::{CoreError, CoreResult};
use crate::outbox::{OutboxId, OutboxItem};
use crate::tables::{Record, Table};
use chrono::{DateTime, Utc};
use ledgersync_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"LSJ1";

/// Current journal frame version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// One mutation inside a committed write transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum WriteOp {
    /// A migration created a table.
    CreateTable(Table),
    /// Insert or replace a record.
    Put(Record),
    /// Append an outbox item.
    Enqueue(OutboxItem),
    /// Drop acknowledged outbox items.
    RemoveOutbox(Vec<OutboxId>),
    /// A migration completed.
    SetSchemaVersion(u32),
}

/// A committed write transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Commit sequence number, starting at 1.
    pub sequence: u64,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
    /// Mutations, applied in order.
    pub ops: Vec<WriteOp>,
}

impl JournalRecord {
    /// Largest payload a frame can carry.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Encodes the record as a complete frame.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| CoreError::codec(e.to_string()))?;

        let len = u32::try_from(payload.len()).map_err(|_| {
            CoreError::invalid_operation(format!(
                "commit too large: {} bytes exceeds maximum of {} bytes",
                payload.len(),
                Self::MAX_PAYLOAD_SIZE
            ))
        })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decodes one frame from the front of `bytes`.
    ///
    /// Returns `Ok(None)` if `bytes` holds only part of a frame, or the record
    /// and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] for a bad magic, unknown
    /// version, checksum mismatch or undecodable payload.
    pub fn decode(bytes: &[u8]) -> CoreResult<Option<(Self, usize)>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        if bytes[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption("invalid frame magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "unsupported frame version {version}"
            )));
        }
        let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let total = HEADER_SIZE + len + CRC_SIZE;
        if bytes.len() < total {
            return Ok(None);
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let actual = compute_crc32(&bytes[..body_end]);
        if stored != actual {
            return Err(CoreError::journal_corruption(format!(
                "checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }

        let record: Self = ciborium::from_reader(&bytes[HEADER_SIZE..body_end])
            .map_err(|e| CoreError::journal_corruption(format!("undecodable payload: {e}")))?;
        Ok(Some((record, total)))
    }
}

/// The journal file (or buffer) behind an entity store.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Opens a journal and returns every durable record in commit order.
    ///
    /// A torn tail is truncated away.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] if a corrupt frame sits in
    /// front of intact ones; truncating there would drop committed writes.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, Vec<JournalRecord>)> {
        let size = backend.size()?;
        let len = usize::try_from(size)
            .map_err(|_| CoreError::invalid_format("journal larger than address space"))?;
        let bytes = backend.read_at(0, len)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut last_sequence = 0u64;
        while offset < bytes.len() {
            match JournalRecord::decode(&bytes[offset..]) {
                Ok(Some((record, used))) if record.sequence == last_sequence + 1 => {
                    last_sequence = record.sequence;
                    records.push(record);
                    offset += used;
                }
                Ok(Some((record, _))) => {
                    warn!(
                        offset,
                        expected = last_sequence + 1,
                        found = record.sequence,
                        "journal sequence gap, truncating"
                    );
                    break;
                }
                Ok(None) => {
                    warn!(offset, remaining = bytes.len() - offset, "torn journal tail, truncating");
                    break;
                }
                Err(e) => {
                    if let Some(intact) = intact_frame_after(&bytes, offset + 1) {
                        return Err(CoreError::journal_corruption(format!(
                            "corrupt frame at offset {offset} precedes an intact frame at offset {intact}: {e}"
                        )));
                    }
                    warn!(offset, error = %e, "corrupt journal tail, truncating");
                    break;
                }
            }
        }

        if offset < bytes.len() {
            backend.truncate(offset as u64)?;
            backend.sync()?;
        }

        debug!(records = records.len(), bytes = offset, "journal replayed");
        Ok((
            Self {
                backend,
                sync_on_commit,
            },
            records,
        ))
    }

    /// Appends a record and makes it durable.
    ///
    /// On failure the journal is cut back to its previous length so a later
    /// commit never lands behind a partial frame.
    pub(crate) fn append(&mut self, record: &JournalRecord) -> CoreResult<()> {
        let frame = record.encode()?;
        let start = self.backend.size()?;
        if let Err(e) = self.write_frame(&frame) {
            if let Err(cut) = self.backend.truncate(start) {
                warn!(error = %cut, "failed to roll back partial journal frame");
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

/// Offset of the first decodable frame at or after `from`.
fn intact_frame_after(bytes: &[u8], from: usize) -> Option<usize> {
    let last_start = bytes.len().saturating_sub(HEADER_SIZE - 1);
    (from..last_start)
        .filter(|&i| bytes[i..i + JOURNAL_MAGIC.len()] == JOURNAL_MAGIC)
        .find(|&i| matches!(JournalRecord::decode(&bytes[i..]), Ok(Some(_))))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
