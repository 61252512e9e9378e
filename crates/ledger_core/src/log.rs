//! Checksummed append-only record log.
//!
//! Both the client Local Store and the server store persist state as a
//! sequence of frames on a [`StorageBackend`]:
//!
//! ```text
//! | magic (4) | version (2) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers header and payload.
//!
//! ## Recovery
//!
//! A frame that runs past the end of the log, or a final frame whose checksum
//! does not match, is a torn write from a crash: it is dropped and the log is
//! truncated back to the last good frame. A bad frame followed by more data
//! is corruption and fails the open.

use crate::error::{CoreError, CoreResult};
use ledger_storage::StorageBackend;
use tracing::{debug, warn};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"LGSY";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// Size of the frame header (magic + version + length).
pub const FRAME_HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// An append-only log of opaque payloads.
pub struct RecordLog {
    backend: Box<dyn StorageBackend>,
    frames: u64,
}

impl RecordLog {
    /// Opens a log and replays it.
    ///
    /// Returns the log positioned for appending along with every intact
    /// payload in write order.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> CoreResult<(Self, Vec<Vec<u8>>)> {
        let bytes = backend.read_all()?;
        let (payloads, valid_len) = decode_frames(&bytes)?;

        if valid_len < bytes.len() {
            warn!(
                valid_len,
                total_len = bytes.len(),
                "dropping torn frame at end of record log"
            );
            backend.truncate(valid_len as u64)?;
        }

        debug!(frames = payloads.len(), "record log replayed");
        let log = Self {
            backend,
            frames: payloads.len() as u64,
        };
        Ok((log, payloads))
    }

    /// Wraps a backend that is known to hold no frames.
    #[must_use]
    pub fn empty(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend, frames: 0 }
    }

    /// Appends one payload and flushes it to stable storage.
    pub fn append(&mut self, payload: &[u8]) -> CoreResult<()> {
        self.append_all(&[payload.to_vec()])
    }

    /// Appends several payloads with a single write and flush.
    ///
    /// On failure the log is cut back to its previous length, so a batch is
    /// either entirely present after a restart or entirely absent.
    pub fn append_all(&mut self, payloads: &[Vec<u8>]) -> CoreResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for payload in payloads {
            buffer.extend_from_slice(&encode_frame(payload));
        }

        let before = self.backend.size()?;
        let result = self
            .backend
            .append(&buffer)
            .and_then(|_| self.backend.flush());
        if let Err(err) = result {
            if self.backend.size().map(|s| s > before).unwrap_or(false) {
                if let Err(undo) = self.backend.truncate(before) {
                    warn!(error = %undo, "failed to roll back partial log append");
                }
            }
            return Err(err.into());
        }

        self.frames += payloads.len() as u64;
        Ok(())
    }

    /// Replaces the whole log with the given payloads.
    pub fn rewrite(&mut self, payloads: &[Vec<u8>]) -> CoreResult<()> {
        let mut buffer = Vec::new();
        for payload in payloads {
            buffer.extend_from_slice(&encode_frame(payload));
        }
        self.backend.replace(&buffer)?;
        self.frames = payloads.len() as u64;
        Ok(())
    }

    /// Number of frames in the log.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Size of the log in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

/// Encodes one payload as a frame.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Decodes every intact frame.
///
/// Returns the payloads and the length of the valid prefix.
fn decode_frames(bytes: &[u8]) -> CoreResult<(Vec<Vec<u8>>, usize)> {
    let mut payloads = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }

        if rest[..4] != FRAME_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "invalid magic at offset {pos}"
            )));
        }

        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > FRAME_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported frame version {version} at offset {pos}"
            )));
        }

        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let total = FRAME_HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }

        let body_end = FRAME_HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = compute_crc32(&rest[..body_end]);
        if stored != computed {
            if rest.len() == total {
                break;
            }
            return Err(CoreError::ChecksumMismatch {
                offset: pos as u64,
                expected: stored,
                actual: computed,
            });
        }

        payloads.push(rest[FRAME_HEADER_SIZE..body_end].to_vec());
        pos += total;
    }

    Ok((payloads, pos))
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 {
                    0xEDB8_8320 ^ (c >> 1)
                } else {
                    c >> 1
                };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_storage::InMemoryBackend;

    fn open(backend: &InMemoryBackend) -> (RecordLog, Vec<Vec<u8>>) {
        RecordLog::open(Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn append_and_replay() {
        let backend = InMemoryBackend::new();
        {
            let (mut log, replayed) = open(&backend);
            assert!(replayed.is_empty());
            log.append(b"one").unwrap();
            log.append_all(&[b"two".to_vec(), b"three".to_vec()]).unwrap();
            assert_eq!(log.frame_count(), 3);
        }

        let (log, replayed) = open(&backend);
        assert_eq!(replayed, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(log.frame_count(), 3);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut bytes = encode_frame(b"kept");
        let good_len = bytes.len();
        let torn = encode_frame(b"half-written");
        bytes.extend_from_slice(&torn[..torn.len() - 3]);

        let backend = InMemoryBackend::with_data(bytes);
        let (_, replayed) = open(&backend);
        assert_eq!(replayed, vec![b"kept".to_vec()]);
        assert_eq!(backend.data().len(), good_len);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let mut bytes = encode_frame(b"kept");
        let mut last = encode_frame(b"garbled");
        let n = last.len();
        last[n - 6] ^= 0xFF;
        bytes.extend_from_slice(&last);

        let backend = InMemoryBackend::with_data(bytes);
        let (_, replayed) = open(&backend);
        assert_eq!(replayed.len(), 1);
    }

    #[test]
    fn bad_checksum_in_middle_is_corruption() {
        let mut first = encode_frame(b"first");
        first[FRAME_HEADER_SIZE] ^= 0xFF;
        let mut bytes = first;
        bytes.extend_from_slice(&encode_frame(b"second"));

        let result = RecordLog::open(Box::new(InMemoryBackend::with_data(bytes)));
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { offset: 0, .. })));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = encode_frame(b"first");
        bytes[0] = b'X';
        let result = RecordLog::open(Box::new(InMemoryBackend::with_data(bytes)));
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn failed_append_leaves_log_unchanged() {
        let backend = InMemoryBackend::new();
        let (mut log, _) = open(&backend);
        log.append(b"one").unwrap();

        backend.fail_writes(true);
        assert!(log.append(b"two").is_err());
        backend.fail_writes(false);

        let (_, replayed) = open(&backend);
        assert_eq!(replayed, vec![b"one".to_vec()]);
    }

    #[test]
    fn rewrite_replaces_frames() {
        let backend = InMemoryBackend::new();
        let (mut log, _) = open(&backend);
        log.append(b"a").unwrap();
        log.append(b"b").unwrap();
        log.rewrite(&[b"c".to_vec()]).unwrap();
        assert_eq!(log.frame_count(), 1);

        let (_, replayed) = open(&backend);
        assert_eq!(replayed, vec![b"c".to_vec()]);
    }
}
