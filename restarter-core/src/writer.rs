// Image write paths: staged firmware slot with atomic commit, and raw data
// partition with explicit erase/write.
//
// Both routines stream a response body in fixed-size chunks and emit one
// progress event per chunk. They know nothing about locks or shared state;
// the update manager translates events into locked progress updates.

use thiserror::Error;

use crate::fetch::{FetchError, HttpBody};

pub const WRITE_CHUNK_SIZE: usize = 1024;

/// Flash erase granularity; filesystem-image erases are rounded up to this.
pub const FLASH_ERASE_SECTOR: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Missing or non-positive declared content length.
    #[error("Invalid update size")]
    InvalidSize,
    #[error("Not enough OTA space")]
    InsufficientSpace,
    #[error("LittleFS partition not found")]
    PartitionNotFound,
    #[error("LittleFS image too large")]
    ImageTooLarge,
    /// Stream ended before the declared content length was received.
    #[error("Download interrupted")]
    Interrupted,
    #[error("{0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Firmware,
    Filesystem,
}

/// Raw per-stage progress. Scaling into the unified 0..=100 percentage is the
/// update manager's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub bytes_written: u64,
    pub total: u64,
}

/// Staged firmware update session over the platform's OTA primitive. Commit
/// is the only irreversible step; anything short of it leaves the running
/// image untouched.
pub trait FirmwareSlot {
    /// Open a staging session sized to the declared length. Fails fast when
    /// staging space is insufficient.
    fn begin(&mut self, total: u64) -> Result<(), UpdateError>;
    fn write(&mut self, chunk: &[u8]) -> Result<(), UpdateError>;
    /// Finalize and activate the staged image.
    fn commit(&mut self) -> Result<(), UpdateError>;
    /// Discard the staged session without activating anything.
    fn abort(&mut self);
}

/// Raw data partition. No atomic commit exists for this path; writes are
/// undefined without a prior erase covering the range.
pub trait DataPartition {
    fn capacity(&self) -> u64;
    /// Erase `[0, len)`; `len` is already sector-aligned.
    fn erase(&mut self, len: u64) -> Result<(), UpdateError>;
    fn write(&mut self, offset: u64, chunk: &[u8]) -> Result<(), UpdateError>;
}

/// Stream `body` into a staged firmware slot, committing only after exactly
/// the declared length has been written. A truncated stream or failed write
/// aborts the session; a partially staged image is never finalized.
pub fn write_firmware(
    body: &mut dyn HttpBody,
    slot: &mut dyn FirmwareSlot,
    mut sink: impl FnMut(Progress),
) -> Result<(), UpdateError> {
    let total = body
        .content_length()
        .filter(|len| *len > 0)
        .ok_or(UpdateError::InvalidSize)?;

    slot.begin(total)?;

    let mut buf = [0u8; WRITE_CHUNK_SIZE];
    let mut written: u64 = 0;
    while written < total {
        let want = usize::min((total - written) as usize, buf.len());
        let n = match body.read(&mut buf[..want]) {
            Ok(0) | Err(_) => {
                slot.abort();
                return Err(UpdateError::Interrupted);
            }
            Ok(n) => n,
        };
        if let Err(e) = slot.write(&buf[..n]) {
            slot.abort();
            return Err(e);
        }
        written += n as u64;
        sink(Progress {
            stage: Stage::Firmware,
            bytes_written: written,
            total,
        });
    }

    slot.commit()
}

/// Stream `body` into a raw data partition: size check, sector-aligned erase,
/// then sequential chunk writes. A mid-write failure leaves the partition
/// partially written; the caller treats that as fatal for the run.
pub fn write_filesystem(
    body: &mut dyn HttpBody,
    partition: &mut dyn DataPartition,
    mut sink: impl FnMut(Progress),
) -> Result<(), UpdateError> {
    let total = body
        .content_length()
        .filter(|len| *len > 0)
        .ok_or(UpdateError::InvalidSize)?;

    if total > partition.capacity() {
        return Err(UpdateError::ImageTooLarge);
    }

    let erase_len = total.div_ceil(FLASH_ERASE_SECTOR) * FLASH_ERASE_SECTOR;
    partition.erase(erase_len)?;

    let mut buf = [0u8; WRITE_CHUNK_SIZE];
    let mut written: u64 = 0;
    while written < total {
        let want = usize::min((total - written) as usize, buf.len());
        let n = match body.read(&mut buf[..want]) {
            Ok(0) | Err(_) => return Err(UpdateError::Interrupted),
            Ok(n) => n,
        };
        partition.write(written, &buf[..n])?;
        written += n as u64;
        sink(Progress {
            stage: Stage::Filesystem,
            bytes_written: written,
            total,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::TransportError;

    struct StreamBody {
        declared: u64,
        data: Vec<u8>,
        pos: usize,
        fail_read_at: Option<usize>,
    }

    impl StreamBody {
        fn new(data: Vec<u8>) -> Self {
            StreamBody {
                declared: data.len() as u64,
                data,
                pos: 0,
                fail_read_at: None,
            }
        }

        /// Body whose stream ends after `available` bytes even though
        /// `declared` more were promised.
        fn truncated(declared: u64, available: usize) -> Self {
            StreamBody {
                declared,
                data: vec![0xAB; available],
                pos: 0,
                fail_read_at: None,
            }
        }
    }

    impl HttpBody for StreamBody {
        fn status(&self) -> u16 {
            200
        }

        fn content_length(&self) -> Option<u64> {
            Some(self.declared)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if let Some(at) = self.fail_read_at {
                if self.pos >= at {
                    return Err(TransportError("connection reset".into()));
                }
            }
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Default)]
    struct MemSlot {
        begun: Option<u64>,
        staged: Vec<u8>,
        committed: bool,
        aborted: bool,
        capacity: u64,
        fail_write_after: Option<usize>,
    }

    impl MemSlot {
        fn with_capacity(capacity: u64) -> Self {
            MemSlot {
                capacity,
                ..Default::default()
            }
        }
    }

    impl FirmwareSlot for MemSlot {
        fn begin(&mut self, total: u64) -> Result<(), UpdateError> {
            if total > self.capacity {
                return Err(UpdateError::InsufficientSpace);
            }
            self.begun = Some(total);
            Ok(())
        }

        fn write(&mut self, chunk: &[u8]) -> Result<(), UpdateError> {
            if let Some(limit) = self.fail_write_after {
                if self.staged.len() + chunk.len() > limit {
                    return Err(UpdateError::WriteFailed("flash write error".into()));
                }
            }
            self.staged.extend_from_slice(chunk);
            Ok(())
        }

        fn commit(&mut self) -> Result<(), UpdateError> {
            self.committed = true;
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    #[derive(Debug, PartialEq)]
    enum PartOp {
        Erase(u64),
        Write(u64, usize),
    }

    struct MemPartition {
        capacity: u64,
        ops: Vec<PartOp>,
    }

    impl DataPartition for MemPartition {
        fn capacity(&self) -> u64 {
            self.capacity
        }

        fn erase(&mut self, len: u64) -> Result<(), UpdateError> {
            self.ops.push(PartOp::Erase(len));
            Ok(())
        }

        fn write(&mut self, offset: u64, chunk: &[u8]) -> Result<(), UpdateError> {
            self.ops.push(PartOp::Write(offset, chunk.len()));
            Ok(())
        }
    }

    #[test]
    fn firmware_commits_after_full_length() {
        let mut body = StreamBody::new(vec![0x5A; 3000]);
        let mut slot = MemSlot::with_capacity(1 << 20);
        let mut events = Vec::new();
        write_firmware(&mut body, &mut slot, |p| events.push(p)).unwrap();

        assert!(slot.committed);
        assert!(!slot.aborted);
        assert_eq!(slot.staged.len(), 3000);
        assert_eq!(events.last().unwrap().bytes_written, 3000);
        assert!(events.windows(2).all(|w| w[0].bytes_written <= w[1].bytes_written));
    }

    #[test]
    fn truncated_stream_never_commits() {
        let mut body = StreamBody::truncated(4096, 1500);
        let mut slot = MemSlot::with_capacity(1 << 20);
        let err = write_firmware(&mut body, &mut slot, |_| {}).unwrap_err();

        assert_eq!(err, UpdateError::Interrupted);
        assert!(slot.aborted);
        assert!(!slot.committed);
    }

    #[test]
    fn read_failure_mid_stream_aborts() {
        let mut body = StreamBody::new(vec![0x5A; 4096]);
        body.fail_read_at = Some(2048);
        let mut slot = MemSlot::with_capacity(1 << 20);
        let err = write_firmware(&mut body, &mut slot, |_| {}).unwrap_err();

        assert_eq!(err, UpdateError::Interrupted);
        assert!(slot.aborted && !slot.committed);
    }

    #[test]
    fn flash_write_failure_aborts_without_commit() {
        let mut body = StreamBody::new(vec![0x5A; 4096]);
        let mut slot = MemSlot::with_capacity(1 << 20);
        slot.fail_write_after = Some(2048);
        let err = write_firmware(&mut body, &mut slot, |_| {}).unwrap_err();

        assert_eq!(err, UpdateError::WriteFailed("flash write error".into()));
        assert!(slot.aborted && !slot.committed);
    }

    #[test]
    fn insufficient_space_fails_before_any_write() {
        let mut body = StreamBody::new(vec![0x5A; 4096]);
        let mut slot = MemSlot::with_capacity(1024);
        let err = write_firmware(&mut body, &mut slot, |_| {}).unwrap_err();

        assert_eq!(err, UpdateError::InsufficientSpace);
        assert!(slot.staged.is_empty());
    }

    #[test]
    fn missing_content_length_is_invalid_size() {
        struct NoLength;
        impl HttpBody for NoLength {
            fn status(&self) -> u16 {
                200
            }
            fn content_length(&self) -> Option<u64> {
                None
            }
            fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
                Ok(0)
            }
        }
        let mut slot = MemSlot::with_capacity(1 << 20);
        let err = write_firmware(&mut NoLength, &mut slot, |_| {}).unwrap_err();
        assert_eq!(err, UpdateError::InvalidSize);
    }

    #[test]
    fn filesystem_erases_aligned_range_before_first_write() {
        let mut body = StreamBody::new(vec![0xC3; 5000]);
        let mut part = MemPartition {
            capacity: 1 << 20,
            ops: Vec::new(),
        };
        write_filesystem(&mut body, &mut part, |_| {}).unwrap();

        // 5000 rounds up to two 4096-byte sectors.
        assert_eq!(part.ops[0], PartOp::Erase(8192));
        assert!(matches!(part.ops[1], PartOp::Write(0, _)));
        // Sequential offsets covering the whole image.
        let written: usize = part
            .ops
            .iter()
            .filter_map(|op| match op {
                PartOp::Write(_, len) => Some(*len),
                _ => None,
            })
            .sum();
        assert_eq!(written, 5000);
    }

    #[test]
    fn filesystem_image_larger_than_partition_is_rejected() {
        let mut body = StreamBody::new(vec![0xC3; 9000]);
        let mut part = MemPartition {
            capacity: 8192,
            ops: Vec::new(),
        };
        let err = write_filesystem(&mut body, &mut part, |_| {}).unwrap_err();
        assert_eq!(err, UpdateError::ImageTooLarge);
        assert!(part.ops.is_empty());
    }

    #[test]
    fn filesystem_truncation_is_interrupted() {
        let mut body = StreamBody::truncated(8192, 4096);
        let mut part = MemPartition {
            capacity: 1 << 20,
            ops: Vec::new(),
        };
        let err = write_filesystem(&mut body, &mut part, |_| {}).unwrap_err();
        assert_eq!(err, UpdateError::Interrupted);
    }
}
