use super::health::{HealthLevel, HealthMonitor, RECORD_CEILING};
use crate::error::{Error, Result};
use crate::publication::Publication;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Bytes reserved at the start of the region for the write cursor
pub const HEADER_SIZE: usize = 3;

/// Default data capacity of the log
pub const DEFAULT_CAPACITY: usize = 65535 - HEADER_SIZE;

/// Added to the cursor when the header is valid; sets the top bit of the first byte
const VALID_MARK: usize = RECORD_CEILING + 1;

/// A fixed-size, memory-mapped circular log of dispatched publications.
///
/// Layout: a 3-byte big-endian header followed by the data region. The header
/// holds `position + 2^23` once a write epoch completed. A first byte below
/// 128 means the cursor cannot be trusted: the log is empty, or a write epoch
/// was interrupted.
pub struct RingBufferLog {
    map: MmapMut,
    path: PathBuf,
    capacity: usize,
    write_pos: usize,
    reloaded: bool,
    wrapped: bool,
    health: Arc<HealthMonitor>,
}

impl RingBufferLog {
    /// Open or create the backing file `dir/name` and map it.
    ///
    /// An existing file is mapped as-is; call [`recover_on_startup`] to restore
    /// the cursor. Records are never replayed.
    ///
    /// [`recover_on_startup`]: RingBufferLog::recover_on_startup
    pub fn open(
        dir: impl AsRef<Path>,
        name: &str,
        capacity: usize,
        health: Arc<HealthMonitor>,
    ) -> Result<Self> {
        if capacity <= HEADER_SIZE || capacity > RECORD_CEILING {
            return Err(Error::InvalidCapacity(capacity));
        }

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(name);
        let total_size = (HEADER_SIZE + capacity) as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() < total_size {
            file.set_len(total_size)?;
        }

        // Safety: the file is owned by this log for the lifetime of the broker;
        // concurrent modification by other processes is not supported.
        let map = unsafe { MmapOptions::new().len(total_size as usize).map_mut(&file)? };

        debug!("Mapped ring buffer log {} ({} bytes)", path.display(), total_size);

        Ok(Self {
            map,
            path,
            capacity,
            write_pos: 0,
            reloaded: false,
            wrapped: false,
            health,
        })
    }

    /// Restore the write cursor from the header. Returns whether it was reloaded.
    pub fn recover_on_startup(&mut self) -> bool {
        self.write_pos = 0;
        self.reloaded = false;

        let header = self.header();
        if header[0] < 0x80 {
            return false;
        }

        let position = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize - VALID_MARK;
        if position <= self.capacity {
            self.write_pos = position;
            self.reloaded = true;
            info!("Recovered ring buffer cursor at {} from {}", position, self.path.display());
        } else {
            debug!("Discarding out-of-range ring buffer cursor {}", position);
            if let Err(e) = self.reset_empty() {
                debug!("Failed to flush reset header: {}", e);
            }
        }
        self.reloaded
    }

    /// Open a write epoch before the first append of a dispatch cycle.
    ///
    /// A just-recovered cursor is left untouched. Otherwise an empty backlog
    /// resets the log, and a non-empty one void-marks the header until
    /// [`end_write_epoch`] runs.
    ///
    /// [`end_write_epoch`]: RingBufferLog::end_write_epoch
    pub fn begin_write_epoch(&mut self, queue_empty: bool) -> Result<()> {
        if self.reloaded {
            return Ok(());
        }
        self.wrapped = false;
        if queue_empty {
            self.reset_empty()
        } else {
            self.map[0] &= 0x7f;
            Ok(())
        }
    }

    /// Append one record at the cursor, wrapping past the end of the region
    pub fn append(&mut self, publication: &Publication) -> Result<()> {
        let record = publication.to_record();
        self.append_record(&record)
    }

    fn append_record(&mut self, record: &[u8]) -> Result<()> {
        let len = record.len();
        if len > self.capacity - HEADER_SIZE {
            return Err(Error::RecordTooLarge {
                len,
                capacity: self.capacity,
            });
        }

        let start = self.write_pos + HEADER_SIZE;
        if start + len >= self.capacity {
            let split = self.capacity.saturating_sub(start);
            self.map[start..start + split].copy_from_slice(&record[..split]);

            let remaining = len - split;
            self.map[HEADER_SIZE..HEADER_SIZE + remaining].copy_from_slice(&record[split..]);

            self.write_pos = remaining;
            self.wrapped = true;
        } else {
            self.map[start..start + len].copy_from_slice(record);
            self.write_pos += len % self.capacity;
        }
        Ok(())
    }

    /// Close the write epoch: classify the cursor and re-validate the header
    pub fn end_write_epoch(&mut self) -> HealthLevel {
        let position = self.health.evaluate(self.write_pos);
        self.write_header(position + VALID_MARK);
        self.reloaded = false;
        self.health.level()
    }

    /// Write an all-zero header and rewind the cursor
    pub fn reset_empty(&mut self) -> Result<()> {
        self.write_header(0);
        self.write_pos = 0;
        self.map.flush_range(0, HEADER_SIZE)?;
        Ok(())
    }

    /// Flush every dirty page to the backing file
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    fn write_header(&mut self, value: usize) {
        let bytes = (value as u32).to_be_bytes();
        self.map[..HEADER_SIZE].copy_from_slice(&bytes[1..]);
    }

    pub fn header(&self) -> [u8; HEADER_SIZE] {
        [self.map[0], self.map[1], self.map[2]]
    }

    /// Data region, excluding the header
    pub fn data(&self) -> &[u8] {
        &self.map[HEADER_SIZE..]
    }

    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_reloaded(&self) -> bool {
        self.reloaded
    }

    pub fn wrapped_this_epoch(&self) -> bool {
        self.wrapped
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::AckState;
    use tempfile::TempDir;

    const NAME: &str = "test.ring";

    fn open(dir: &TempDir, capacity: usize) -> RingBufferLog {
        let health = Arc::new(HealthMonitor::new(capacity));
        RingBufferLog::open(dir.path(), NAME, capacity, health).unwrap()
    }

    fn acked(topic: &str, payload: &str) -> Publication {
        let mut publication = Publication::new(topic, payload);
        publication.acknowledge();
        publication
    }

    #[test]
    fn test_append_writes_record_at_cursor() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir, DEFAULT_CAPACITY);
        log.recover_on_startup();
        log.begin_write_epoch(false).unwrap();

        log.append(&acked("first", "x")).unwrap();
        let before = log.write_position();
        log.append(&acked("weather", "22C")).unwrap();
        log.end_write_epoch();

        let expected = b"weather\x0022C\x00\x01\n";
        assert_eq!(&log.data()[before..before + expected.len()], expected);
        assert_eq!(log.write_position(), before + expected.len());
    }

    #[test]
    fn test_wraparound_splits_record() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir, 32);
        log.begin_write_epoch(false).unwrap();

        let publication = acked("ab", "cdefgh");
        let record = publication.to_record();
        assert_eq!(record.len(), 12);

        log.append(&publication).unwrap();
        log.append(&publication).unwrap();
        assert_eq!(log.write_position(), 24);
        assert!(!log.wrapped_this_epoch());

        // 3 + 24 + 12 crosses 32: five bytes fit before the boundary.
        let header = log.header();
        log.append(&publication).unwrap();
        assert_eq!(log.header(), header);
        let before_wrap = 32 - (24 + HEADER_SIZE);
        assert_eq!(before_wrap, 5);
        assert_eq!(log.write_position(), record.len() - before_wrap);
        assert!(log.wrapped_this_epoch());

        let mut reassembled = log.data()[24..24 + before_wrap].to_vec();
        reassembled.extend_from_slice(&log.data()[..log.write_position()]);
        assert_eq!(reassembled, record.to_vec());

        // Header stays void-marked while the epoch is open
        assert!(log.header()[0] < 0x80);
    }

    #[test]
    fn test_recovery_after_completed_epoch() {
        let dir = TempDir::new().unwrap();
        let position = {
            let mut log = open(&dir, DEFAULT_CAPACITY);
            assert!(!log.recover_on_startup());
            log.begin_write_epoch(false).unwrap();
            log.append(&acked("sensors", "42")).unwrap();
            log.append(&acked("sensors", "43")).unwrap();
            assert_eq!(log.end_write_epoch(), HealthLevel::Ok);
            assert!(log.header()[0] >= 0x80);
            log.flush().unwrap();
            log.write_position()
        };

        let mut log = open(&dir, DEFAULT_CAPACITY);
        assert!(log.recover_on_startup());
        assert_eq!(log.write_position(), position);
    }

    #[test]
    fn test_recovery_after_interrupted_epoch() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open(&dir, DEFAULT_CAPACITY);
            log.begin_write_epoch(false).unwrap();
            log.append(&acked("sensors", "42")).unwrap();
            log.end_write_epoch();
            assert!(log.write_position() > 0);

            // Crash between begin and end
            log.begin_write_epoch(false).unwrap();
            log.append(&acked("sensors", "43")).unwrap();
            log.flush().unwrap();
        }

        let mut log = open(&dir, DEFAULT_CAPACITY);
        assert!(!log.recover_on_startup());
        assert_eq!(log.write_position(), 0);
    }

    #[test]
    fn test_out_of_range_header_resets() {
        let dir = TempDir::new().unwrap();
        let capacity = 32;
        let mut bytes = vec![0u8; HEADER_SIZE + capacity];
        bytes[..HEADER_SIZE].copy_from_slice(&[0x80, 0x00, 0x64]);
        fs::write(dir.path().join(NAME), &bytes).unwrap();

        let mut log = open(&dir, capacity);
        assert!(!log.recover_on_startup());
        assert_eq!(log.write_position(), 0);
        assert_eq!(log.header(), [0, 0, 0]);
    }

    #[test]
    fn test_empty_backlog_resets_log() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir, DEFAULT_CAPACITY);
        log.begin_write_epoch(false).unwrap();
        log.append(&acked("a", "b")).unwrap();
        log.end_write_epoch();

        log.begin_write_epoch(true).unwrap();
        assert_eq!(log.header(), [0, 0, 0]);
        assert_eq!(log.write_position(), 0);
    }

    #[test]
    fn test_recovered_cursor_skips_first_epoch_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open(&dir, DEFAULT_CAPACITY);
            log.begin_write_epoch(false).unwrap();
            log.append(&acked("a", "b")).unwrap();
            log.end_write_epoch();
        }

        let mut log = open(&dir, DEFAULT_CAPACITY);
        assert!(log.recover_on_startup());
        let recovered = log.write_position();

        log.begin_write_epoch(true).unwrap();
        assert_eq!(log.write_position(), recovered);
        assert!(log.header()[0] >= 0x80);

        log.end_write_epoch();
        assert!(!log.is_reloaded());
        log.begin_write_epoch(false).unwrap();
        assert!(log.header()[0] < 0x80);
    }

    #[test]
    fn test_record_too_large() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir, 16);
        let err = log.append(&acked("topic", "payload that cannot fit")).unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { .. }));
        assert_eq!(log.write_position(), 0);
    }

    #[test]
    fn test_invalid_capacity() {
        let dir = TempDir::new().unwrap();
        let health = Arc::new(HealthMonitor::new(HEADER_SIZE));
        assert!(matches!(
            RingBufferLog::open(dir.path(), NAME, HEADER_SIZE, health),
            Err(Error::InvalidCapacity(_))
        ));
    }

    #[test]
    fn test_state_byte_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir, DEFAULT_CAPACITY);
        log.begin_write_epoch(false).unwrap();
        log.append(&Publication::new("t", "p")).unwrap();
        assert_eq!(log.data()[4], AckState::Pending.as_byte());
    }
}
