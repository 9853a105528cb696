//! Append-only record log.

use crate::error::{Result, StoreError};
use crate::records::RecordIndex;
use crate::types::{Record, RecordId, Timestamp};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for each record frame.
const LOG_MAGIC: &[u8; 4] = b"PLR\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Record header size (fixed part).
const RECORD_HEADER_SIZE: usize = 4 + 1 + 1 + 8 + 8 + 4; // magic + version + flags + id + timestamp + payload len

/// Trailing checksum size.
const CHECKSUM_SIZE: usize = 4;

/// Mutable tail of the log. Guarded as one unit so that id assignment and
/// the write that uses it cannot interleave with another append.
struct LogTail {
    /// Next record ID to assign.
    next_id: u64,

    /// Current file size (for appending).
    size: u64,

    /// Number of writes since last sync.
    writes_since_sync: u64,
}

/// Append-only record log.
///
/// The log does not own a file handle: callers pass the handle of the
/// connection they leased for the operation, so reads never contend on a
/// shared cursor.
pub struct RecordLog {
    /// Path to the log file.
    path: PathBuf,

    tail: Mutex<LogTail>,

    /// Record ID to offset.
    index: RecordIndex,

    /// Sync every N writes (0 behaves as 1).
    sync_interval: u64,
}

impl RecordLog {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open a record log, scanning `file` to rebuild the index and the next id.
    ///
    /// A truncated frame at the very end of the log (a torn append) is cut off.
    /// A frame that fails its checksum anywhere is reported as corruption.
    pub fn open(path: impl AsRef<Path>, file: &mut File, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = RecordIndex::new();

        let file_size = file.metadata()?.len();
        let mut max_id = 0u64;
        let mut offset = 0u64;

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        while offset < file_size {
            match read_record(&mut reader) {
                Ok((record, len)) => {
                    if record.id.0 <= max_id {
                        return Err(StoreError::Corruption(format!(
                            "record id {} follows id {} at offset {}",
                            record.id, max_id, offset
                        )));
                    }
                    max_id = record.id.0;
                    index.add(record.id, offset);
                    offset += len;
                }
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        dropped_bytes = file_size - offset,
                        "truncating torn record at end of log"
                    );
                    drop(reader);
                    file.set_len(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            path,
            tail: Mutex::new(LogTail {
                next_id: max_id + 1,
                size: offset,
                writes_since_sync: 0,
            }),
            index,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a record to the log through `file`.
    ///
    /// Returns the record and the offset where it was written.
    pub fn append(&self, file: &mut File, payload: &str) -> Result<(Record, u64)> {
        let mut tail = self.tail.lock();

        let record = Record {
            id: RecordId(tail.next_id),
            payload: payload.to_owned(),
            created_at: Timestamp::now(),
        };
        let frame = encode_record(&record);

        let offset = tail.size;
        file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = file.write_all(&frame) {
            // Drop whatever part of the frame made it to disk.
            let _ = file.set_len(offset);
            return Err(e.into());
        }

        tail.writes_since_sync += 1;
        if tail.writes_since_sync >= self.sync_interval {
            file.sync_data()?;
            tail.writes_since_sync = 0;
        }

        tail.next_id += 1;
        tail.size = offset + frame.len() as u64;
        self.index.add(record.id, offset);

        Ok((record, offset))
    }

    /// Read up to `limit` records with id strictly greater than `after`, in
    /// ascending id order.
    pub fn read_after(&self, file: &mut File, after: RecordId, limit: usize) -> Result<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let end = self.tail.lock().size;
        let Some(start) = self.index.first_offset_after(after) else {
            return Ok(Vec::new());
        };

        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);
        let mut offset = start;
        let mut records = Vec::with_capacity(limit.min(64));

        while offset < end && records.len() < limit {
            let (record, len) = read_record(&mut reader)?;
            offset += len;
            records.push(record);
        }

        Ok(records)
    }

    /// Force pending writes to disk.
    pub fn sync(&self, file: &mut File) -> Result<()> {
        let mut tail = self.tail.lock();
        file.sync_all()?;
        tail.writes_since_sync = 0;
        Ok(())
    }

    /// Number of records in the log.
    pub fn len(&self) -> usize {
        self.index.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id written so far, or `RecordId::ZERO` for an empty log.
    pub fn last_id(&self) -> RecordId {
        RecordId(self.tail.lock().next_id - 1)
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.tail.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Serialize a record into a single frame so it reaches the file in one write.
fn encode_record(record: &Record) -> Vec<u8> {
    let payload = record.payload.as_bytes();
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + CHECKSUM_SIZE);

    buf.extend_from_slice(LOG_MAGIC);
    buf.push(LOG_VERSION);
    // Flags (reserved)
    buf.push(0u8);
    buf.extend_from_slice(&record.id.0.to_le_bytes());
    buf.extend_from_slice(&record.created_at.0.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    buf
}

/// Read one frame. Returns the record and the number of bytes consumed.
fn read_record(reader: &mut impl Read) -> Result<(Record, u64)> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if &header[0..4] != LOG_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid record magic".into()));
    }

    if header[4] != LOG_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported log version: {}",
            header[4]
        )));
    }

    let id = RecordId(u64::from_le_bytes(header[6..14].try_into().unwrap_or_default()));
    let created_at = Timestamp(i64::from_le_bytes(header[14..22].try_into().unwrap_or_default()));
    let payload_len = u32::from_le_bytes(header[22..26].try_into().unwrap_or_default()) as usize;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; CHECKSUM_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(&payload);
    let computed = hasher.finalize();

    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let payload = String::from_utf8(payload)
        .map_err(|e| StoreError::Corruption(format!("record {} payload is not UTF-8: {}", id, e)))?;

    let len = (RECORD_HEADER_SIZE + payload_len + CHECKSUM_SIZE) as u64;
    Ok((
        Record {
            id,
            payload,
            created_at,
        },
        len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn open_file(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");
        let mut file = open_file(&path);
        let log = RecordLog::open(&path, &mut file, 1).unwrap();

        let (record, offset) = log.append(&mut file, "hello").unwrap();

        assert_eq!(record.id, RecordId(1));
        assert_eq!(record.payload, "hello");
        assert_eq!(offset, 0);

        let records = log.read_after(&mut file, RecordId::ZERO, 10).unwrap();
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn test_read_after_bounds_and_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");
        let mut file = open_file(&path);
        let log = RecordLog::open(&path, &mut file, 100).unwrap();

        for i in 1..=10 {
            log.append(&mut file, &format!("record {}", i)).unwrap();
        }

        let ids: Vec<u64> = log
            .read_after(&mut file, RecordId(3), 4)
            .unwrap()
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);

        assert!(log.read_after(&mut file, RecordId(10), 5).unwrap().is_empty());
        assert!(log.read_after(&mut file, RecordId::ZERO, 0).unwrap().is_empty());
        assert_eq!(log.read_after(&mut file, RecordId(8), 100).unwrap().len(), 2);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");

        // Write some records
        {
            let mut file = open_file(&path);
            let log = RecordLog::open(&path, &mut file, 1).unwrap();
            for i in 1..=5 {
                log.append(&mut file, &format!("record {}", i)).unwrap();
            }
        }

        // Reopen and verify
        {
            let mut file = open_file(&path);
            let log = RecordLog::open(&path, &mut file, 1).unwrap();
            assert_eq!(log.len(), 5);
            assert_eq!(log.last_id(), RecordId(5));

            let (record, _offset) = log.append(&mut file, "record 6").unwrap();
            assert_eq!(record.id, RecordId(6)); // Should continue from max ID
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");

        let intact_size = {
            let mut file = open_file(&path);
            let log = RecordLog::open(&path, &mut file, 1).unwrap();
            log.append(&mut file, "one").unwrap();
            log.append(&mut file, "two").unwrap();
            log.size()
        };

        // Half a header of a third record
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&LOG_MAGIC[..]).unwrap();
            file.write_all(&[LOG_VERSION, 0, 3]).unwrap();
        }

        let mut file = open_file(&path);
        let log = RecordLog::open(&path, &mut file, 1).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.size(), intact_size);
        assert_eq!(file.metadata().unwrap().len(), intact_size);

        let (record, _) = log.append(&mut file, "three").unwrap();
        assert_eq!(record.id, RecordId(3));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");

        {
            let mut file = open_file(&path);
            let log = RecordLog::open(&path, &mut file, 1).unwrap();
            log.append(&mut file, "payload").unwrap();
        }

        // Flip a payload byte
        {
            let mut file = open_file(&path);
            file.seek(SeekFrom::Start(RECORD_HEADER_SIZE as u64)).unwrap();
            file.write_all(b"X").unwrap();
        }

        let mut file = open_file(&path);
        let result = RecordLog::open(&path, &mut file, 1);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }
}
