//! Append-only persistence log
//!
//! One framed record per committed mutation, written in commit order and
//! replayed sequentially from offset 0 on open. Appends never rewrite
//! prior bytes; `shrink` rewrites the whole file from a live snapshot to
//! bound growth after many overwrites and deletes.
//!
//! Record format:
//! ```text
//! +--------+--------+---------+--------+
//! | Magic  | Length | Payload | CRC32C |
//! | 4B     | 4B     | var     | 4B     |
//! +--------+--------+---------+--------+
//! ```
//!
//! The payload is a bincode-encoded [`LogOp`]. A record whose magic or
//! checksum is wrong mid-stream means the log is corrupt and the open
//! fails; a record cut short at end of file is a torn final write and is
//! truncated away with a warning.

use crate::types::LogOp;
use burrow_core::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Log record magic number
const LOG_MAGIC: u32 = 0x42_41_4F_46; // "BAOF"

/// Record header size (magic + length)
const RECORD_HEADER_SIZE: usize = 8;

/// Sanity bound on a single record's payload
const MAX_PAYLOAD_SIZE: u32 = 1 << 30;

/// Write buffer size
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Append-only log file
pub struct Aof {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    /// Current log size in bytes
    size: AtomicU64,
    /// Log size right after the last shrink (or open)
    last_shrink_size: AtomicU64,
}

impl Aof {
    /// Open the log at `path`, replaying any existing records
    ///
    /// Returns the log handle plus the replayed operations in append
    /// order. A torn trailing record is truncated; corruption anywhere
    /// earlier fails the open.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<LogOp>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let (ops, valid_len) = replay(&path)?;

        let file_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if valid_len < file_len {
            warn!(
                "truncating torn log tail: {} -> {} bytes",
                file_len, valid_len
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        Ok((
            Self {
                path,
                writer: Mutex::new(writer),
                size: AtomicU64::new(valid_len),
                last_shrink_size: AtomicU64::new(valid_len),
            },
            ops,
        ))
    }

    /// Append a batch of operations in order, optionally fsyncing
    ///
    /// The batch is framed into one buffer and written under the writer
    /// lock, so records of a commit are never interleaved with another.
    pub fn append(&self, ops: &[LogOp], sync: bool) -> Result<()> {
        let mut buf = Vec::new();
        for op in ops {
            encode_record(&mut buf, op)?;
        }

        let mut writer = self.writer.lock();
        writer
            .write_all(&buf)
            .map_err(|e| Error::persistence(format!("log append failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| Error::persistence(format!("log flush failed: {e}")))?;
        if sync {
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| Error::persistence(format!("log sync failed: {e}")))?;
        }
        self.size.fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Flush and fsync any buffered appends
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .flush()
            .map_err(|e| Error::persistence(format!("log flush failed: {e}")))?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|e| Error::persistence(format!("log sync failed: {e}")))?;
        Ok(())
    }

    /// Current log size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Whether the log has grown enough past its last-shrunk size
    pub fn needs_shrink(&self, shrink_percentage: u64, min_size: u64) -> bool {
        let size = self.size();
        let baseline = self.last_shrink_size.load(Ordering::Relaxed).max(1);
        size > min_size && size > baseline.saturating_mul(100 + shrink_percentage) / 100
    }

    /// Rewrite the log to contain exactly `ops`
    ///
    /// Writes a temp file, fsyncs it, then atomically renames it over the
    /// live log and re-points the writer. The caller must hold writer
    /// exclusivity so no append races the swap.
    pub fn shrink(&self, ops: &[LogOp]) -> Result<()> {
        let tmp_path = self.path.with_extension("shrink.tmp");

        let mut buf = Vec::new();
        for op in ops {
            encode_record(&mut buf, op)?;
        }

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
            writer.write_all(&buf)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // Swap under the writer lock so no append lands in the old file
        let mut writer = self.writer.lock();
        writer
            .flush()
            .map_err(|e| Error::persistence(format!("log flush failed: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let new_size = buf.len() as u64;
        self.size.store(new_size, Ordering::Relaxed);
        self.last_shrink_size.store(new_size, Ordering::Relaxed);
        info!("shrunk log to {} records ({} bytes)", ops.len(), new_size);
        Ok(())
    }
}

/// Frame one operation into `buf`
fn encode_record(buf: &mut Vec<u8>, op: &LogOp) -> Result<()> {
    let payload =
        bincode::serialize(op).map_err(|e| Error::persistence(format!("log encode failed: {e}")))?;
    let start = buf.len();
    buf.extend_from_slice(&LOG_MAGIC.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    // CRC over everything before the CRC field
    let crc = crc32c::crc32c(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Replay all complete records, returning them and the valid byte length
fn replay(path: &Path) -> Result<(Vec<LogOp>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut ops = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        let n = read_fill(&mut reader, &mut header)?;
        if n == 0 {
            break; // clean end of log
        }
        if n < RECORD_HEADER_SIZE {
            warn!("torn record header at offset {}", offset);
            break;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != LOG_MAGIC {
            return Err(Error::corrupt(format!("bad record magic at offset {offset}")));
        }
        let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(Error::corrupt(format!(
                "implausible record length {payload_len} at offset {offset}"
            )));
        }

        let mut body = vec![0u8; payload_len as usize + 4];
        let n = read_fill(&mut reader, &mut body)?;
        if n < body.len() {
            warn!("torn record body at offset {}", offset);
            break;
        }

        let payload = &body[..payload_len as usize];
        let stored_crc = u32::from_le_bytes(
            body[payload_len as usize..]
                .try_into()
                .map_err(|_| Error::corrupt("short CRC field"))?,
        );
        let computed_crc = crc32c::crc32c_append(crc32c::crc32c(&header), payload);
        if computed_crc != stored_crc {
            return Err(Error::corrupt(format!("CRC mismatch at offset {offset}")));
        }

        let op: LogOp = bincode::deserialize(payload)
            .map_err(|e| Error::corrupt(format!("undecodable record at offset {offset}: {e}")))?;
        ops.push(op);
        offset += (RECORD_HEADER_SIZE + body.len()) as u64;
    }

    Ok((ops, offset))
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set_op(key: &str, value: &[u8]) -> LogOp {
        LogOp::Set {
            key: key.to_string(),
            value: value.to_vec(),
            expires_at: None,
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let (log, ops) = Aof::open(&path).unwrap();
            assert!(ops.is_empty());
            log.append(&[set_op("a", b"1"), set_op("b", b"2")], true).unwrap();
            log.append(&[LogOp::Delete { key: "a".into() }], true).unwrap();
        }

        let (_, ops) = Aof::open(&path).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], set_op("a", b"1"));
        assert_eq!(ops[2], LogOp::Delete { key: "a".into() });
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let (log, _) = Aof::open(&path).unwrap();
            log.append(&[set_op("a", b"1"), set_op("b", b"2")], true).unwrap();
        }

        // Cut the file mid-way through the last record
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        let (log, ops) = Aof::open(&path).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0], set_op("a", b"1"));

        // File was truncated back to the valid prefix; appending still works
        log.append(&[set_op("c", b"3")], true).unwrap();
        drop(log);

        let (_, ops) = Aof::open(&path).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1], set_op("c", b"3"));
    }

    #[test]
    fn test_corrupt_record_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let (log, _) = Aof::open(&path).unwrap();
            log.append(&[set_op("a", b"1"), set_op("b", b"2")], true).unwrap();
        }

        // Flip a payload byte in the first record
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[RECORD_HEADER_SIZE + 1] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = Aof::open(&path).map(|_| ()).unwrap_err();
        assert!(matches!(err, Error::CorruptLog(_)));
    }

    #[test]
    fn test_shrink_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        let (log, _) = Aof::open(&path).unwrap();
        for i in 0..100 {
            log.append(&[set_op("hot", format!("v{i}").as_bytes())], false)
                .unwrap();
        }
        log.sync().unwrap();
        let before = log.size();

        log.shrink(&[set_op("hot", b"v99")]).unwrap();
        assert!(log.size() < before);

        // Appends after shrink land in the new file
        log.append(&[set_op("x", b"y")], true).unwrap();
        drop(log);

        let (_, ops) = Aof::open(&path).unwrap();
        assert_eq!(ops, vec![set_op("hot", b"v99"), set_op("x", b"y")]);
    }

    #[test]
    fn test_needs_shrink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        let (log, _) = Aof::open(&path).unwrap();
        for _ in 0..50 {
            log.append(&[set_op("k", b"value")], false).unwrap();
        }
        log.sync().unwrap();

        // Below the minimum size nothing triggers
        assert!(!log.needs_shrink(100, 1024 * 1024));
        // With a tiny minimum, doubling since open triggers
        assert!(log.needs_shrink(100, 16));
    }
}
