//! Crash-safe append-only log file: `memora.log`.
//!
//! Frame format, all integers little-endian:
//! `[u32 length][u8 kind][u64 seq][payload][u32 crc32(payload)]`.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::types::{MemoraError, MemoraResult};

use super::entry::LogEntry;

/// Log file name inside the data directory.
pub const LOG_FILE_NAME: &str = "memora.log";

/// Frame overhead: length (4) + kind (1) + seq (8) + crc (4).
const FRAME_OVERHEAD: usize = 17;

/// Upper bound on a single payload. A length beyond this cannot be a
/// real frame and is treated as a damaged tail.
const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// The append-only log. One writer owns it for the process lifetime.
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    writer: BufWriter<File>,
    next_seq: u64,
    fsync_window: Duration,
    last_fsync: Instant,
    last_append_latency: Duration,
}

impl AppendLog {
    /// Open or create the log under `data_dir`. Scans existing frames,
    /// truncating a damaged tail to the last good boundary. Damage in
    /// the interior surfaces as [`MemoraError::Corruption`].
    pub fn open(data_dir: &Path, fsync_window_ms: u64) -> MemoraResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOG_FILE_NAME);

        let scan = scan_log(&path)?;
        if scan.valid_len < scan.file_len {
            log::warn!(
                "truncating damaged log tail: {} -> {} bytes",
                scan.file_len,
                scan.valid_len
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_seq: scan.last_seq + 1,
            fsync_window: Duration::from_millis(fsync_window_ms),
            last_fsync: Instant::now(),
            last_append_latency: Duration::ZERO,
        })
    }

    /// Sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sequence number of the last committed entry (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Wall-clock latency of the most recent append.
    pub fn last_append_latency(&self) -> Duration {
        self.last_append_latency
    }

    /// Append one entry. Flushes the buffer; fsyncs when the batched
    /// fsync window has elapsed since the last sync.
    pub fn append(&mut self, entry: &LogEntry) -> MemoraResult<u64> {
        let started = Instant::now();
        let seq = self.next_seq;
        let payload = entry.encode_payload();
        let crc = crc32fast::hash(&payload);

        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&[entry.kind()])?;
        self.writer.write_all(&seq.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;

        if self.last_fsync.elapsed() >= self.fsync_window {
            self.writer.get_ref().sync_all()?;
            self.last_fsync = Instant::now();
        }

        self.next_seq += 1;
        self.last_append_latency = started.elapsed();
        Ok(seq)
    }

    /// Durability barrier: flush and fsync unconditionally.
    pub fn fsync(&mut self) -> MemoraResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.last_fsync = Instant::now();
        Ok(())
    }

    /// Lazy iterator over all committed entries, oldest first. Reads
    /// through an independent file handle.
    pub fn iter(&self) -> MemoraResult<LogIter> {
        LogIter::open(&self.path)
    }

    /// Lazy iterator over entries with `seq > after`.
    pub fn tail_after(
        &self,
        after: u64,
    ) -> MemoraResult<impl Iterator<Item = MemoraResult<(u64, LogEntry)>>> {
        Ok(self.iter()?.filter(move |item| match item {
            Ok((seq, _)) => *seq > after,
            Err(_) => true,
        }))
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazy frame reader used by replay.
pub struct LogIter {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
    failed: bool,
}

impl LogIter {
    fn open(path: &Path) -> MemoraResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_len,
            failed: false,
        })
    }

    fn read_frame(&mut self) -> MemoraResult<Option<(u64, LogEntry)>> {
        if self.offset + FRAME_OVERHEAD as u64 > self.file_len {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_PAYLOAD_SIZE || self.offset + (FRAME_OVERHEAD + len) as u64 > self.file_len {
            return Err(MemoraError::Corruption {
                offset: self.offset,
                detail: "frame extends past end of log".to_string(),
            });
        }

        let mut kind_buf = [0u8; 1];
        self.reader.read_exact(&mut kind_buf)?;
        let mut seq_buf = [0u8; 8];
        self.reader.read_exact(&mut seq_buf)?;
        let seq = u64::from_le_bytes(seq_buf);

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        let mut crc_buf = [0u8; 4];
        self.reader.read_exact(&mut crc_buf)?;

        if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
            return Err(MemoraError::Corruption {
                offset: self.offset,
                detail: "payload CRC mismatch".to_string(),
            });
        }

        let entry = LogEntry::decode_payload(kind_buf[0], &payload, self.offset)?;
        self.offset += (FRAME_OVERHEAD + len) as u64;
        Ok(Some((seq, entry)))
    }
}

impl Iterator for LogIter {
    type Item = MemoraResult<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_frame() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

struct ScanOutcome {
    /// Byte length of the valid prefix.
    valid_len: u64,
    /// Total file length observed.
    file_len: u64,
    /// Highest sequence number in the valid prefix (0 when empty).
    last_seq: u64,
}

/// Validate the log frame by frame.
///
/// A damaged frame at the physical tail is recoverable: the scan stops
/// and the caller truncates to the last good boundary. A damaged frame
/// followed by a parseable one is interior corruption and fatal.
fn scan_log(path: &Path) -> MemoraResult<ScanOutcome> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScanOutcome {
                valid_len: 0,
                file_len: 0,
                last_seq: 0,
            })
        }
        Err(err) => return Err(err.into()),
    };

    let file_len = data.len() as u64;
    let mut pos = 0usize;
    let mut last_seq = 0u64;

    loop {
        match check_frame(&data, pos) {
            FrameCheck::Ok { seq, next_pos } => {
                if seq != last_seq + 1 {
                    return Err(MemoraError::Corruption {
                        offset: pos as u64,
                        detail: format!("sequence gap: expected {}, found {seq}", last_seq + 1),
                    });
                }
                last_seq = seq;
                pos = next_pos;
            }
            FrameCheck::End => {
                return Ok(ScanOutcome {
                    valid_len: pos as u64,
                    file_len,
                    last_seq,
                })
            }
            FrameCheck::Damaged { next_pos } => {
                // Anything parseable after the damaged frame means the
                // damage is interior, not a torn tail write.
                if let Some(next) = next_pos {
                    if matches!(check_frame(&data, next), FrameCheck::Ok { .. }) {
                        return Err(MemoraError::Corruption {
                            offset: pos as u64,
                            detail: "CRC mismatch in log interior".to_string(),
                        });
                    }
                }
                return Ok(ScanOutcome {
                    valid_len: pos as u64,
                    file_len,
                    last_seq,
                });
            }
        }
    }
}

enum FrameCheck {
    Ok { seq: u64, next_pos: usize },
    /// Clean end of data at a frame boundary (or a short tail stub).
    End,
    /// Frame present but CRC-bad; `next_pos` is where the next frame
    /// would start, when the length field was plausible.
    Damaged { next_pos: Option<usize> },
}

fn check_frame(data: &[u8], pos: usize) -> FrameCheck {
    let remaining = data.len() - pos;
    if remaining == 0 {
        return FrameCheck::End;
    }
    if remaining < FRAME_OVERHEAD {
        // A stub shorter than any frame is a torn tail write.
        return FrameCheck::Damaged { next_pos: None };
    }

    let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return FrameCheck::Damaged { next_pos: None };
    }
    let frame_end = pos + FRAME_OVERHEAD + len;
    if frame_end > data.len() {
        return FrameCheck::Damaged { next_pos: None };
    }

    let seq = u64::from_le_bytes(data[pos + 5..pos + 13].try_into().unwrap());
    let payload = &data[pos + 13..pos + 13 + len];
    let stored_crc = u32::from_le_bytes(data[frame_end - 4..frame_end].try_into().unwrap());

    if crc32fast::hash(payload) != stored_crc {
        return FrameCheck::Damaged {
            next_pos: Some(frame_end),
        };
    }

    FrameCheck::Ok {
        seq,
        next_pos: frame_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;
    use tempfile::TempDir;

    fn node_entry(id: u64) -> LogEntry {
        LogEntry::Node(Node::with_label(id, &format!("n{id}")))
    }

    #[test]
    fn append_and_iterate() {
        let dir = TempDir::new().unwrap();
        let mut log = AppendLog::open(dir.path(), 1).unwrap();

        for id in 1..=5 {
            let seq = log.append(&node_entry(id)).unwrap();
            assert_eq!(seq, id);
        }
        assert_eq!(log.last_seq(), 5);

        let entries: Vec<_> = log.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].0, 1);
        assert_eq!(entries[4].0, 5);
    }

    #[test]
    fn sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = AppendLog::open(dir.path(), 1).unwrap();
            log.append(&node_entry(1)).unwrap();
            log.append(&node_entry(2)).unwrap();
            log.fsync().unwrap();
        }
        let mut log = AppendLog::open(dir.path(), 1).unwrap();
        assert_eq!(log.append(&node_entry(3)).unwrap(), 3);
    }

    #[test]
    fn tail_after_filters() {
        let dir = TempDir::new().unwrap();
        let mut log = AppendLog::open(dir.path(), 1).unwrap();
        for id in 1..=10 {
            log.append(&node_entry(id)).unwrap();
        }
        let tail: Vec<_> = log.tail_after(7).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].0, 8);
    }

    #[test]
    fn corrupt_tail_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut log = AppendLog::open(dir.path(), 1).unwrap();
            for id in 1..=10 {
                log.append(&node_entry(id)).unwrap();
            }
            log.fsync().unwrap();
            path = log.path().to_path_buf();
        }

        // Flip a payload byte inside the last frame.
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 10;
        data[last] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let log = AppendLog::open(dir.path(), 1).unwrap();
        let entries: Vec<_> = log.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 9);
        assert_eq!(log.last_seq(), 9);
    }

    #[test]
    fn torn_tail_write_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut log = AppendLog::open(dir.path(), 1).unwrap();
            for id in 1..=3 {
                log.append(&node_entry(id)).unwrap();
            }
            log.fsync().unwrap();
            path = log.path().to_path_buf();
        }

        // Simulate a torn write: half a frame of garbage at the end.
        let mut data = std::fs::read(&path).unwrap();
        let good_len = data.len();
        data.extend_from_slice(&[0x40, 0x00, 0x00, 0x00, 0x01, 0xde, 0xad]);
        std::fs::write(&path, &data).unwrap();

        let log = AppendLog::open(dir.path(), 1).unwrap();
        assert_eq!(log.last_seq(), 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len as u64);
    }

    #[test]
    fn interior_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path;
        let first_frame_end;
        {
            let mut log = AppendLog::open(dir.path(), 1).unwrap();
            log.append(&node_entry(1)).unwrap();
            first_frame_end = std::fs::metadata(log.path()).unwrap().len() as usize;
            log.append(&node_entry(2)).unwrap();
            log.fsync().unwrap();
            path = log.path().to_path_buf();
        }

        // Damage the first frame's payload, leaving the second intact.
        let mut data = std::fs::read(&path).unwrap();
        data[first_frame_end - 10] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let err = AppendLog::open(dir.path(), 1).unwrap_err();
        assert!(matches!(err, MemoraError::Corruption { .. }));
    }

    #[test]
    fn empty_log_opens_clean() {
        let dir = TempDir::new().unwrap();
        let log = AppendLog::open(dir.path(), 1).unwrap();
        assert_eq!(log.last_seq(), 0);
        assert_eq!(log.iter().unwrap().count(), 0);
    }
}
