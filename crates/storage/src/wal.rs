//! Write-ahead log for committed records.
//!
//! Frame layout: `[crc32 LE u32][len LE u32][JSON payload]`. Replay stops at
//! the first torn or corrupt frame and reports how many bytes were valid so
//! the engine can cut the tail before appending again.
//!
//! A failed append is rolled back to the last frame boundary. Anything
//! appended after a damaged frame would be cut on the next replay.

use crate::record::StorageRecord;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_LEN: u64 = 8;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("WAL frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("WAL unusable: a failed append could not be rolled back")]
    Failed,
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every append.
    Always,
    /// Fsync only when [`Wal::sync`] is called.
    Batch,
    /// Leave it to the OS.
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// Result of scanning a WAL file.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<StorageRecord>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// Whether anything after `valid_len` had to be ignored.
    pub discarded_tail: bool,
}

enum Frame {
    Record(StorageRecord, u64),
    End,
    Damaged(&'static str),
}

/// Append-only log handle.
#[derive(Debug)]
pub struct Wal {
    file: File,
    fsync: FsyncPolicy,
    /// End of the last complete frame.
    len: u64,
    /// Set when a rollback failed; every later append is refused.
    failed: bool,
    entries_written: u64,
}

impl Wal {
    /// Open `path` for appending, first cutting it to `valid_len` bytes.
    pub fn open(path: &Path, valid_len: u64, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!("truncating WAL {:?} to {} valid bytes", path, valid_len);
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::Start(valid_len))?;
        Ok(Self {
            file,
            fsync,
            len: valid_len,
            failed: false,
            entries_written: 0,
        })
    }

    /// Append one frame. On error nothing of the frame remains in the log.
    pub fn append(&mut self, record: &StorageRecord) -> Result<(), WalError> {
        if self.failed {
            return Err(WalError::Failed);
        }
        let frame = encode_frame(record)?;
        if let Err(e) = self.write_frame(&frame) {
            self.abort_append();
            return Err(e);
        }
        self.len += frame.len() as u64;
        self.entries_written += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), WalError> {
        self.file.write_all(frame)?;
        if self.fsync == FsyncPolicy::Always {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut whatever a failed append left behind so the next frame starts on
    /// a frame boundary.
    fn abort_append(&mut self) {
        let len = self.len;
        let cut = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)));
        match cut {
            Ok(_) => tracing::warn!("WAL append failed; rolled back to {} bytes", len),
            Err(e) => {
                tracing::error!(
                    "WAL rollback to {} bytes failed, refusing further appends: {}",
                    len,
                    e
                );
                self.failed = true;
            }
        }
    }

    /// Fsync (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        if self.failed {
            return Err(WalError::Failed);
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Number of entries appended since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Read every intact frame from `path`. A missing file replays as empty.
    pub fn replay(path: &Path) -> Result<Replay, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(WalError::Io(e)),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            match read_frame(&mut reader)? {
                Frame::Record(record, frame_len) => {
                    replay.records.push(record);
                    replay.valid_len += frame_len;
                }
                Frame::End => break,
                Frame::Damaged(reason) => {
                    tracing::warn!(
                        "WAL {:?}: {} after {} entries; ignoring tail",
                        path,
                        reason,
                        replay.records.len()
                    );
                    break;
                }
            }
        }
        replay.discarded_tail = replay.valid_len < total_len;
        Ok(replay)
    }
}

fn encode_frame(record: &StorageRecord) -> Result<Vec<u8>, WalError> {
    let payload = serde_json::to_vec(record)?;
    let len = u32::try_from(payload.len()).map_err(|_| WalError::FrameTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Fill `buf` completely; `Ok(false)` on EOF before the buffer is full.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(WalError::Io(e)),
    }
}

fn read_frame(reader: &mut impl Read) -> Result<Frame, WalError> {
    let mut header = [0u8; HEADER_LEN as usize];
    let mut got = 0;
    while got < header.len() {
        match reader.read(&mut header[got..]) {
            Ok(0) if got == 0 => return Ok(Frame::End),
            Ok(0) => return Ok(Frame::Damaged("torn frame header")),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        return Ok(Frame::Damaged("torn frame payload"));
    }
    if checksum(&payload) != crc {
        return Ok(Frame::Damaged("checksum mismatch"));
    }
    match serde_json::from_slice(&payload) {
        Ok(record) => Ok(Frame::Record(record, HEADER_LEN + len as u64)),
        Err(_) => Ok(Frame::Damaged("undecodable payload")),
    }
}
