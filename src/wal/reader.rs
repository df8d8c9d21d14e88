//! Log reader for recovery.
//!
//! Damage at the end of a log is what a crash mid-append leaves behind and
//! is reported as [`Error::TruncatedLog`]; everything read before it is
//! intact. Damage followed by more valid-looking data cannot come from a
//! torn write and is reported as [`Error::Corruption`].

use std::fs;
use std::path::{Path, PathBuf};

use super::record::{checksum, Header, RecordType, HEADER_SIZE};
use crate::error::{Error, IoContext, Result};

/// Reads logical records from a log file.
pub struct LogReader {
    path: PathBuf,
    data: Vec<u8>,
    /// Offset of the next physical record
    position: usize,
}

impl LogReader {
    /// Loads the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = fs::read(&path).with_path("read", &path)?;
        Ok(Self {
            path,
            data,
            position: 0,
        })
    }

    /// Offset just past the last record returned.
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Path of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncated(&self, offset: usize, reason: impl Into<String>) -> Error {
        Error::TruncatedLog {
            offset: offset as u64,
            reason: reason.into(),
        }
    }

    fn corrupted(&self, offset: usize, reason: &str) -> Error {
        Error::corruption(format!(
            "{} at offset {} of {}",
            reason,
            offset,
            self.path.display()
        ))
    }

    /// Whether any offset at or after `from` starts a physical record whose
    /// checksum verifies. A torn append leaves nothing like that behind.
    fn intact_record_after(&self, from: usize) -> bool {
        (from..=self.data.len().saturating_sub(HEADER_SIZE)).any(|offset| {
            let Some(header) = Header::parse(&self.data[offset..]) else {
                return false;
            };
            let end = offset + HEADER_SIZE + header.length;
            RecordType::from_u8(header.record_type).is_some()
                && end <= self.data.len()
                && checksum(header.record_type, &self.data[offset + HEADER_SIZE..end])
                    == header.checksum
        })
    }

    /// Returns the next logical record, `Ok(None)` at a clean end of file.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut assembled: Option<(usize, Vec<u8>)> = None;
        loop {
            let pos = self.position;
            let rest = &self.data[pos..];
            let run_start = assembled.as_ref().map_or(pos, |(start, _)| *start);

            if rest.is_empty() {
                return match assembled {
                    Some(_) => Err(self.truncated(run_start, "fragment run cut off by end of file")),
                    None => Ok(None),
                };
            }
            if rest.iter().all(|b| *b == 0) {
                return Err(self.truncated(run_start, "zero-filled tail"));
            }
            let header = match Header::parse(rest) {
                Some(h) => h,
                None => return Err(self.truncated(run_start, "incomplete record header")),
            };
            let end = pos + HEADER_SIZE + header.length;
            if end > self.data.len() {
                if self.intact_record_after(pos + 1) {
                    return Err(self.corrupted(pos, "record length runs past intact records"));
                }
                return Err(self.truncated(run_start, "incomplete record payload"));
            }
            let payload = &self.data[pos + HEADER_SIZE..end];
            if checksum(header.record_type, payload) != header.checksum {
                if end == self.data.len() {
                    return Err(self.truncated(run_start, "checksum mismatch in last record"));
                }
                return Err(self.corrupted(pos, "checksum mismatch"));
            }
            let record_type = RecordType::from_u8(header.record_type)
                .ok_or_else(|| self.corrupted(pos, "unknown record type"))?;

            match (record_type, assembled.as_mut()) {
                (RecordType::Full, None) => {
                    let record = payload.to_vec();
                    self.position = end;
                    return Ok(Some(record));
                }
                (RecordType::First, None) => {
                    assembled = Some((pos, payload.to_vec()));
                }
                (RecordType::Middle, Some((_, buf))) => buf.extend_from_slice(payload),
                (RecordType::Last, Some((_, buf))) => {
                    let mut record = std::mem::take(buf);
                    record.extend_from_slice(payload);
                    self.position = end;
                    return Ok(Some(record));
                }
                (RecordType::Full | RecordType::First, Some(_)) => {
                    return Err(self.corrupted(pos, "fragment run interrupted"));
                }
                (RecordType::Middle | RecordType::Last, None) => {
                    return Err(self.corrupted(pos, "continuation fragment without a first fragment"));
                }
            }
            self.position = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::{encode_record, MAX_RECORD_SIZE};
    use crate::wal::writer::LogWriter;
    use tempfile::TempDir;

    fn write_log(path: &Path, records: &[Vec<u8>]) {
        let mut writer = LogWriter::create(path).unwrap();
        for r in records {
            writer.add_record(r).unwrap();
        }
        writer.sync().unwrap();
    }

    fn read_all(path: &Path) -> (Vec<Vec<u8>>, Option<Error>) {
        let mut reader = LogReader::open(path).unwrap();
        let mut out = Vec::new();
        loop {
            match reader.read_record() {
                Ok(Some(r)) => out.push(r),
                Ok(None) => return (out, None),
                Err(e) => return (out, Some(e)),
            }
        }
    }

    #[test]
    fn test_round_trip_with_fragments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        let records = vec![
            b"small".to_vec(),
            vec![7u8; MAX_RECORD_SIZE * 3 + 17],
            Vec::new(),
            b"tail".to_vec(),
        ];
        write_log(&path, &records);
        let (read, err) = read_all(&path);
        assert!(err.is_none());
        assert_eq!(read, records);
    }

    #[test]
    fn test_torn_payload_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second record".to_vec()]);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let (read, err) = read_all(&path);
        assert_eq!(read, vec![b"first".to_vec()]);
        match err {
            Some(Error::TruncatedLog { offset, .. }) => {
                assert_eq!(offset, (HEADER_SIZE + 5) as u64)
            }
            other => panic!("expected TruncatedLog, got {:?}", other),
        }
    }

    #[test]
    fn test_torn_header_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert_eq!(read.len(), 1);
        assert!(matches!(err, Some(Error::TruncatedLog { .. })));
    }

    #[test]
    fn test_zero_tail_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0u8; 64]);
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert_eq!(read.len(), 1);
        assert!(matches!(err, Some(Error::TruncatedLog { .. })));
    }

    #[test]
    fn test_bad_checksum_on_last_record_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert_eq!(read.len(), 1);
        assert!(matches!(err, Some(Error::TruncatedLog { .. })));
    }

    #[test]
    fn test_mid_file_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 1] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert!(read.is_empty());
        assert!(matches!(err, Some(Error::Corruption(_))));
    }

    #[test]
    fn test_overlong_length_before_intact_records_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        // High byte of the first record's length
        bytes[5] = 0xff;
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert!(read.is_empty());
        assert!(matches!(err, Some(Error::Corruption(_))), "got {:?}", err);
    }

    #[test]
    fn test_overlong_length_on_last_record_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 5 + 5] = 0xff;
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert_eq!(read, vec![b"first".to_vec()]);
        assert!(matches!(err, Some(Error::TruncatedLog { .. })), "got {:?}", err);
    }

    #[test]
    fn test_cut_fragment_run_is_truncated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec()]);
        let mut bytes = fs::read(&path).unwrap();
        let big = encode_record(&vec![3u8; MAX_RECORD_SIZE * 2]);
        // Keep the First fragment, drop the Last one.
        bytes.extend_from_slice(&big[..HEADER_SIZE + MAX_RECORD_SIZE]);
        fs::write(&path, &bytes).unwrap();
        let (read, err) = read_all(&path);
        assert_eq!(read.len(), 1);
        match err {
            Some(Error::TruncatedLog { offset, .. }) => {
                assert_eq!(offset, (HEADER_SIZE + 5) as u64)
            }
            other => panic!("expected TruncatedLog, got {:?}", other),
        }
    }
}
