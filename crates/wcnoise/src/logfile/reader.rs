// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequential reader for datagram log files.

use super::{LogFileError, LENGTH_PREFIX_LEN};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Reads the length-prefixed records of a log file, in order.
#[derive(Debug)]
pub struct LogReader<R = BufReader<File>> {
    reader: R,
    offset: u64,
    records: u64,
    failed: bool,
}

impl LogReader<BufReader<File>> {
    /// Open a log file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogFileError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LogFileError::FileOpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            records: 0,
            failed: false,
        }
    }

    /// Read the next record. `None` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, LogFileError> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let got = read_up_to(&mut self.reader, &mut prefix)?;
        if got == 0 {
            return Ok(None);
        }
        if got < LENGTH_PREFIX_LEN {
            return Err(LogFileError::Truncated {
                offset: self.offset,
                needed: LENGTH_PREFIX_LEN,
                got,
            });
        }

        let len = LittleEndian::read_u32(&prefix) as usize;
        let mut body = vec![0u8; len];
        let got = read_up_to(&mut self.reader, &mut body)?;
        if got < len {
            return Err(LogFileError::Truncated {
                offset: self.offset,
                needed: LENGTH_PREFIX_LEN + len,
                got: LENGTH_PREFIX_LEN + got,
            });
        }

        self.offset += (LENGTH_PREFIX_LEN + len) as u64;
        self.records += 1;
        Ok(Some(body))
    }

    /// Records read so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<Vec<u8>, LogFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the input allows; returns the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(bytes: &[u8]) -> Vec<u8> {
        let mut out = (bytes.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(bytes);
        out
    }

    #[test]
    fn test_reads_records_in_order() {
        let mut data = frame(&[1, 2, 3]);
        data.extend(frame(&[]));
        data.extend(frame(&[7; 10]));

        let mut reader = LogReader::new(Cursor::new(data));
        assert_eq!(reader.next_record().expect("read"), Some(vec![1, 2, 3]));
        assert_eq!(reader.next_record().expect("read"), Some(vec![]));
        assert_eq!(reader.next_record().expect("read"), Some(vec![7; 10]));
        assert_eq!(reader.next_record().expect("read"), None);
        assert_eq!(reader.records(), 3);
        assert_eq!(reader.offset(), 4 + 3 + 4 + 4 + 10);
    }

    #[test]
    fn test_truncated_body() {
        let mut data = frame(&[1, 2, 3]);
        data.extend(frame(&[5; 8]));
        data.truncate(data.len() - 3);

        let records: Vec<_> = LogReader::new(Cursor::new(data)).collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(
            records[1],
            Err(LogFileError::Truncated {
                offset: 7,
                needed: 12,
                got: 9
            })
        ));
    }

    #[test]
    fn test_truncated_prefix() {
        let data = vec![4u8, 0];
        let err = LogReader::new(Cursor::new(data))
            .next_record()
            .expect_err("truncated");
        assert!(matches!(err, LogFileError::Truncated { got: 2, .. }));
    }

    #[test]
    fn test_open_missing_file() {
        let err = LogReader::open("/nonexistent/wcnoise/none.out").expect_err("missing");
        assert!(matches!(err, LogFileError::FileOpenFailed { .. }));
    }
}
