//! Event timestamp extraction straight from the raw ADC64 binary stream.
//!
//! An ADC64 data file is a sequence of event records. Every record starts with a 32-bit
//! little-endian sync word. The record layout relative to the start of the sync word is
//!
//! ```text
//! 0        4             12                  20              32          36
//! | sync   | (skipped)   | unix time (ms,u64) | (skipped)     | TAI (s,u32) |
//! ```
//!
//! Records are word aligned, so the scanners only test 4-byte words aligned to the start of
//! the file. Finding no sync word at all is not an error (the file may hold no events); a sync
//! word whose record is cut short by the end of the file is.
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::constants::{
    RECORD_TIMESTAMP_SPAN, REVERSE_SCAN_CHUNK_SIZE, SYNC_WORD, TAI_S_OFFSET, UNIX_MS_OFFSET,
    WORD_SIZE,
};
use super::error::ScanError;

/// The two clocks stamped into every event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimestamp {
    pub unix_ms: u64,
    pub tai_s: u32,
}

impl EventTimestamp {
    /// Unix time truncated to whole seconds
    pub fn unix_s(&self) -> u64 {
        self.unix_ms / 1000
    }
}

/// First and last event of a file. None means the file holds no sync word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSpan {
    pub first: Option<EventTimestamp>,
    pub last: Option<EventTimestamp>,
}

/// Scan a file on disk for both its first and last event
pub fn scan_file(path: &Path) -> Result<EventSpan, ScanError> {
    let mut reader = BufReader::new(File::open(path)?);
    let first = first_event(&mut reader)?;
    let last = last_event(&mut reader)?;
    Ok(EventSpan { first, last })
}

/// Walk the stream forward one aligned word at a time until the sync word is found
pub fn first_event<R: Read + Seek>(reader: &mut R) -> Result<Option<EventTimestamp>, ScanError> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut position: u64 = 0;
    loop {
        let word = match reader.read_u32::<LittleEndian>() {
            Ok(w) => w,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ScanError::IOError(e)),
        };
        if word == SYNC_WORD {
            return decode_record(reader, position, file_size).map(Some);
        }
        position += WORD_SIZE as u64;
    }
}

/// Walk the stream backward in fixed size chunks and take the last sync word of the first
/// chunk (from the tail) that contains one
pub fn last_event<R: Read + Seek>(reader: &mut R) -> Result<Option<EventTimestamp>, ScanError> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    // Chunk boundaries stay on the same word grid as the forward scan
    let mut chunk_end = file_size - (file_size % WORD_SIZE as u64);
    let mut chunk: Vec<u8> = vec![0; REVERSE_SCAN_CHUNK_SIZE];

    while chunk_end > 0 {
        let chunk_start = chunk_end.saturating_sub(REVERSE_SCAN_CHUNK_SIZE as u64);
        let chunk_len = (chunk_end - chunk_start) as usize;
        reader.seek(SeekFrom::Start(chunk_start))?;
        reader.read_exact(&mut chunk[..chunk_len])?;

        let last_match = chunk[..chunk_len]
            .chunks_exact(WORD_SIZE)
            .rposition(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) == SYNC_WORD);

        if let Some(word_index) = last_match {
            let offset = chunk_start + (word_index * WORD_SIZE) as u64;
            return decode_record(reader, offset, file_size).map(Some);
        }
        chunk_end = chunk_start;
    }
    Ok(None)
}

/// Decode the timestamps of the record whose sync word starts at `offset`
fn decode_record<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    file_size: u64,
) -> Result<EventTimestamp, ScanError> {
    if offset + RECORD_TIMESTAMP_SPAN > file_size {
        return Err(ScanError::TruncatedRecord { offset, file_size });
    }
    reader.seek(SeekFrom::Start(offset + UNIX_MS_OFFSET))?;
    let unix_ms = reader.read_u64::<LittleEndian>()?;
    reader.seek(SeekFrom::Start(offset + TAI_S_OFFSET))?;
    let tai_s = reader.read_u32::<LittleEndian>()?;
    Ok(EventTimestamp { unix_ms, tai_s })
}
