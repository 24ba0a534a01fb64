use std::fmt;

use crate::ring::{MarkOrigin, RingBuffer, RingError};
use crate::traffic::LedData;

/// Speed the data source uses to flag a segment it could not measure.
pub const ERRONEOUS_SPEED: i8 = -1;
/// Speed marking a recognized non-standard segment; stored verbatim.
pub const SPECIAL_SPEED: i8 = -2;

/// One record pulled from the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvEntry {
    Record(LedData),
    /// The source reported this segment as erroneous (speed `-1`).
    Erroneous { led_num: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    MissingComma,
    InvalidLedNum,
    InvalidSpeed,
    UnexpectedNul,
    /// The scratch view filled up without reaching a record terminator.
    RecordTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvError {
    /// No complete record is buffered yet; store more bytes and retry.
    NotFound,
    Malformed(MalformedReason),
    Ring(RingError),
}

impl fmt::Display for CsvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvError::NotFound => write!(f, "no complete csv record buffered"),
            CsvError::Malformed(reason) => write!(f, "malformed csv record: {reason:?}"),
            CsvError::Ring(err) => write!(f, "csv ring error: {err}"),
        }
    }
}

impl std::error::Error for CsvError {}

impl From<RingError> for CsvError {
    fn from(value: RingError) -> Self {
        CsvError::Ring(value)
    }
}

/// Pulls `<ledNum>,<speed>` records out of a [`RingBuffer`].
///
/// The parser owns the scratch buffer that gives it a linear view of the
/// ring, so one parser lives for the duration of one fetch.
pub struct CsvEntryParser {
    scratch: Vec<u8>,
}

impl CsvEntryParser {
    pub fn new(scratch_len: usize) -> Self {
        Self {
            scratch: vec![0; scratch_len.max(1)],
        }
    }

    /// Parse the next record after the mark and commit the mark past its
    /// newline. Blank lines are skipped and committed. On `NotFound` or
    /// `Malformed` the mark never moves past a partial or bad record.
    pub fn next_entry(&mut self, ring: &mut RingBuffer) -> Result<CsvEntry, CsvError> {
        let filled = ring.read_from_mark(&mut self.scratch);
        let view = &self.scratch[..filled];

        let mut start = 0;
        loop {
            let rest = &view[start..];
            let skip = newline_len(rest);
            let Some(newline) = rest[skip..].iter().position(|b| *b == b'\n') else {
                if rest[skip..].contains(&0) {
                    return Err(CsvError::Malformed(MalformedReason::UnexpectedNul));
                }
                if start > 0 {
                    ring.advance_mark(start, MarkOrigin::PreviousMark)?;
                } else if filled == self.scratch.len() {
                    return Err(CsvError::Malformed(MalformedReason::RecordTooLong));
                }
                return Err(CsvError::NotFound);
            };

            let line_start = start + skip;
            let line_end = line_start + newline;
            let consumed = line_end + 1;
            let line = trim_cr(&view[line_start..line_end]);
            if line.is_empty() {
                start = consumed;
                continue;
            }

            let entry = parse_record(line)?;
            ring.advance_mark(consumed, MarkOrigin::PreviousMark)?;
            return Ok(entry);
        }
    }
}

fn newline_len(bytes: &[u8]) -> usize {
    if bytes.starts_with(b"\r\n") {
        2
    } else if bytes.starts_with(b"\n") {
        1
    } else {
        0
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_record(line: &[u8]) -> Result<CsvEntry, CsvError> {
    if line.contains(&0) {
        return Err(CsvError::Malformed(MalformedReason::UnexpectedNul));
    }
    let comma = line
        .iter()
        .position(|b| *b == b',')
        .ok_or(CsvError::Malformed(MalformedReason::MissingComma))?;
    let led_num: u16 = parse_field(&line[..comma])
        .ok_or(CsvError::Malformed(MalformedReason::InvalidLedNum))?;
    let speed: i8 = parse_field(&line[comma + 1..])
        .ok_or(CsvError::Malformed(MalformedReason::InvalidSpeed))?;

    if speed == ERRONEOUS_SPEED {
        return Ok(CsvEntry::Erroneous { led_num });
    }
    Ok(CsvEntry::Record(LedData { led_num, speed }))
}

fn parse_field<T: std::str::FromStr>(raw: &[u8]) -> Option<T> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(bytes: &[u8]) -> RingBuffer {
        let mut ring = RingBuffer::with_capacity(64).unwrap();
        ring.store(bytes).unwrap();
        ring
    }

    fn remaining(ring: &RingBuffer) -> Vec<u8> {
        let mut out = vec![0; ring.capacity()];
        let n = ring.read_from_mark(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn parses_record_and_commits_past_newline() {
        let mut ring = ring_with(b"4,71\r\n5");
        let mut parser = CsvEntryParser::new(16);
        let entry = parser.next_entry(&mut ring).unwrap();
        assert_eq!(entry, CsvEntry::Record(LedData { led_num: 4, speed: 71 }));
        assert_eq!(remaining(&ring), b"5");
    }

    #[test]
    fn skips_leading_newline() {
        let mut ring = ring_with(b"\n4,71\r\n5");
        let mut parser = CsvEntryParser::new(16);
        let entry = parser.next_entry(&mut ring).unwrap();
        assert_eq!(entry, CsvEntry::Record(LedData { led_num: 4, speed: 71 }));
    }

    #[test]
    fn skips_blank_lines() {
        let mut ring = ring_with(b"\n\r\n\n7,20\n");
        let mut parser = CsvEntryParser::new(16);
        let entry = parser.next_entry(&mut ring).unwrap();
        assert_eq!(entry, CsvEntry::Record(LedData { led_num: 7, speed: 20 }));
        assert!(remaining(&ring).is_empty());
    }

    #[test]
    fn not_found_leaves_mark_in_place() {
        let mut ring = ring_with(b"456\r");
        let mut parser = CsvEntryParser::new(16);
        assert_eq!(parser.next_entry(&mut ring), Err(CsvError::NotFound));
        assert_eq!(parser.next_entry(&mut ring), Err(CsvError::NotFound));
        assert_eq!(remaining(&ring), b"456\r");

        ring.store(b"\n").unwrap();
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::MissingComma))
        );
    }

    #[test]
    fn complete_line_without_comma_is_malformed() {
        let mut ring = ring_with(b"456\r\n1,2\n");
        let mut parser = CsvEntryParser::new(16);
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::MissingComma))
        );
        assert_eq!(remaining(&ring), b"456\r\n1,2\n");
    }

    #[test]
    fn trailing_blank_lines_are_released() {
        let mut ring = ring_with(b"1,2\n\n\r\n\n3");
        let mut parser = CsvEntryParser::new(16);
        parser.next_entry(&mut ring).unwrap();
        assert_eq!(parser.next_entry(&mut ring), Err(CsvError::NotFound));
        assert_eq!(remaining(&ring), b"\n3");
    }

    #[test]
    fn erroneous_and_special_speeds_are_distinguished() {
        let mut ring = ring_with(b"3,-1\n4,-2\n");
        let mut parser = CsvEntryParser::new(16);
        assert_eq!(
            parser.next_entry(&mut ring).unwrap(),
            CsvEntry::Erroneous { led_num: 3 }
        );
        assert_eq!(
            parser.next_entry(&mut ring).unwrap(),
            CsvEntry::Record(LedData {
                led_num: 4,
                speed: SPECIAL_SPEED
            })
        );
        assert_eq!(parser.next_entry(&mut ring), Err(CsvError::NotFound));
    }

    #[test]
    fn rejects_unparsable_fields() {
        let mut parser = CsvEntryParser::new(16);
        let mut ring = ring_with(b"x,5\n");
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::InvalidLedNum))
        );
        let mut ring = ring_with(b"5,300\n");
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::InvalidSpeed))
        );
        let mut ring = ring_with(b"5,\0\n");
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::UnexpectedNul))
        );
    }

    #[test]
    fn full_scratch_without_newline_is_too_long() {
        let mut ring = ring_with(b"12345678,9");
        let mut parser = CsvEntryParser::new(8);
        assert_eq!(
            parser.next_entry(&mut ring),
            Err(CsvError::Malformed(MalformedReason::RecordTooLong))
        );
    }

    #[test]
    fn record_split_at_every_point_parses_once() {
        let record = b"12,45\n";
        for split in 0..=record.len() {
            let mut ring = RingBuffer::with_capacity(16).unwrap();
            let mut parser = CsvEntryParser::new(16);
            let mut parsed = Vec::new();

            ring.store(&record[..split]).unwrap();
            match parser.next_entry(&mut ring) {
                Ok(entry) => parsed.push(entry),
                Err(CsvError::NotFound) => {}
                Err(other) => panic!("split {split}: unexpected {other:?}"),
            }
            ring.store(&record[split..]).unwrap();
            loop {
                match parser.next_entry(&mut ring) {
                    Ok(entry) => parsed.push(entry),
                    Err(CsvError::NotFound) => break,
                    Err(other) => panic!("split {split}: unexpected {other:?}"),
                }
            }

            assert_eq!(
                parsed,
                vec![CsvEntry::Record(LedData {
                    led_num: 12,
                    speed: 45
                })],
                "split at {split}"
            );
        }
    }
}
