use std::fmt;

/// Where `advance_mark` measures its offset from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOrigin {
    PreviousMark,
    OldestByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    ZeroCapacity,
    /// Storing would overwrite bytes the parser has not consumed yet.
    Overflow { requested: usize, available: usize },
    /// The mark would move past the newest written byte.
    MarkOutOfRange { requested: usize, retained: usize },
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::ZeroCapacity => write!(f, "ring buffer capacity must be non-zero"),
            RingError::Overflow {
                requested,
                available,
            } => write!(
                f,
                "ring buffer overflow: {requested} bytes requested, {available} available"
            ),
            RingError::MarkOutOfRange {
                requested,
                retained,
            } => write!(
                f,
                "mark offset {requested} is beyond the {retained} retained bytes"
            ),
        }
    }
}

impl std::error::Error for RingError {}

/// Fixed-capacity byte ring holding the unconsumed tail of a response stream.
///
/// `head` indexes the oldest retained byte, `len` counts retained bytes and
/// `mark` is measured from `head`, so `0 <= mark <= len` always holds. Bytes
/// before the mark are retired and reclaimed lazily by the next `store`.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Vec<u8>,
    head: usize,
    len: usize,
    mark: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            storage: vec![0; capacity],
            head: 0,
            len: 0,
            mark: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes between the mark and the newest written byte.
    pub fn unconsumed_len(&self) -> usize {
        self.len - self.mark
    }

    /// Append `bytes`, reclaiming retired space only as far as needed.
    ///
    /// A store that cannot fit without overwriting unconsumed bytes is
    /// rejected and leaves the buffer untouched.
    pub fn store(&mut self, bytes: &[u8]) -> Result<(), RingError> {
        let capacity = self.capacity();
        let available = capacity - self.unconsumed_len();
        if bytes.len() > available {
            return Err(RingError::Overflow {
                requested: bytes.len(),
                available,
            });
        }

        let free = capacity - self.len;
        if bytes.len() > free {
            let reclaim = bytes.len() - free;
            self.head = (self.head + reclaim) % capacity;
            self.len -= reclaim;
            self.mark -= reclaim;
        }

        let tail = (self.head + self.len) % capacity;
        let first = bytes.len().min(capacity - tail);
        self.storage[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = &bytes[first..];
        self.storage[..rest.len()].copy_from_slice(rest);
        self.len += bytes.len();
        Ok(())
    }

    /// Copy up to `out.len()` unconsumed bytes into `out` without consuming
    /// them. Returns the number of bytes copied.
    pub fn read_from_mark(&self, out: &mut [u8]) -> usize {
        let capacity = self.capacity();
        let count = out.len().min(self.unconsumed_len());
        let start = (self.head + self.mark) % capacity;
        let first = count.min(capacity - start);
        out[..first].copy_from_slice(&self.storage[start..start + first]);
        out[first..count].copy_from_slice(&self.storage[..count - first]);
        count
    }

    pub fn advance_mark(&mut self, offset: usize, origin: MarkOrigin) -> Result<(), RingError> {
        let base = match origin {
            MarkOrigin::PreviousMark => self.mark,
            MarkOrigin::OldestByte => 0,
        };
        let target = base
            .checked_add(offset)
            .filter(|target| *target <= self.len)
            .ok_or(RingError::MarkOutOfRange {
                requested: offset,
                retained: self.len - base,
            })?;
        self.mark = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconsumed(ring: &RingBuffer) -> Vec<u8> {
        let mut out = vec![0; ring.capacity()];
        let n = ring.read_from_mark(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            RingBuffer::with_capacity(0).unwrap_err(),
            RingError::ZeroCapacity
        );
    }

    #[test]
    fn read_does_not_consume() {
        let mut ring = RingBuffer::with_capacity(8).unwrap();
        ring.store(b"abc").unwrap();
        assert_eq!(unconsumed(&ring), b"abc");
        assert_eq!(unconsumed(&ring), b"abc");

        let mut small = [0u8; 2];
        assert_eq!(ring.read_from_mark(&mut small), 2);
        assert_eq!(&small, b"ab");
    }

    #[test]
    fn advance_mark_from_both_origins() {
        let mut ring = RingBuffer::with_capacity(8).unwrap();
        ring.store(b"abcdef").unwrap();
        ring.advance_mark(2, MarkOrigin::PreviousMark).unwrap();
        ring.advance_mark(1, MarkOrigin::PreviousMark).unwrap();
        assert_eq!(unconsumed(&ring), b"def");
        ring.advance_mark(1, MarkOrigin::OldestByte).unwrap();
        assert_eq!(unconsumed(&ring), b"bcdef");
    }

    #[test]
    fn advance_mark_past_newest_byte_fails() {
        let mut ring = RingBuffer::with_capacity(8).unwrap();
        ring.store(b"abc").unwrap();
        ring.advance_mark(2, MarkOrigin::PreviousMark).unwrap();
        let err = ring.advance_mark(2, MarkOrigin::PreviousMark).unwrap_err();
        assert_eq!(
            err,
            RingError::MarkOutOfRange {
                requested: 2,
                retained: 1
            }
        );
        assert_eq!(unconsumed(&ring), b"c");
        ring.advance_mark(1, MarkOrigin::PreviousMark).unwrap();
        assert_eq!(ring.unconsumed_len(), 0);
    }

    #[test]
    fn store_reclaims_consumed_bytes_and_wraps() {
        let mut ring = RingBuffer::with_capacity(6).unwrap();
        ring.store(b"abcd").unwrap();
        ring.advance_mark(3, MarkOrigin::PreviousMark).unwrap();
        ring.store(b"efgh").unwrap();
        assert_eq!(unconsumed(&ring), b"defgh");
        ring.advance_mark(4, MarkOrigin::PreviousMark).unwrap();
        ring.store(b"ijklm").unwrap();
        assert_eq!(unconsumed(&ring), b"hijklm");
    }

    #[test]
    fn store_keeps_retired_bytes_until_space_is_needed() {
        let mut ring = RingBuffer::with_capacity(8).unwrap();
        ring.store(b"abcd").unwrap();
        ring.advance_mark(2, MarkOrigin::PreviousMark).unwrap();
        ring.store(b"ef").unwrap();
        ring.advance_mark(0, MarkOrigin::OldestByte).unwrap();
        assert_eq!(unconsumed(&ring), b"abcdef");
    }

    #[test]
    fn overflow_is_rejected_without_side_effects() {
        let mut ring = RingBuffer::with_capacity(6).unwrap();
        ring.store(b"abcd").unwrap();
        ring.advance_mark(1, MarkOrigin::PreviousMark).unwrap();
        let err = ring.store(b"wxyz").unwrap_err();
        assert_eq!(
            err,
            RingError::Overflow {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(unconsumed(&ring), b"bcd");
        ring.store(b"xyz").unwrap();
        assert_eq!(unconsumed(&ring), b"bcdxyz");
    }
}
