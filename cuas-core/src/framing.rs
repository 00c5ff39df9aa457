//! CRLF line framing over an unreliable byte stream.
//!
//! Socket reads arrive in arbitrary chunks. `LineBuffer` accumulates them
//! and hands back complete `\r\n`-terminated lines, trimmed of surrounding
//! whitespace. A bare `\n` does not terminate a line. Line length is
//! capped so a peer that never sends a terminator cannot grow memory
//! without bound.

use crate::types::{CuasError, Result};

/// Default per-connection cap on unterminated bytes.
pub const MAX_LINE_BUFFER: usize = 10 * 1024;

#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl LineBuffer {
    pub fn new(limit: usize) -> Self {
        LineBuffer {
            buf: Vec::new(),
            limit,
        }
    }

    /// Append raw bytes. Fails once any buffered line, terminated or not,
    /// is longer than the limit; the caller is expected to drop the
    /// connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        if longest_line(&self.buf) > self.limit {
            return Err(CuasError::BufferOverflow { limit: self.limit });
        }
        Ok(())
    }

    /// Pop the next complete line, if any. Empty lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let idx = find_crlf(&self.buf)?;
            let raw: Vec<u8> = self.buf.drain(..idx + 2).collect();
            let line = String::from_utf8_lossy(&raw[..idx]).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        LineBuffer::new(MAX_LINE_BUFFER)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Length of the longest line in `buf`, counting a trailing unterminated
/// remainder as a line.
fn longest_line(buf: &[u8]) -> usize {
    let mut longest = 0;
    let mut rest = buf;
    while let Some(idx) = find_crlf(rest) {
        longest = longest.max(idx);
        rest = &rest[idx + 2..];
    }
    longest.max(rest.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut lb = LineBuffer::default();
        lb.push(b"serial=AB").unwrap();
        assert!(lb.next_line().is_none());
        lb.push(b"C,model=x\r\nfreq=1").unwrap();
        assert_eq!(lb.next_line().as_deref(), Some("serial=ABC,model=x"));
        assert!(lb.next_line().is_none());
        assert_eq!(lb.pending(), 6);
    }

    #[test]
    fn test_multiple_lines_one_chunk() {
        let mut lb = LineBuffer::default();
        lb.push(b"  OK \r\n\r\nAT+OK\r\n").unwrap();
        assert_eq!(lb.next_line().as_deref(), Some("OK"));
        assert_eq!(lb.next_line().as_deref(), Some("AT+OK"));
        assert!(lb.next_line().is_none());
    }

    #[test]
    fn test_bare_newline_does_not_terminate() {
        let mut lb = LineBuffer::default();
        lb.push(b"first\nsecond\r\n").unwrap();
        assert_eq!(lb.next_line().as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_overflow() {
        let mut lb = LineBuffer::new(16);
        lb.push(b"0123456789").unwrap();
        let err = lb.push(b"0123456789").unwrap_err();
        assert!(matches!(err, CuasError::BufferOverflow { limit: 16 }));
    }

    #[test]
    fn test_short_lines_in_large_chunk_are_accepted() {
        let mut lb = LineBuffer::new(16);
        lb.push(b"aaaaaaaaaa\r\nbbbbbbbbbb\r\n").unwrap();
        assert_eq!(lb.next_line().as_deref(), Some("aaaaaaaaaa"));
        assert_eq!(lb.next_line().as_deref(), Some("bbbbbbbbbb"));
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut lb = LineBuffer::new(16);
        lb.push(&[b'a'; 16]).unwrap();
        lb.push(b"\r\n").unwrap();
        assert_eq!(lb.next_line().map(|l| l.len()), Some(16));
    }

    #[test]
    fn test_oversized_line_rejected_even_when_terminated() {
        let mut lb = LineBuffer::default();
        lb.push(&[b'x'; 8192]).unwrap();

        let mut tail = vec![b'y'; 4094];
        tail.extend_from_slice(b"\r\n");
        let err = lb.push(&tail).unwrap_err();
        assert!(matches!(err, CuasError::BufferOverflow { limit: MAX_LINE_BUFFER }));
    }

    #[test]
    fn test_oversized_middle_line_rejected() {
        let mut lb = LineBuffer::new(16);
        let err = lb
            .push(b"ok\r\n0123456789abcdefXYZ\r\nok\r\n")
            .unwrap_err();
        assert!(matches!(err, CuasError::BufferOverflow { limit: 16 }));
    }
}
