//! Bounded output sink (C2): a size-capped byte buffer with truncation
//! accounting, used to capture a child process's stdout/stderr.

use std::io;

/// A write target that caps total delivered bytes. Writes past the cap are
/// silently discarded, but the reported written length always equals the
/// input length — well-behaved producers never see a short write and loop.
#[derive(Debug, Default, Clone)]
pub struct BoundedSink {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
    discarded: u64,
}

impl BoundedSink {
    /// `cap == 0` means unbounded.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
            discarded: 0,
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn unbounded(&self) -> bool {
        self.cap == 0
    }
}

impl io::Write for BoundedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.unbounded() {
            self.buf.extend_from_slice(data);
            return Ok(data.len());
        }

        let remaining = self.cap.saturating_sub(self.buf.len());
        let accepted = remaining.min(data.len());
        if accepted > 0 {
            self.buf.extend_from_slice(&data[..accepted]);
        }

        let rejected = data.len() - accepted;
        if rejected > 0 {
            self.truncated = true;
            self.discarded += rejected as u64;
        }

        // Report the full input length so the caller never sees a short
        // write and retries in a loop.
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_under_cap_passes_through() {
        let mut sink = BoundedSink::new(50);
        let n = sink.write(b"hello").unwrap();
        assert_eq!(n, 5);
        assert!(!sink.truncated());
        assert_eq!(sink.discarded(), 0);
        assert_eq!(sink.bytes(), b"hello");
    }

    #[test]
    fn test_partial_write_then_full_discard() {
        let mut sink = BoundedSink::new(10);
        let n1 = sink.write(&[b'a'; 8]).unwrap();
        assert_eq!(n1, 8);
        assert!(!sink.truncated());

        // only 2 bytes of room remain
        let n2 = sink.write(&[b'b'; 5]).unwrap();
        assert_eq!(n2, 5); // reported length always equals input length
        assert!(sink.truncated());
        assert_eq!(sink.discarded(), 3);
        assert_eq!(sink.bytes().len(), 10);

        // cap already full: entirely discarded
        let n3 = sink.write(&[b'c'; 4]).unwrap();
        assert_eq!(n3, 4);
        assert_eq!(sink.discarded(), 7);
        assert_eq!(sink.bytes().len(), 10);
    }

    #[test]
    fn test_unbounded_when_cap_zero() {
        let mut sink = BoundedSink::new(0);
        sink.write(&[0u8; 10_000]).unwrap();
        assert!(!sink.truncated());
        assert_eq!(sink.bytes().len(), 10_000);
    }

    #[test]
    fn test_exact_cap_no_truncation() {
        let mut sink = BoundedSink::new(5);
        let n = sink.write(b"hello").unwrap();
        assert_eq!(n, 5);
        assert!(!sink.truncated());
        assert_eq!(sink.discarded(), 0);
    }
}
