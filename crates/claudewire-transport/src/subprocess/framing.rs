//! Line reassembly for stdout chunks

/// Reassembles arbitrary byte chunks into newline-terminated lines
///
/// Each pushed chunk is appended to the buffer and split on `\n`. Every fragment
/// but the last is a complete line; the last fragment (possibly empty) stays in
/// the buffer. Splitting happens on bytes, so a chunk boundary inside a
/// multi-byte UTF-8 sequence is harmless.
///
/// ```
/// use claudewire_transport::LineBuffer;
///
/// let mut buffer = LineBuffer::new();
/// assert!(buffer.push(b"{\"a\":").is_empty());
/// assert_eq!(buffer.push(b"1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
/// assert_eq!(buffer.finish(), Some("{\"b\"".to_string()));
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the lines it completed
    ///
    /// Only the new chunk is scanned: the retained fragment never holds a
    /// newline, so a long line arriving in many chunks costs linear time.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut search = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[search..].iter().position(|b| *b == b'\n') {
            let end = search + pos;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            search = start;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        lines
    }

    /// Take the trailing unterminated fragment, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }

    /// Number of buffered bytes not yet forming a line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
