//! # Line Framer
//!
//! Splits the upstream byte stream into protocol lines. Bytes are buffered
//! undecoded until a newline arrives, so a multi-byte character split across
//! two chunks is decoded only once it is whole.

/// Incremental newline framer over raw bytes
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// The trailing fragment after the last newline stays buffered for the
    /// next call. Line terminators (`\n`, `\r\n`) are stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // Retained bytes hold no newline, so only the new chunk is scanned
        let mut scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
            scan_from = start;
        }
        self.pending.drain(..start);
        lines
    }

    /// Take whatever unterminated data is left when the stream ends
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    /// Buffered bytes not yet terminated by a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Lossy preview of the buffered fragment, for diagnostics
    pub fn pending_preview(&self, max_chars: usize) -> String {
        String::from_utf8_lossy(&self.pending)
            .chars()
            .take(max_chars)
            .collect()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(line) => line.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "Invalid UTF-8 in upstream line");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
