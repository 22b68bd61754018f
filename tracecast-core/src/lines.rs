//! Line reassembly for chunked subprocess output.
//!
//! Output arrives in fixed-size chunks that may cut a line (or a multi-byte
//! character) anywhere. Complete lines are released as soon as their `\n`
//! arrives; the unterminated remainder waits for the next chunk.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no `\n`
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.pending.split_to(pos + 1);
            lines.push(decode_line(&line[..pos]));
            self.scanned = 0;
        }
        self.scanned = self.pending.len();
        lines
    }

    /// Flush the unterminated remainder at end of stream.
    ///
    /// Whitespace-only remainders are dropped.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split();
        self.scanned = 0;
        let line = decode_line(&rest);
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"cycle 1: lo").is_empty());
        assert_eq!(splitter.pending_len(), 11);
        assert_eq!(splitter.push(b"ad done\ncycle 2"), vec!["cycle 1: load done"]);
        assert_eq!(splitter.push(b": store\n"), vec!["cycle 2: store"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_many_lines_in_one_chunk_keep_order() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"a\nb\r\n\nc\npartial");
        assert_eq!(lines, vec!["a", "b", "", "c"]);
        assert_eq!(splitter.finish(), Some("partial".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_multibyte_character_split_between_chunks() {
        let text = "启动模拟\n".as_bytes();
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(&text[..4]).is_empty());
        assert_eq!(splitter.push(&text[4..]), vec!["启动模拟"]);
    }

    #[test]
    fn test_long_line_fed_byte_by_byte() {
        let mut splitter = LineSplitter::new();
        let line = "x".repeat(10_000);
        for b in line.as_bytes() {
            assert!(splitter.push(std::slice::from_ref(b)).is_empty());
        }
        assert_eq!(splitter.pending_len(), 10_000);
        assert_eq!(splitter.push(b"\nnext\n"), vec![line, "next".to_string()]);
        assert_eq!(splitter.pending_len(), 0);

        assert!(splitter.push(b"tail").is_empty());
        assert_eq!(splitter.finish(), Some("tail".to_string()));
        assert_eq!(splitter.push(b"again\n"), vec!["again"]);
    }

    #[test]
    fn test_whitespace_only_remainder_is_dropped() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"done\n   ");
        assert_eq!(splitter.finish(), None);
    }
}
