//! Newline framing for robot telemetry
//!
//! The robot streams ASCII text over the Bluetooth link:
//! ```text
//! line ("\r"? "\n") line ("\r"? "\n") ...
//! ```
//!
//! Carriage returns are dropped wherever they appear, lines are trimmed and
//! blank lines are suppressed. A partial line stays buffered across chunks
//! until its newline arrives or the session ends.

use bytes::{Buf, BytesMut};
use std::collections::VecDeque;

use crate::link::RECEIVE_HISTORY_LINES;

/// Longest partial line held before it is force-emitted
pub const MAX_PENDING_BYTES: usize = 4096;

/// Prefix used when rendering received lines for display
pub const ROBOT_LINE_PREFIX: &str = "[Robot] ";

/// Reassembles newline-delimited lines from arbitrary byte chunks
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Bytes of the current partial line(s), carriage returns removed
    buffer: BytesMut,
}

impl LineFramer {
    /// Create a new framer with an empty buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Add a received chunk
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer
            .extend(data.iter().copied().filter(|&b| b != b'\r'));
    }

    /// Take the next complete, non-blank line
    ///
    /// Call this repeatedly until it returns `None` to drain the buffer
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n');
            let line = match newline {
                Some(pos) => {
                    let raw = self.buffer.split_to(pos);
                    self.buffer.advance(1);
                    raw
                }
                None if self.buffer.len() > MAX_PENDING_BYTES => {
                    self.buffer.split_to(MAX_PENDING_BYTES)
                }
                None => return None,
            };

            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    /// Drain every complete line currently buffered
    pub fn lines(&mut self) -> impl Iterator<Item = String> + '_ {
        std::iter::from_fn(move || self.next_line())
    }

    /// Flush the trailing partial line when the stream closes
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    /// Bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Display cache of the most recent telemetry lines.
///
/// Older lines are dropped; this is not a log.
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(RECEIVE_HISTORY_LINES)
    }
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Retained lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Lines as shown in the receive log
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{}{}", ROBOT_LINE_PREFIX, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut framer = LineFramer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            framer.extend(chunk);
            out.extend(framer.lines());
        }
        let tail = framer.finish();
        (out, tail)
    }

    #[test]
    fn test_partial_lines_across_chunks() {
        let (lines, tail) = frame_all(&[b"TEMP:2", b"1.5\nDIST", b":30\n", b"BAT"]);
        assert_eq!(lines, vec!["TEMP:21.5", "DIST:30"]);
        assert_eq!(tail.as_deref(), Some("BAT"));
    }

    #[test]
    fn test_carriage_returns_dropped() {
        let (lines, _) = frame_all(&[b"ok\r\n", b"\rmid\rdle\r", b"\n"]);
        assert_eq!(lines, vec!["ok", "middle"]);
        assert!(lines.iter().all(|l| !l.contains('\r')));
    }

    #[test]
    fn test_blank_lines_suppressed() {
        let (lines, tail) = frame_all(&[b"\n\n  \r\n first \n\n", b"second\n"]);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(tail.is_none());
    }

    #[test]
    fn test_concatenation_matches_input() {
        let input = b"ACK a\nACK b\nDIST:12\nACK p3:90;\npartial";
        // Split at every possible boundary
        for split in 0..input.len() {
            let (lines, tail) = frame_all(&[&input[..split], &input[split..]]);
            let mut rebuilt = lines.join("\n");
            rebuilt.push('\n');
            rebuilt.push_str(&tail.unwrap_or_default());
            assert_eq!(rebuilt.as_bytes(), input, "split at {}", split);
        }
    }

    #[test]
    fn test_pending_bytes_until_newline() {
        let mut framer = LineFramer::new();
        framer.extend(b"abc");
        assert!(framer.next_line().is_none());
        assert_eq!(framer.pending_len(), 3);
        framer.extend(b"\n");
        assert_eq!(framer.next_line().as_deref(), Some("abc"));
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_oversized_line_is_flushed() {
        let mut framer = LineFramer::new();
        framer.extend(&vec![b'x'; MAX_PENDING_BYTES + 10]);
        let line = framer.next_line().expect("forced flush");
        assert_eq!(line.len(), MAX_PENDING_BYTES);
        assert_eq!(framer.pending_len(), 10);
    }

    #[test]
    fn test_receive_buffer_keeps_last_six() {
        let mut buffer = ReceiveBuffer::default();
        for i in 0..10 {
            buffer.push(format!("line {}", i));
        }
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.lines().first().map(String::as_str), Some("line 4"));
        assert_eq!(buffer.lines().last().map(String::as_str), Some("line 9"));
        assert!(buffer.render().starts_with("[Robot] line 4\n[Robot] line 5"));
    }
}
