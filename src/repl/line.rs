// src/repl/line.rs
//
// Line assembly for the incoming character stream.
// Bytes accumulate until the configured terminator arrives, then the buffer
// content (without the terminator) is released as one line.

use serde::{Deserialize, Serialize};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Default upper bound on a single buffered line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

// ============================================================================
// Types
// ============================================================================

/// Which character ends a line coming back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// `\n` terminates. A `\r` directly before it is stripped.
    #[default]
    Lf,
    /// `\r` terminates. A `\n` directly after it is swallowed.
    Cr,
    /// Either terminates. A CRLF pair counts once.
    Any,
}

impl LineEnding {
    /// Parse "lf", "cr" or "any" (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lf" | "newline" => Some(LineEnding::Lf),
            "cr" | "return" => Some(LineEnding::Cr),
            "any" | "crlf" => Some(LineEnding::Any),
            _ => None,
        }
    }
}

/// Accumulator for the characters received since the last terminator.
///
/// One assembler lives per connection session. It is reset on connect and on
/// disconnect, so a partial line never spans a reconnect.
#[derive(Debug)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    ending: LineEnding,
    max_length: usize,
    /// The previous byte was a CR that ended a line (CR and Any modes)
    after_cr: bool,
    /// A CR not yet known to be content or the first half of CRLF (LF mode)
    held_cr: bool,
}

impl LineAssembler {
    pub fn new(ending: LineEnding, max_length: usize) -> Self {
        LineAssembler {
            buffer: Vec::new(),
            ending,
            max_length: max_length.max(1),
            after_cr: false,
            held_cr: false,
        }
    }

    /// Feed one byte. Returns the completed line when `byte` finishes one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        let after_cr = std::mem::replace(&mut self.after_cr, false);

        match (self.ending, byte) {
            (LineEnding::Lf, LF) => {
                self.held_cr = false;
                return Some(self.take_line());
            }
            (LineEnding::Lf, CR) => {
                // An earlier held CR was content after all
                return if std::mem::replace(&mut self.held_cr, true) {
                    self.append(&[CR])
                } else {
                    None
                };
            }
            (LineEnding::Cr | LineEnding::Any, CR) => {
                self.after_cr = true;
                return Some(self.take_line());
            }
            // Second half of a CRLF pair
            (LineEnding::Cr | LineEnding::Any, LF) if after_cr => return None,
            (LineEnding::Any, LF) => return Some(self.take_line()),
            _ => {}
        }

        if std::mem::take(&mut self.held_cr) {
            self.append(&[CR, byte])
        } else {
            self.append(&[byte])
        }
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.after_cr = false;
        self.held_cr = false;
    }

    /// Number of bytes buffered since the last terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + usize::from(self.held_cr)
    }

    /// Add content bytes. A buffer that would grow past `max_length` is
    /// flushed first, without a terminator.
    fn append(&mut self, bytes: &[u8]) -> Option<String> {
        let split = if !self.buffer.is_empty() && self.buffer.len() + bytes.len() > self.max_length
        {
            Some(self.take_split())
        } else {
            None
        };
        self.buffer.extend_from_slice(bytes);
        split
    }

    /// Forced flush. An unfinished UTF-8 sequence at the end stays buffered
    /// for the next line.
    fn take_split(&mut self) -> String {
        let cut = utf8_boundary(&self.buffer);
        let tail = self.buffer.split_off(cut);
        let line = self.take_line();
        self.buffer = tail;
        line
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Length of the prefix of `bytes` that does not end inside a multi-byte
/// UTF-8 sequence. The whole length when nothing can be cut off.
fn utf8_boundary(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let Some(start) = (len.saturating_sub(4)..len)
        .rev()
        .find(|&i| bytes[i] & 0xC0 != 0x80)
    else {
        return len;
    };

    let width = match bytes[start] {
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        b if b & 0xF8 == 0xF0 => 4,
        _ => 1,
    };
    if start > 0 && start + width > len {
        start
    } else {
        len
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        LineAssembler::new(LineEnding::default(), DEFAULT_MAX_LINE_LENGTH)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LineAssembler, data: &[u8]) -> Vec<String> {
        data.iter().filter_map(|&b| assembler.push(b)).collect()
    }

    #[test]
    fn test_partial_line_is_held() {
        let mut a = LineAssembler::default();
        assert!(feed(&mut a, b"2 2 + .").is_empty());
        assert_eq!(a.pending_len(), 7);
    }

    #[test]
    fn test_lines_between_terminators() {
        let mut a = LineAssembler::default();
        let lines = feed(&mut a, b"Line 1\nLine 2\nLine 3\n");
        assert_eq!(lines, vec!["Line 1", "Line 2", "Line 3"]);
        assert_eq!(a.pending_len(), 0);
    }

    #[test]
    fn test_lf_strips_cr_before_terminator() {
        let mut a = LineAssembler::new(LineEnding::Lf, 64);
        assert_eq!(feed(&mut a, b"ok\r\n"), vec!["ok"]);
    }

    #[test]
    fn test_lf_keeps_inner_cr() {
        let mut a = LineAssembler::new(LineEnding::Lf, 64);
        assert_eq!(feed(&mut a, b"ab\rcd\n"), vec!["ab\rcd"]);
    }

    #[test]
    fn test_lf_mode_never_flushes_on_cr_alone() {
        let mut a = LineAssembler::new(LineEnding::Lf, 64);
        assert!(feed(&mut a, b"Hello, FORTH!\r").is_empty());
    }

    #[test]
    fn test_empty_lines_are_delivered() {
        let mut a = LineAssembler::new(LineEnding::Lf, 64);
        assert_eq!(feed(&mut a, b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_cr_mode_swallows_following_lf() {
        let mut a = LineAssembler::new(LineEnding::Cr, 64);
        assert_eq!(feed(&mut a, b"Hello, FORTH!\r\n"), vec!["Hello, FORTH!"]);
        assert_eq!(feed(&mut a, b"next\r"), vec!["next"]);
    }

    #[test]
    fn test_cr_mode_keeps_lone_lf() {
        let mut a = LineAssembler::new(LineEnding::Cr, 64);
        assert_eq!(feed(&mut a, b"a\nb\r"), vec!["a\nb"]);
    }

    #[test]
    fn test_any_mode_accepts_all_conventions() {
        let mut a = LineAssembler::new(LineEnding::Any, 64);
        let lines = feed(&mut a, b"one\ntwo\rthree\r\nfour\n");
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_any_mode_crlf_blank_line() {
        let mut a = LineAssembler::new(LineEnding::Any, 64);
        assert_eq!(feed(&mut a, b"a\r\n\r\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_max_length_forces_split() {
        let mut a = LineAssembler::new(LineEnding::Lf, 5);
        let lines = feed(&mut a, b"abcdefg\n");
        assert_eq!(lines, vec!["abcde", "fg"]);
    }

    #[test]
    fn test_crlf_at_max_length_is_one_line() {
        let mut a = LineAssembler::new(LineEnding::Lf, 5);
        assert_eq!(feed(&mut a, b"abcd\r\nnext\n"), vec!["abcd", "next"]);
        assert_eq!(feed(&mut a, b"abcde\r\n"), vec!["abcde"]);
    }

    #[test]
    fn test_lf_held_cr_becomes_content() {
        let mut a = LineAssembler::new(LineEnding::Lf, 64);
        assert_eq!(feed(&mut a, b"a\r\r\n"), vec!["a\r"]);
        assert_eq!(feed(&mut a, b"x\r"), Vec::<String>::new());
        assert_eq!(a.pending_len(), 2);
    }

    #[test]
    fn test_max_length_split_keeps_utf8_chars_whole() {
        let mut a = LineAssembler::new(LineEnding::Lf, 4);
        assert_eq!(feed(&mut a, "abcµ\n".as_bytes()), vec!["abc", "µ"]);

        let mut a = LineAssembler::new(LineEnding::Lf, 3);
        assert_eq!(feed(&mut a, "ab✓\n".as_bytes()), vec!["ab", "✓"]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut a = LineAssembler::default();
        feed(&mut a, b"partial\r");
        a.reset();
        assert_eq!(feed(&mut a, b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_reset_clears_pending_crlf_state() {
        let mut a = LineAssembler::new(LineEnding::Cr, 64);
        feed(&mut a, b"x\r");
        a.reset();
        // A leading LF after a reset belongs to the new session's content
        assert!(feed(&mut a, b"\n").is_empty());
        assert_eq!(a.pending_len(), 1);
    }

    #[test]
    fn test_utf8_split_across_bytes() {
        let mut a = LineAssembler::default();
        assert_eq!(feed(&mut a, "µs ✓\n".as_bytes()), vec!["µs ✓"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut a = LineAssembler::default();
        assert_eq!(feed(&mut a, &[b'a', 0xFF, b'b', b'\n']), vec!["a\u{FFFD}b"]);
    }

    #[test]
    fn test_line_ending_from_name() {
        assert_eq!(LineEnding::from_name("LF"), Some(LineEnding::Lf));
        assert_eq!(LineEnding::from_name("cr"), Some(LineEnding::Cr));
        assert_eq!(LineEnding::from_name("any"), Some(LineEnding::Any));
        assert_eq!(LineEnding::from_name("tab"), None);
    }
}
