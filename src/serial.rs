//! Line framing for the serial console.
//!
//! Outbound, every publish is one tab-separated line:
//!
//! ```text
//! <retain 0|1>\t<topic>\t<payload>
//! ```
//!
//! Inbound, each line the host types is a text message to broadcast.

use core::fmt::Write;
use heapless::{String, Vec};

/// Render one publish.  `None` when it does not fit `N` bytes.
pub fn sink_line<const N: usize>(topic: &str, payload: &str, retain: bool) -> Option<String<N>> {
    let mut line = String::new();
    write!(line, "{}\t{}\t{}", u8::from(retain), topic, payload).ok()?;
    Some(line)
}

/// Collects bytes into lines terminated by `\n` or `\r`.
///
/// Bytes past `N` are dropped until the next terminator.  A line is cut
/// before its first invalid UTF-8 sequence; blank lines are skipped.
pub struct LineAssembler<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, byte: u8) -> Option<String<N>> {
        if byte != b'\n' && byte != b'\r' {
            if self.buf.push(byte).is_err() {
                trace!("console line overflow, dropping byte");
            }
            return None;
        }
        if self.buf.is_empty() {
            return None;
        }

        let text = match core::str::from_utf8(&self.buf) {
            Ok(s) => s,
            Err(e) => {
                warn!("console line is not UTF-8, cutting at {}", e.valid_up_to());
                // Prefix up to `valid_up_to` is valid by definition.
                core::str::from_utf8(&self.buf[..e.valid_up_to()]).unwrap_or("")
            }
        };
        let mut line = String::new();
        let _ = line.push_str(text.trim());
        self.buf.clear();
        (!line.is_empty()).then_some(line)
    }
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}
