//! Line protocol parsing.
//!
//! Inbound frames are text lines of the form `<COMMAND>[ <OPTIONS>]`,
//! terminated by `\n` (a preceding `\r` is stripped). A single socket read
//! may carry any number of complete frames plus a partial one; the partial
//! tail is held by [`LineBuffer`] until its delimiter arrives.
//!
//! ```text
//! "TP EXP\r\nMK start\r\nDA"  ──feed──►  [TP "EXP"], [MK "start"]   (pending: "DA")
//! "TA 1\n"                   ──feed──►  [DATA "1"]
//! ```

use crate::constants::{LINE_TERMINATOR, MAX_PENDING_LINE};

/// One parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command token (first whitespace-delimited word).
    pub command: String,
    /// Raw remainder of the line, leading whitespace trimmed. Empty if absent.
    pub options: String,
}

impl ParsedCommand {
    /// Build a command from its parts.
    pub fn new(command: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: options.into(),
        }
    }
}

/// Parse a single line into a command.
///
/// Returns `None` for blank lines.
pub fn parse_command(line: &str) -> Option<ParsedCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.split_once(char::is_whitespace) {
        Some((command, options)) => Some(ParsedCommand::new(command, options.trim_start())),
        None => Some(ParsedCommand::new(line, "")),
    }
}

/// Parse every line of a chunk that is known to hold only complete frames.
pub fn parse_commands(chunk: &str) -> Vec<ParsedCommand> {
    chunk.lines().filter_map(parse_command).collect()
}

/// Encode an outbound frame.
pub fn encode_line(payload: &str) -> String {
    let mut line = String::with_capacity(payload.len() + LINE_TERMINATOR.len());
    line.push_str(payload);
    line.push_str(LINE_TERMINATOR);
    line
}

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Skipping the remainder of an oversized line up to its delimiter.
    discarding: bool,
}

impl LineBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from one read and return the commands completed by it.
    ///
    /// Returns `Err(discarded)` with the number of dropped bytes when the
    /// pending partial line grows past [`MAX_PENDING_LINE`]. The rest of
    /// that line, up to and including its delimiter, is dropped silently
    /// by later calls.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ParsedCommand>, usize> {
        let mut data = data;
        if self.discarding {
            let Some(newline) = data.iter().position(|&b| b == b'\n') else {
                return Ok(Vec::new());
            };
            self.discarding = false;
            data = &data[newline + 1..];
        }
        self.pending.extend_from_slice(data);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            if self.pending.len() > MAX_PENDING_LINE {
                let discarded = self.pending.len();
                self.pending.clear();
                self.discarding = true;
                return Err(discarded);
            }
            return Ok(Vec::new());
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        Ok(parse_commands(&String::from_utf8_lossy(&complete)))
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
