//! Incremental framing for the `text/event-stream` wire format.
//!
//! The transport feeds raw body chunks as they arrive; the parser
//! buffers until lines are complete and yields a [`Frame`] for every
//! event terminated by a blank line. State that outlives single events,
//! the promoted event id and the server's `retry:` hint, stays on the
//! parser for the transport to read back between attempts.

use std::time::Duration;

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// One dispatched server event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// Value of the `event:` field, if the event was named.
    pub name: Option<String>,
    /// Event data; multiple `data:` lines arrive joined with `\n`.
    pub data: String,
}

/// Streaming `text/event-stream` parser.
///
/// Line endings may be `\r\n`, `\n`, or `\r`, split anywhere across
/// chunks. Comment lines and unknown fields are skipped; an event with
/// no accumulated data is never dispatched.
#[derive(Debug, Default)]
pub struct FrameParser {
    line: Vec<u8>,
    pending_cr: bool,
    past_first_line: bool,
    data: String,
    name: String,
    staged_id: String,
    last_event_id: String,
    retry_hint: Option<Duration>,
}

impl FrameParser {
    /// Creates a parser for the start of a fresh stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that resumes an interrupted stream, carrying the
    /// event id promoted before the previous attempt went down.
    pub fn resume(last_event_id: impl Into<String>) -> Self {
        let last_event_id = last_event_id.into();
        Self {
            staged_id: last_event_id.clone(),
            last_event_id,
            ..Self::default()
        }
    }

    /// Feeds one chunk of body bytes and returns the frames it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.pending_cr => self.pending_cr = false,
                b'\r' => {
                    self.pending_cr = true;
                    self.take_line(&mut frames);
                }
                b'\n' => self.take_line(&mut frames),
                other => {
                    self.pending_cr = false;
                    self.line.push(other);
                }
            }
        }
        frames
    }

    /// Resume position for the next attempt. An `id:` field is staged
    /// when its line arrives but promoted here only at the next blank
    /// line, so an event the stream cut off mid-way never moves the
    /// position. Empty until an id is promoted, or after the server
    /// explicitly resets it.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Reconnect delay requested by the server, if any `retry:` field
    /// has been accepted. The hint persists across dispatched events.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_hint
    }

    fn take_line(&mut self, frames: &mut Vec<Frame>) {
        if !self.past_first_line {
            self.past_first_line = true;
            if self.line.starts_with(&BOM) {
                self.line.drain(..BOM.len());
            }
        }
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        self.process_line(&line, frames);
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if line.is_empty() {
            self.dispatch(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(split) => {
                let value = &line[split + 1..];
                (&line[..split], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => {
                self.name = value.to_string();
            }
            "id" if !value.contains('\0') => {
                self.staged_id = value.to_string();
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit()) {
                    if let Ok(millis) = value.parse::<u64>() {
                        self.retry_hint = Some(Duration::from_millis(millis));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        // The staged id is promoted on every blank line, dispatch or not.
        self.last_event_id = self.staged_id.clone();
        if self.data.is_empty() {
            self.name.clear();
            return;
        }
        // data lines accumulate with a trailing separator; drop it.
        self.data.pop();

        let name = if self.name.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.name))
        };
        frames.push(Frame {
            name,
            data: std::mem::take(&mut self.data),
        });
    }
}
