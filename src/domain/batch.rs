use serde::{Deserialize, Serialize};

/// Raw decoded datagram content. Treated as opaque text.
pub type LogLine = String;

/// What caused the accumulator to hand a batch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    Size,
    Time,
}

/// An insertion-ordered group of lines flushed together to every sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    lines: Vec<LogLine>,
    byte_size: usize,
    trigger: FlushTrigger,
}

impl Batch {
    pub fn new(lines: Vec<LogLine>, trigger: FlushTrigger) -> Self {
        let byte_size = lines.iter().map(String::len).sum();
        Self {
            lines,
            byte_size,
            trigger,
        }
    }

    pub(crate) fn from_parts(lines: Vec<LogLine>, byte_size: usize, trigger: FlushTrigger) -> Self {
        Self {
            lines,
            byte_size,
            trigger,
        }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<LogLine> {
        self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of the UTF-8 byte lengths of all lines.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    /// Lines joined by `\n`, without a trailing newline.
    pub fn to_ndjson(&self) -> String {
        self.lines.join("\n")
    }
}
