//! Captured session output and the bounded ring buffer that holds it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which stream a line was captured from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One captured line of output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutputEntry {
    /// Position in the session's output, increasing by one per line and
    /// never reused, not even after a drain.
    #[serde(default)]
    pub seq: u64,
    /// Request that produced the line (0 for output outside any request).
    pub request_id: u64,
    /// Source stream.
    pub stream: OutputStream,
    /// Line text without the trailing newline.
    pub text: String,
    /// Capture timestamp.
    pub at: DateTime<Utc>,
}

/// Result of reading the output buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutputRead {
    /// Entries newer than the caller's marker, oldest first.
    pub entries: Vec<OutputEntry>,
    /// Whether lines the caller had not seen were evicted.
    pub truncated: bool,
    /// Lines evicted since the buffer was last drained.
    pub dropped: u64,
}

impl OutputRead {
    /// Human-readable truncation marker, when one applies.
    #[must_use]
    pub fn marker(&self) -> Option<String> {
        self.truncated
            .then(|| format!("[... {} earlier line(s) truncated ...]", self.dropped))
    }

    /// Highest request id present in the read, for use as the next `since`.
    #[must_use]
    pub fn last_request_id(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.request_id).max()
    }

    /// Highest sequence number present in the read.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.last().map(|e| e.seq)
    }

    /// Entries with a sequence number above `seq` (all when `None`).
    #[must_use]
    pub fn after_seq(&self, seq: Option<u64>) -> &[OutputEntry] {
        let start = seq.map_or(0, |seq| self.entries.partition_point(|e| e.seq <= seq));
        &self.entries[start..]
    }

    /// The last `lines` entries.
    #[must_use]
    pub fn tail(&self, lines: usize) -> &[OutputEntry] {
        &self.entries[self.entries.len().saturating_sub(lines)..]
    }
}

/// Bounded FIFO of output lines with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    capacity: usize,
    entries: VecDeque<OutputEntry>,
    dropped: u64,
    evicted_through: Option<u64>,
    next_seq: u64,
}

impl OutputBuffer {
    /// Create an empty buffer holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            dropped: 0,
            evicted_through: None,
            next_seq: 1,
        }
    }

    /// Append one line, evicting the oldest when full. The entry's `seq`
    /// is assigned here.
    pub fn push(&mut self, mut entry: OutputEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.dropped += 1;
                self.evicted_through = Some(
                    self.evicted_through
                        .map_or(evicted.request_id, |prev| prev.max(evicted.request_id)),
                );
            }
        }
        self.entries.push_back(entry);
    }

    /// Split `text` into lines and append each one.
    pub fn push_text(&mut self, request_id: u64, stream: OutputStream, text: &str) {
        let at = Utc::now();
        for line in text.lines() {
            self.push(OutputEntry {
                seq: 0,
                request_id,
                stream,
                text: line.to_owned(),
                at,
            });
        }
    }

    /// Copy entries produced by requests after `since` (all when `None`).
    #[must_use]
    pub fn read(&self, since: Option<u64>) -> OutputRead {
        let entries = self
            .entries
            .iter()
            .filter(|e| since.map_or(true, |s| e.request_id > s))
            .cloned()
            .collect();
        let truncated = self
            .evicted_through
            .is_some_and(|evicted| since.map_or(true, |s| evicted > s));
        OutputRead {
            entries,
            truncated,
            dropped: self.dropped,
        }
    }

    /// Read like [`OutputBuffer::read`], then clear the buffer.
    pub fn drain(&mut self, since: Option<u64>) -> OutputRead {
        let read = self.read(since);
        self.entries.clear();
        self.dropped = 0;
        self.evicted_through = None;
        read
    }

    /// Number of buffered lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no lines are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of buffered lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
