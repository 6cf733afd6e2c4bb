//! Append-only transcript of a session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The AI interviewer
    Assistant,
    /// The human being interviewed
    User,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Assistant => write!(f, "assistant"),
            Speaker::User => write!(f, "user"),
        }
    }
}

/// One completed utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// Whole seconds since the session became active
    pub offset_seconds: u64,
}

/// Ordered log of completed utterances.
///
/// Offsets are clamped so the sequence never decreases, even if a caller
/// hands in an earlier offset than the last entry.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAccumulator {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed utterance. Returns a reference to the stored entry.
    pub fn append(
        &mut self,
        speaker: Speaker,
        text: impl Into<String>,
        offset_seconds: u64,
    ) -> &TranscriptEntry {
        let floor = self.entries.last().map_or(0, |e| e.offset_seconds);
        self.entries.push(TranscriptEntry {
            speaker,
            text: text.into(),
            offset_seconds: offset_seconds.max(floor),
        });
        // Just pushed, so the vector is non-empty.
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries spoken by `speaker`.
    pub fn count_for(&self, speaker: Speaker) -> usize {
        self.entries.iter().filter(|e| e.speaker == speaker).count()
    }
}
