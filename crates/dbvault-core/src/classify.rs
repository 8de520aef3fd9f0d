//! Informational message classification.
//!
//! # Design
//! - Engines report some fatal conditions only as informational text, so the
//!   bridge matches messages against a small ordered list of phrases.
//! - Matching is a case-sensitive substring test; anything that does not match
//!   is benign and only relayed.
//! - The list is data, not control flow, so callers can extend it from
//!   configuration without touching the bridge.

use serde::{Deserialize, Serialize};

/// Phrase emitted when the engine cannot open the backup artifact.
pub const CANNOT_OPEN_BACKUP_DEVICE: &str = "Cannot open backup device";
/// Phrase emitted when the engine shuts the operation down abnormally.
pub const TERMINATING_ABNORMALLY: &str = "terminating abnormally";

/// A phrase that marks an informational message as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalPattern {
    phrase: String,
}

impl FatalPattern {
    /// Wrap a phrase; returns `None` for blank phrases, which would match everything.
    #[must_use]
    pub fn new(phrase: impl Into<String>) -> Option<Self> {
        let phrase = phrase.into();
        if phrase.trim().is_empty() {
            None
        } else {
            Some(Self { phrase })
        }
    }

    /// The phrase searched for in message text.
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    fn matches(&self, message: &str) -> bool {
        message.contains(self.phrase.as_str())
    }
}

/// Classification of one informational message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageClass {
    /// The message is relayed and otherwise ignored.
    Benign,
    /// The message ends the operation.
    Fatal {
        /// Phrase that matched.
        phrase: String,
    },
}

impl MessageClass {
    /// Whether the message ends the operation.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Machine-friendly discriminator used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Fatal { .. } => "fatal",
        }
    }
}

/// Ordered list of fatal phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageClassifier {
    patterns: Vec<FatalPattern>,
}

impl MessageClassifier {
    /// Classifier with a custom phrase list; blank phrases are skipped.
    #[must_use]
    pub fn from_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: phrases.into_iter().filter_map(FatalPattern::new).collect(),
        }
    }

    /// Append a phrase after the existing ones; blank or duplicate phrases are ignored.
    #[must_use]
    pub fn with_pattern(mut self, phrase: impl Into<String>) -> Self {
        if let Some(pattern) = FatalPattern::new(phrase)
            && !self.patterns.contains(&pattern)
        {
            self.patterns.push(pattern);
        }
        self
    }

    /// Phrases in match order.
    #[must_use]
    pub fn patterns(&self) -> &[FatalPattern] {
        &self.patterns
    }

    /// Classify a message; the first matching phrase wins.
    #[must_use]
    pub fn classify(&self, message: &str) -> MessageClass {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(message))
            .map_or(MessageClass::Benign, |pattern| MessageClass::Fatal {
                phrase: pattern.phrase.clone(),
            })
    }
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::from_phrases([CANNOT_OPEN_BACKUP_DEVICE, TERMINATING_ABNORMALLY])
    }
}
