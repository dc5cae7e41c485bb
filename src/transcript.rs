use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One transcript message (or fragment of one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Still being appended to
    pub is_partial: bool,
}

impl TranscriptMessage {
    pub fn new(role: Role, text: impl Into<String>, is_partial: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_partial,
        }
    }
}

/// Transcript as displayed: fragments coalesced into messages
///
/// A fragment extends the last message when both share a role and the last
/// message is still partial. The fragment's partial flag then becomes the
/// message's, so a final fragment closes the message to further appends.
/// An empty final fragment closes the latest open message of its role.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptLog {
    messages: Vec<TranscriptMessage>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fragment into the log
    pub fn apply(&mut self, fragment: TranscriptMessage) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == fragment.role && last.is_partial {
                last.text.push_str(&fragment.text);
                last.is_partial = fragment.is_partial;
                return;
            }
        }

        // A bare completion closes the open message of its role, even when
        // the other speaker has been appended since
        if fragment.text.is_empty() && !fragment.is_partial {
            if let Some(open) = self
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == fragment.role && m.is_partial)
            {
                open.is_partial = false;
            }
            return;
        }

        self.messages.push(fragment);
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&TranscriptMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
