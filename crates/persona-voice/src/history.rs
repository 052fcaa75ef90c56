//! Conversation history with a bounded live window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Append-only record of a session. Only the most recent `max_turns` turns are
/// ever handed to response generation.
///
/// A turn opens with a user entry and takes the model replies that follow it.
/// A model entry with no user entry before it (duplex replies) is a turn of its own.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.entries.push(HistoryEntry {
            role,
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// The last `max_turns` turns, oldest first.
    pub fn recent(&self) -> &[HistoryEntry] {
        let mut turns = 0;
        let mut from = self.entries.len();
        for i in (0..self.entries.len()).rev() {
            if turns == self.max_turns {
                break;
            }
            from = i;
            if self.opens_turn(i) {
                turns += 1;
            }
        }
        &self.entries[from..]
    }

    fn opens_turn(&self, index: usize) -> bool {
        self.entries[index].role == Role::User
            || index == 0
            || self.entries[index - 1].role != Role::User
    }

    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counts_whole_turns() {
        let mut h = ConversationHistory::new(2);
        for i in 0..5 {
            h.push(Role::User, format!("question {i}"));
            h.push(Role::Model, format!("answer {i}"));
        }
        assert_eq!(h.len(), 10);
        let texts: Vec<_> = h.recent().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["question 3", "answer 3", "question 4", "answer 4"]);
    }

    #[test]
    fn unanswered_question_is_its_own_turn() {
        let mut h = ConversationHistory::new(2);
        h.push(Role::User, "first");
        h.push(Role::Model, "reply");
        h.push(Role::User, "second");
        h.push(Role::User, "third");
        let texts: Vec<_> = h.recent().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn model_only_entries_each_count_as_a_turn() {
        let mut h = ConversationHistory::new(3);
        for i in 0..6 {
            h.push(Role::Model, format!("remote {i}"));
        }
        assert_eq!(h.recent().len(), 3);
        assert_eq!(h.recent()[0].text, "remote 3");
    }

    #[test]
    fn short_history_is_returned_whole() {
        let mut h = ConversationHistory::new(10);
        h.push(Role::User, "hi");
        assert_eq!(h.recent().len(), 1);
        assert_eq!(serde_json::to_string(&h.recent()[0].role).unwrap(), "\"user\"");
    }
}
