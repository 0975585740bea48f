//! Conversation state shared across run stages.

use serde::{Deserialize, Serialize};

/// Who produced a turn: the engine (`initiator`) or the model (`responder`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn initiator(text: impl Into<String>) -> Self {
        Self {
            role: Role::Initiator,
            text: text.into(),
        }
    }

    pub fn responder(text: impl Into<String>) -> Self {
        Self {
            role: Role::Responder,
            text: text.into(),
        }
    }
}

/// Append-only sequence of turns.
///
/// The only mutation is appending a full initiator/responder exchange, which
/// keeps the alternation invariant structural: a responder turn can never be
/// recorded without the initiator turn that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation from previously stored turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record a completed exchange: the prompt that was sent and the reply it got.
    pub fn push_exchange(&mut self, sent: impl Into<String>, received: impl Into<String>) {
        self.turns.push(Turn::initiator(sent));
        self.turns.push(Turn::responder(received));
    }

    /// The most recent `max_turns` turns, oldest first.
    pub fn tail(&self, max_turns: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(max_turns);
        &self.turns[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let turn = Turn::initiator("hello");
        let json = serde_json::to_string(&turn).expect("serialize");
        assert_eq!(json, r#"{"role":"initiator","text":"hello"}"#);

        let turn = Turn::responder("hi");
        let json = serde_json::to_string(&turn).expect("serialize");
        assert_eq!(json, r#"{"role":"responder","text":"hi"}"#);
    }

    #[test]
    fn push_exchange_appends_in_order() {
        let mut conversation = Conversation::new();
        conversation.push_exchange("first prompt", "first reply");
        conversation.push_exchange("second prompt", "second reply");

        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::Initiator,
                Role::Responder,
                Role::Initiator,
                Role::Responder
            ]
        );
        assert_eq!(conversation.turns()[2].text, "second prompt");
    }

    #[test]
    fn tail_keeps_most_recent_turns() {
        let mut conversation = Conversation::new();
        conversation.push_exchange("a", "b");
        conversation.push_exchange("c", "d");

        let tail = conversation.tail(3);
        let texts: Vec<&str> = tail.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
    }

    #[test]
    fn tail_longer_than_history_returns_everything() {
        let mut conversation = Conversation::new();
        conversation.push_exchange("a", "b");
        assert_eq!(conversation.tail(10).len(), 2);
    }
}
