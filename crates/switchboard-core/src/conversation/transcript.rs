use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::turn::{Role, TokenUsage, Turn, TurnContent};

/// Ordered turn list. Indices are assigned here and nowhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    turns: Vec<Turn>,
    next_index: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a snapshot; numbering continues after the last turn.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        let next_index = turns.last().map(|t| t.index + 1).unwrap_or(0);
        Self { turns, next_index }
    }

    pub fn append(
        &mut self,
        role: Role,
        content: TurnContent,
        token_usage: Option<TokenUsage>,
    ) -> &Turn {
        let turn = Turn {
            index: self.next_index,
            role,
            content,
            timestamp: Utc::now(),
            token_usage,
        };
        self.next_index += 1;
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
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

    pub fn last_index(&self) -> Option<u64> {
        self.turns.last().map(|t| t.index)
    }

    /// Index the next appended turn will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Turns with `index >= from`.
    pub fn since(&self, from: u64) -> &[Turn] {
        let start = self.turns.partition_point(|t| t.index < from);
        &self.turns[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> TurnContent {
        TurnContent::Text(s.to_string())
    }

    #[test]
    fn indices_are_contiguous() {
        let mut transcript = Transcript::new();
        for i in 0..5 {
            transcript.append(Role::User, text(&i.to_string()), None);
        }
        for pair in transcript.turns().windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
        assert_eq!(transcript.last_index(), Some(4));
    }

    #[test]
    fn from_turns_continues_numbering() {
        let mut original = Transcript::new();
        original.append(Role::User, text("a"), None);
        original.append(Role::Assistant, text("b"), None);

        let mut copy = Transcript::from_turns(original.turns().to_vec());
        let appended = copy.append(Role::User, text("c"), None).index;
        assert_eq!(appended, 2);
        assert_eq!(original.len(), 2);
    }

    #[test]
    fn since_returns_tail() {
        let mut transcript = Transcript::new();
        for s in ["a", "b", "c"] {
            transcript.append(Role::User, text(s), None);
        }
        let tail: Vec<_> = transcript
            .since(1)
            .iter()
            .filter_map(|t| t.content.as_text())
            .collect();
        assert_eq!(tail, vec!["b", "c"]);
        assert!(transcript.since(10).is_empty());
    }
}
