//! # Voting
//!
//! Each (voter, item) pair is in one of three states: no vote, upvoted,
//! downvoted. Repeating a direction clears the vote, the opposite direction
//! flips it. The same delta applies to the item's score and to its author's
//! sigma.

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Direction, ItemKind};

/// A state change computed from the standing vote and the requested direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<Direction>,
    pub delta: i64,
}

pub fn transition(current: Option<Direction>, requested: Direction) -> Transition {
    let next = if current == Some(requested) {
        None
    } else {
        Some(requested)
    };
    let before = current.map_or(0, Direction::weight);
    let after = next.map_or(0, Direction::weight);
    Transition {
        next,
        delta: after - before,
    }
}

/// A validated vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteCommand {
    pub kind: ItemKind,
    pub item_id: i64,
    pub direction: Direction,
}

impl VoteCommand {
    /// Validates a `/vote` body of the form
    /// `{"item_type": "post"|"comment", "post_id"|"comment_id": int, "vote_type": "up"|"down"}`.
    ///
    /// Ids may arrive as JSON integers or as integer strings.
    pub fn from_json(body: &Value) -> Result<Self> {
        let item_type = body.get("item_type").and_then(Value::as_str).unwrap_or("");
        let (kind, id_field) = match item_type {
            "post" => (ItemKind::Post, "post_id"),
            "comment" => (ItemKind::Comment, "comment_id"),
            other => return Err(AppError::InvalidItemType(other.to_string())),
        };

        let item_id = match body.get(id_field) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .ok_or(AppError::InvalidItemId)?;

        let vote_type = body.get("vote_type").and_then(Value::as_str).unwrap_or("");
        let direction = Direction::parse(vote_type)
            .ok_or_else(|| AppError::InvalidVoteType(vote_type.to_string()))?;

        Ok(Self {
            kind,
            item_id,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transition_table() {
        use Direction::{Down, Up};
        let cases = [
            (None, Up, Some(Up), 1),
            (None, Down, Some(Down), -1),
            (Some(Up), Up, None, -1),
            (Some(Up), Down, Some(Down), -2),
            (Some(Down), Down, None, 1),
            (Some(Down), Up, Some(Up), 2),
        ];
        for (current, requested, next, delta) in cases {
            assert_eq!(transition(current, requested), Transition { next, delta });
        }
    }

    #[test]
    fn repeating_a_vote_restores_the_score() {
        for dir in [Direction::Up, Direction::Down] {
            let first = transition(None, dir);
            let second = transition(first.next, dir);
            assert_eq!(second.next, None);
            assert_eq!(first.delta + second.delta, 0);
        }
    }

    #[test]
    fn parses_post_and_comment_votes() {
        let cmd = VoteCommand::from_json(&json!({
            "item_type": "post", "post_id": 7, "vote_type": "up"
        }))
        .unwrap();
        assert_eq!(cmd.kind, ItemKind::Post);
        assert_eq!(cmd.item_id, 7);
        assert_eq!(cmd.direction, Direction::Up);

        let cmd = VoteCommand::from_json(&json!({
            "item_type": "comment", "comment_id": "12", "vote_type": "down"
        }))
        .unwrap();
        assert_eq!(cmd.kind, ItemKind::Comment);
        assert_eq!(cmd.item_id, 12);
    }

    #[test]
    fn rejects_each_bad_field_distinctly() {
        let err = VoteCommand::from_json(&json!({
            "item_type": "thread", "post_id": 1, "vote_type": "up"
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidItemType(t) if t == "thread"));

        let err = VoteCommand::from_json(&json!({
            "item_type": "post", "post_id": "abc", "vote_type": "up"
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidItemId));

        // A comment vote must carry comment_id, not post_id.
        let err = VoteCommand::from_json(&json!({
            "item_type": "comment", "post_id": 3, "vote_type": "up"
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidItemId));

        let err = VoteCommand::from_json(&json!({
            "item_type": "post", "post_id": 1.5, "vote_type": "up"
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidItemId));

        let err = VoteCommand::from_json(&json!({
            "item_type": "post", "post_id": 1, "vote_type": "sideways"
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidVoteType(t) if t == "sideways"));
    }
}
