//! Conversation types
//!
//! The research loop only ever reads conversation history; it never stores
//! it across sessions. Callers own the history and pass it in per question.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of prior conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The last `n` turns of a history, oldest first
pub fn recent_turns(history: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(n);
    &history[start..]
}

/// Most recent user turn, if any
pub fn last_user_turn(history: &[ConversationTurn]) -> Option<&ConversationTurn> {
    history.iter().rev().find(|t| t.role == Role::User)
}

/// Render turns for a prompt. Assistant turns are clipped to `clip_chars`
/// so a long previous answer cannot crowd out the evidence.
pub fn format_history(turns: &[ConversationTurn], clip_chars: usize) -> String {
    let mut out = String::new();
    for turn in turns {
        match turn.role {
            Role::User => {
                out.push_str("Human: ");
                out.push_str(&turn.content);
                out.push('\n');
            }
            Role::Assistant => {
                out.push_str("Assistant: ");
                out.push_str(&clip(&turn.content, clip_chars));
                out.push_str("\n\n");
            }
        }
    }
    out
}

/// Truncate on a char boundary, appending an ellipsis when shortened
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push_str("...");
    clipped
}
