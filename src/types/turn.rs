//! Turn model for per-persona conversations
//!
//! - Turn = one chat message (system / assistant / user)
//! - Context = one persona's full history, seeded with its system prompt
//! - Window = system prompt + the most recent K non-system turns

use serde::{Deserialize, Serialize};

use crate::types::Persona;
use crate::CONTEXT_WINDOW;

/// Speaker role of a turn, as the generation endpoint understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    Assistant,
    User,
}

/// A single turn in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Per-persona conversation history
///
/// The first turn is always the persona's system prompt. It is inserted once
/// at creation and never evicted; `windowed()` trims only non-system turns.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    persona_id: String,
    turns: Vec<ChatMessage>,
    window: usize,
}

impl ConversationContext {
    /// Create a context seeded with the persona's system prompt
    pub fn new(persona: &Persona) -> Self {
        Self::with_window(persona, CONTEXT_WINDOW)
    }

    /// Create a context with a custom window size
    pub fn with_window(persona: &Persona, window: usize) -> Self {
        Self {
            persona_id: persona.id.clone(),
            turns: vec![ChatMessage::system(persona.prompt.clone())],
            window,
        }
    }

    pub fn persona_id(&self) -> &str {
        &self.persona_id
    }

    /// Append a non-system turn. A second system turn is dropped.
    pub fn append(&mut self, turn: ChatMessage) {
        if turn.role == ChatRole::System {
            tracing::warn!(persona = %self.persona_id, "ignoring extra system turn");
            return;
        }
        self.turns.push(turn);
    }

    /// System turn plus the most recent `window` turns, oldest first
    pub fn windowed(&self) -> Vec<ChatMessage> {
        let rest = &self.turns[1..];
        let start = rest.len().saturating_sub(self.window);

        let mut out = Vec::with_capacity(1 + rest.len() - start);
        out.push(self.turns[0].clone());
        out.extend_from_slice(&rest[start..]);
        out
    }

    /// Window plus one trailing instruction, ready for the generator
    pub fn request(&self, instruction: impl Into<String>) -> Vec<ChatMessage> {
        let mut messages = self.windowed();
        messages.push(ChatMessage::user(instruction));
        messages
    }

    /// Back to the freshly created state
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }

    /// Full history, including the system turn
    pub fn history(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// Most recent assistant turn
    pub fn last_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == ChatRole::Assistant)
            .map(|t| t.content.as_str())
    }

    /// Number of turns, including the system turn
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false: the system turn is never removed
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
