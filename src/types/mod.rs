//! Core types for the arena

mod persona;
mod turn;
mod state;
mod round;
mod error;

pub use persona::{Persona, PersonaRole};
pub use turn::{ChatMessage, ChatRole, ConversationContext};
pub use state::{MatchMode, MatchRules, MatchStatus};
pub use round::{EndReason, MatchOutcome, RoundKind, RoundResult, Whisper};
pub use error::ArenaError;
