//! Error types surfaced to callers of the match state machine

use thiserror::Error;

use crate::types::MatchOutcome;

/// Caller misuse of the arena. No state is mutated when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArenaError {
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),
    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),
    #[error("Match has not started")]
    MatchNotStarted,
    #[error("Match already started")]
    MatchAlreadyStarted,
    #[error("Match already finished")]
    MatchAlreadyFinished(Box<MatchOutcome>),
}

impl ArenaError {
    /// Stable code for API bodies and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownPersona(_) => "UNKNOWN_PERSONA",
            Self::InvalidParticipants(_) => "INVALID_PARTICIPANTS",
            Self::MatchNotStarted => "MATCH_NOT_STARTED",
            Self::MatchAlreadyStarted => "MATCH_ALREADY_STARTED",
            Self::MatchAlreadyFinished(_) => "MATCH_ALREADY_FINISHED",
        }
    }
}
