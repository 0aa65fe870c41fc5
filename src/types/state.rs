//! Match state definitions

use serde::{Deserialize, Serialize};

use crate::{DUEL_CONTESTANTS, DUEL_ROUND_CAP, FREE_FOR_ALL_MIN_CONTESTANTS, SCORE_THRESHOLD};

/// Lifecycle of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Set up, waiting for participants
    #[default]
    Idle,
    /// Started, rounds can be played
    InProgress,
    /// Terminal, no more rounds
    Finished,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        *self == MatchStatus::Finished
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchStatus::Idle => "IDLE",
            MatchStatus::InProgress => "IN_PROGRESS",
            MatchStatus::Finished => "FINISHED",
        };
        write!(f, "{}", name)
    }
}

/// Match profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Two contestants, sequential responses, round cap
    #[default]
    Duel,
    /// Three or more contestants, introduction round and whisper phase
    FreeForAll,
}

impl MatchMode {
    /// Does `count` contestants fit this mode?
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            MatchMode::Duel => count == DUEL_CONTESTANTS,
            MatchMode::FreeForAll => count >= FREE_FOR_ALL_MIN_CONTESTANTS,
        }
    }

    /// Expected participant count, for error messages
    pub fn expectation(&self) -> &'static str {
        match self {
            MatchMode::Duel => "exactly 2 contestants",
            MatchMode::FreeForAll => "at least 3 contestants",
        }
    }

    pub fn has_whispers(&self) -> bool {
        *self == MatchMode::FreeForAll
    }

    pub fn has_introduction(&self) -> bool {
        *self == MatchMode::FreeForAll
    }

    /// Default rules for this profile
    pub fn rules(&self) -> MatchRules {
        match self {
            MatchMode::Duel => MatchRules {
                score_threshold: SCORE_THRESHOLD,
                round_cap: Some(DUEL_ROUND_CAP),
            },
            MatchMode::FreeForAll => MatchRules {
                score_threshold: SCORE_THRESHOLD,
                round_cap: None,
            },
        }
    }
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMode::Duel => write!(f, "duel"),
            MatchMode::FreeForAll => write!(f, "free-for-all"),
        }
    }
}

/// End conditions of a match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRules {
    /// Terminal once any cumulative score reaches this
    pub score_threshold: f64,
    /// Terminal once this round number is reached
    pub round_cap: Option<u32>,
}

impl Default for MatchRules {
    fn default() -> Self {
        MatchMode::Duel.rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duel_accepts_two() {
        assert!(MatchMode::Duel.accepts(2));
        assert!(!MatchMode::Duel.accepts(1));
        assert!(!MatchMode::Duel.accepts(3));
    }

    #[test]
    fn test_free_for_all_accepts_three_or_more() {
        assert!(!MatchMode::FreeForAll.accepts(2));
        assert!(MatchMode::FreeForAll.accepts(3));
        assert!(MatchMode::FreeForAll.accepts(5));
    }

    #[test]
    fn test_round_cap_only_in_duel() {
        assert_eq!(MatchMode::Duel.rules().round_cap, Some(DUEL_ROUND_CAP));
        assert_eq!(MatchMode::FreeForAll.rules().round_cap, None);
    }

    #[test]
    fn test_mode_serde() {
        let mode: MatchMode = serde_json::from_str(r#""free_for_all""#).unwrap();
        assert_eq!(mode, MatchMode::FreeForAll);
    }
}
