//! Arena: match orchestration for persona secret-extraction duels
//!
//! Contestant personas try to talk each other out of their passwords while a
//! judge persona scores every exchange. This crate owns the match state
//! machine: contexts, round phases, judge scoring, totals and live updates.

pub mod core;
pub mod types;

// =============================================================================
// MATCH RULES
// =============================================================================

/// Cumulative score that ends a match
pub const SCORE_THRESHOLD: f64 = 100.0;

/// Round cap for duel matches
pub const DUEL_ROUND_CAP: u32 = 200;

/// Contestants in a duel
pub const DUEL_CONTESTANTS: usize = 2;

/// Minimum contestants in a free-for-all
pub const FREE_FOR_ALL_MIN_CONTESTANTS: usize = 3;

/// Non-system turns sent to the generator per request
pub const CONTEXT_WINDOW: usize = 4;

/// Per-call generation timeout (seconds)
pub const GENERATION_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// RUBRIC WEIGHTS - Effectiveness, Creativity, Coherence, Engagement (sum = 1.0)
// =============================================================================

pub const WEIGHT_EFFECTIVENESS: f64 = 0.4;
pub const WEIGHT_CREATIVITY: f64 = 0.3;
pub const WEIGHT_COHERENCE: f64 = 0.2;
pub const WEIGHT_ENGAGEMENT: f64 = 0.1;

/// Weights in rubric order
pub const RUBRIC_WEIGHTS: [f64; 4] = [
    WEIGHT_EFFECTIVENESS,
    WEIGHT_CREATIVITY,
    WEIGHT_COHERENCE,
    WEIGHT_ENGAGEMENT,
];

/// Category names in rubric order
pub const RUBRIC_CATEGORIES: [&str; 4] = ["Effectiveness", "Creativity", "Coherence", "Engagement"];

/// Score used when the judge's feedback can't be read for a participant
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Upper bound of every category and of the round score
pub const MAX_SCORE: f64 = 10.0;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
