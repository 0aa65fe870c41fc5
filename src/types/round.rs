//! Round results and match outcomes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a round was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    /// Round 0 of a free-for-all: self-presentation, not scored
    Introduction,
    /// Regular scored round
    Contest,
}

/// A private message emitted during the whisper phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whisper {
    /// Resolved recipient persona ids, from `To <Name>:` tags
    pub recipients: Vec<String>,
    /// Raw generated text
    pub text: String,
}

/// Why the match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A cumulative score reached the threshold
    ScoreThreshold,
    /// The round cap was reached
    RoundCap,
}

/// Final result of a finished match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winning persona id, `None` on a draw
    pub winner: Option<String>,
    pub reason: EndReason,
    /// Round the match ended on
    pub round: u32,
    pub final_scores: BTreeMap<String, f64>,
}

impl MatchOutcome {
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// Everything that happened in one round. Never altered once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u32,
    pub kind: RoundKind,
    /// Contestant ids in match order
    pub participants: Vec<String>,
    /// Public statement per contestant
    pub statements: BTreeMap<String, String>,
    /// Whisper per contestant (free-for-all only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub whispers: BTreeMap<String, Whisper>,
    /// Judge's raw feedback
    pub judge_feedback: String,
    /// Score earned this round (empty for introduction rounds)
    pub round_scores: BTreeMap<String, f64>,
    /// Totals after this round
    pub cumulative_scores: BTreeMap<String, f64>,
    /// Some participant fell back to the neutral score
    pub scoring_degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_participants: Vec<String>,
    /// Personas whose generation failed this round (judge included)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_participants: Vec<String>,
    /// Set on the round that ended the match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl RoundResult {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn score_of(&self, id: &str) -> Option<f64> {
        self.round_scores.get(id).copied()
    }

    pub fn total_of(&self, id: &str) -> Option<f64> {
        self.cumulative_scores.get(id).copied()
    }

    /// One-line summary for logs and the terminal
    pub fn summary(&self) -> String {
        let scores: Vec<String> = self
            .participants
            .iter()
            .map(|id| {
                format!(
                    "{}={:.1} (+{:.1})",
                    id,
                    self.total_of(id).unwrap_or(0.0),
                    self.score_of(id).unwrap_or(0.0)
                )
            })
            .collect();

        let mut line = format!("round={} | {}", self.round, scores.join(" "));
        if self.scoring_degraded {
            line.push_str(" | degraded");
        }
        if let Some(outcome) = &self.outcome {
            match &outcome.winner {
                Some(w) => line.push_str(&format!(" | winner={}", w)),
                None => line.push_str(" | draw"),
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RoundResult {
        let participants = vec!["santa".to_string(), "egg".to_string()];
        RoundResult {
            round: 3,
            kind: RoundKind::Contest,
            participants,
            statements: BTreeMap::new(),
            whispers: BTreeMap::new(),
            judge_feedback: String::new(),
            round_scores: [("santa".to_string(), 10.0), ("egg".to_string(), 0.0)].into(),
            cumulative_scores: [("santa".to_string(), 30.0), ("egg".to_string(), 0.0)].into(),
            scoring_degraded: false,
            degraded_participants: vec![],
            failed_participants: vec![],
            outcome: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summary() {
        let r = result();
        assert_eq!(r.summary(), "round=3 | santa=30.0 (+10.0) egg=0.0 (+0.0)");
    }

    #[test]
    fn test_optional_fields_skipped() {
        let json = serde_json::to_value(result()).unwrap();
        assert!(json.get("whispers").is_none());
        assert!(json.get("outcome").is_none());
        assert_eq!(json["round"], 3);
    }
}
