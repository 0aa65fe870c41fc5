//! Match controller: the match state machine
//!
//! `setup → start → advance*`. The controller is the only writer of match
//! state. Each `advance` plays the round on a copy of the conversations and
//! commits it, together with the scores and the round record, only after the
//! engine returns; a dropped `advance` leaves the match as it was.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::core::engine::{Conversations, MatchPlan, RoundEngine};
use crate::core::generation::Generator;
use crate::core::publisher::{Subscription, UpdatePublisher};
use crate::core::registry::PersonaRegistry;
use crate::types::{
    ArenaError, ConversationContext, MatchMode, MatchOutcome, MatchRules, MatchStatus, Persona,
    PersonaRole, RoundResult,
};

/// What `start` produced
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub match_id: Uuid,
    pub mode: MatchMode,
    pub participants: Vec<String>,
    pub judge: String,
    /// Duel: A's opening move and B's preparation reply
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub openings: BTreeMap<String, String>,
    /// Free-for-all: the introduction round
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduction: Option<RoundResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_participants: Vec<String>,
}

/// Read-only view of a match
#[derive(Debug, Clone, Serialize)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    pub mode: MatchMode,
    pub status: MatchStatus,
    pub participants: Vec<String>,
    pub current_round: u32,
    pub scores: BTreeMap<String, f64>,
    pub rounds: Vec<RoundResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
}

/// A started match
#[derive(Debug, Clone)]
struct ActiveMatch {
    plan: MatchPlan,
    conversations: Conversations,
}

/// Per-match state, replaced wholesale on `setup`
#[derive(Debug, Default)]
struct MatchState {
    active: Option<ActiveMatch>,
    current_round: u32,
    scores: BTreeMap<String, f64>,
    rounds: Vec<RoundResult>,
    outcome: Option<MatchOutcome>,
}

impl MatchState {
    fn status(&self) -> MatchStatus {
        match (&self.active, &self.outcome) {
            (None, _) => MatchStatus::Idle,
            (Some(_), None) => MatchStatus::InProgress,
            (Some(_), Some(_)) => MatchStatus::Finished,
        }
    }
}

/// Owns one match and everything about it
#[derive(Debug)]
pub struct MatchController {
    match_id: Uuid,
    mode: MatchMode,
    rules: Option<MatchRules>,
    registry: Arc<PersonaRegistry>,
    engine: RoundEngine,
    publisher: Arc<UpdatePublisher>,
    state: MatchState,
}

impl MatchController {
    /// Duel controller with default rules
    pub fn new(registry: Arc<PersonaRegistry>, generator: Arc<dyn Generator>) -> Self {
        Self {
            match_id: Uuid::new_v4(),
            mode: MatchMode::default(),
            rules: None,
            registry,
            engine: RoundEngine::new(generator),
            publisher: Arc::new(UpdatePublisher::new()),
            state: MatchState::default(),
        }
    }

    /// Default mode for `start`
    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the mode's end conditions
    pub fn with_rules(mut self, rules: MatchRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Per-call generation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_timeout(timeout);
        self
    }

    /// Publish through a shared publisher
    pub fn with_publisher(mut self, publisher: Arc<UpdatePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Reset to a fresh, idle match. A running match is forfeited.
    pub fn setup(&mut self) {
        if self.state.status() == MatchStatus::InProgress {
            tracing::info!(match_id = %self.match_id, round = self.state.current_round, "forfeiting running match");
        }
        self.state = MatchState::default();
        self.match_id = Uuid::new_v4();
        self.publisher.clear_history();
        tracing::info!(match_id = %self.match_id, "match set up");
    }

    /// Start with the controller's default mode
    pub async fn start(&mut self, participant_ids: &[String]) -> Result<StartReport, ArenaError> {
        self.start_as(self.mode, participant_ids).await
    }

    /// Validate participants, create contexts and run the opening
    ///
    /// # Errors
    ///
    /// - `MatchAlreadyStarted` unless the match is idle
    /// - `UnknownPersona` for an id the registry does not know
    /// - `InvalidParticipants` for a wrong count for `mode`, a repeated id,
    ///   or the judge's id
    pub async fn start_as(&mut self, mode: MatchMode, participant_ids: &[String]) -> Result<StartReport, ArenaError> {
        if self.state.active.is_some() {
            return Err(ArenaError::MatchAlreadyStarted);
        }

        let contestants = self.resolve(mode, participant_ids)?;
        let plan = MatchPlan {
            mode,
            rules: self.rules.unwrap_or_else(|| mode.rules()),
            contestants,
            judge: self.registry.judge().clone(),
        };
        let mut conversations = Conversations::new(&plan);

        let mut report = StartReport {
            match_id: self.match_id,
            mode,
            participants: plan.contestant_ids(),
            judge: plan.judge.id.clone(),
            openings: BTreeMap::new(),
            introduction: None,
            failed_participants: vec![],
        };

        match mode {
            MatchMode::Duel => {
                let openings = self.engine.open_duel(&plan, &mut conversations).await;
                report.openings = openings.messages;
                report.failed_participants = openings.failed;
            }
            MatchMode::FreeForAll => {
                let intro = self.engine.introduce(&plan, &mut conversations).await;
                report.failed_participants = intro.failed_participants.clone();
                report.introduction = Some(intro);
            }
        }

        // Commit
        self.state.scores = plan.contestants.iter().map(|p| (p.id.clone(), 0.0)).collect();
        self.state.current_round = 0;
        if let Some(intro) = &report.introduction {
            self.state.rounds.push(intro.clone());
            self.publisher.publish(intro);
        }
        self.state.active = Some(ActiveMatch { plan, conversations });

        tracing::info!(
            match_id = %self.match_id,
            mode = %mode,
            participants = ?report.participants,
            "match started"
        );
        Ok(report)
    }

    /// Play the next round
    pub async fn advance(&mut self) -> Result<RoundResult, ArenaError> {
        let round = self.state.current_round + 1;

        let (result, conversations) = {
            let active = self.state.active.as_ref().ok_or(ArenaError::MatchNotStarted)?;
            if let Some(outcome) = &self.state.outcome {
                return Err(ArenaError::MatchAlreadyFinished(Box::new(outcome.clone())));
            }

            let mut working = active.conversations.clone();
            let result = self
                .engine
                .play(&active.plan, round, &mut working, &self.state.scores)
                .await;
            (result, working)
        };

        // Commit
        if let Some(active) = self.state.active.as_mut() {
            active.conversations = conversations;
        }
        self.state.current_round = result.round;
        self.state.scores = result.cumulative_scores.clone();
        self.state.outcome = result.outcome.clone();
        self.state.rounds.push(result.clone());
        self.publisher.publish(&result);

        if let Some(outcome) = &result.outcome {
            tracing::info!(
                match_id = %self.match_id,
                round,
                winner = outcome.winner.as_deref().unwrap_or("draw"),
                reason = ?outcome.reason,
                "match finished"
            );
        }
        Ok(result)
    }

    fn resolve(&self, mode: MatchMode, ids: &[String]) -> Result<Vec<Persona>, ArenaError> {
        if !mode.accepts(ids.len()) {
            return Err(ArenaError::InvalidParticipants(format!(
                "{} needs {}, got {}",
                mode,
                mode.expectation(),
                ids.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut personas = Vec::with_capacity(ids.len());
        for id in ids {
            let persona = self.registry.get(id)?;
            if persona.role != PersonaRole::Contestant {
                return Err(ArenaError::InvalidParticipants(format!("{} is a {}, not a contestant", id, persona.role)));
            }
            if !seen.insert(id.as_str()) {
                return Err(ArenaError::InvalidParticipants(format!("{} listed twice", id)));
            }
            personas.push(persona.clone());
        }
        Ok(personas)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            match_id: self.match_id,
            mode: self.active_mode(),
            status: self.state.status(),
            participants: self.participants(),
            current_round: self.state.current_round,
            scores: self.state.scores.clone(),
            rounds: self.state.rounds.clone(),
            outcome: self.state.outcome.clone(),
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn status(&self) -> MatchStatus {
        self.state.status()
    }

    /// Mode of the running match, or the default for the next one
    pub fn active_mode(&self) -> MatchMode {
        self.state.active.as_ref().map(|a| a.plan.mode).unwrap_or(self.mode)
    }

    pub fn current_round(&self) -> u32 {
        self.state.current_round
    }

    pub fn scores(&self) -> &BTreeMap<String, f64> {
        &self.state.scores
    }

    pub fn rounds(&self) -> &[RoundResult] {
        &self.state.rounds
    }

    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.state.outcome.as_ref()
    }

    pub fn participants(&self) -> Vec<String> {
        self.state
            .active
            .as_ref()
            .map(|a| a.plan.contestant_ids())
            .unwrap_or_default()
    }

    /// Committed context of a contestant
    pub fn context(&self, persona_id: &str) -> Option<&ConversationContext> {
        self.state.active.as_ref()?.conversations.contexts.get(persona_id)
    }

    pub fn registry(&self) -> &Arc<PersonaRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Arc<UpdatePublisher> {
        &self.publisher
    }

    /// Live round results, starting with a replay of this match's rounds
    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe_channel()
    }
}
