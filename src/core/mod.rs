//! Core modules for the arena

pub mod registry;
pub mod prompts;
pub mod score_parser;
pub mod generation;
pub mod engine;
pub mod controller;
pub mod publisher;
pub mod config;
pub mod api;

pub use registry::{PersonaRegistry, RegistryError};
pub use score_parser::{ScoreParser, ScoreReport, ScoreMethod, ParticipantScore};
pub use generation::{Generator, HuggingFaceGenerator, ScriptedGenerator, ProviderError, RecordedCall};
pub use engine::{RoundEngine, MatchPlan, Conversations, Openings, decide_outcome, whisper_recipients};
pub use controller::{MatchController, MatchSnapshot, StartReport};
pub use publisher::{UpdatePublisher, EventSink, SinkClosed, Subscription, SubscriberId};
pub use config::{ArenaConfig, ConfigError};
pub use api::{create_router, run_server, AppState};
