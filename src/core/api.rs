//! HTTP + WebSocket API for the arena
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /personas - List personas
//! - GET /personas/:id - One persona
//! - POST /arena/setup - Reset to a fresh match
//! - POST /arena/start - Start with participants
//! - POST /arena/round - Play the next round
//! - GET /arena/state - Match snapshot
//! - WS /stream - Live round results
//! - WS /comments - Viewer comments

use axum::{
    extract::{ws::{Message, WebSocket}, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::core::controller::{MatchController, MatchSnapshot, StartReport};
use crate::core::publisher::UpdatePublisher;
use crate::core::registry::PersonaRegistry;
use crate::types::{ArenaError, MatchMode, MatchOutcome, Persona, PersonaRole, RoundResult};

/// App state
pub struct AppState {
    /// Single writer: rounds are serialised through this lock
    pub arena: Mutex<MatchController>,
    pub publisher: Arc<UpdatePublisher>,
    pub registry: Arc<PersonaRegistry>,
    pub comments: RwLock<Vec<String>>,
}

/// Start match request
///
/// `model_a`/`model_b` name a duel pair, as older clients send it.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub participants: Vec<String>,
    pub mode: Option<MatchMode>,
    pub model_a: Option<String>,
    pub model_b: Option<String>,
}

impl StartRequest {
    /// Participant ids plus the mode implied by the request shape, if any
    fn resolve(self) -> Result<(Vec<String>, Option<MatchMode>), ArenaError> {
        match (self.model_a, self.model_b) {
            (None, None) => Ok((self.participants, self.mode)),
            (Some(a), Some(b)) if self.participants.is_empty() => {
                Ok((vec![a, b], Some(self.mode.unwrap_or(MatchMode::Duel))))
            }
            (Some(_), Some(_)) => Err(ArenaError::InvalidParticipants(
                "give either participants or model_a/model_b, not both".to_string(),
            )),
            _ => Err(ArenaError::InvalidParticipants(
                "model_a and model_b must be given together".to_string(),
            )),
        }
    }
}

/// Setup response
#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub status: String,
    pub match_id: Uuid,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub personas: usize,
    pub subscribers: usize,
}

/// Persona listing entry
#[derive(Debug, Serialize)]
pub struct PersonaSummary {
    pub id: String,
    pub character: String,
    pub role: PersonaRole,
}

impl From<&Persona> for PersonaSummary {
    fn from(p: &Persona) -> Self {
        Self {
            id: p.id.clone(),
            character: p.name.clone(),
            role: p.role,
        }
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
}

/// Arena error with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: ArenaError,
}

impl ApiError {
    fn not_found(error: ArenaError) -> Self {
        Self { status: StatusCode::NOT_FOUND, error }
    }
}

impl From<ArenaError> for ApiError {
    fn from(error: ArenaError) -> Self {
        let status = match error {
            ArenaError::UnknownPersona(_) | ArenaError::InvalidParticipants(_) => StatusCode::BAD_REQUEST,
            ArenaError::MatchNotStarted
            | ArenaError::MatchAlreadyStarted
            | ArenaError::MatchAlreadyFinished(_) => StatusCode::CONFLICT,
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let outcome = match &self.error {
            ArenaError::MatchAlreadyFinished(outcome) => Some((**outcome).clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.error.code().to_string(),
            detail: self.error.to_string(),
            outcome,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Create the API router around a controller
pub fn create_router(controller: MatchController) -> Router {
    let state = Arc::new(AppState {
        publisher: controller.publisher().clone(),
        registry: controller.registry().clone(),
        arena: Mutex::new(controller),
        comments: RwLock::new(Vec::new()),
    });

    Router::new()
        .route("/health", get(health))
        .route("/personas", get(list_personas))
        .route("/personas/:id", get(get_persona))
        .route("/arena/setup", post(setup_match))
        .route("/arena/start", post(start_match))
        .route("/arena/round", post(play_round))
        .route("/arena/state", get(match_state))
        .route("/stream", get(stream_handler))
        .route("/comments", get(comments_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        personas: state.registry.len(),
        subscribers: state.publisher.subscriber_count(),
    })
}

async fn list_personas(State(state): State<Arc<AppState>>) -> Json<Vec<PersonaSummary>> {
    Json(state.registry.all().map(PersonaSummary::from).collect())
}

async fn get_persona(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Persona>, ApiError> {
    let persona = state.registry.get(&id).map_err(ApiError::not_found)?;
    Ok(Json(persona.clone()))
}

/// Reset the match; viewer comments go with it
async fn setup_match(State(state): State<Arc<AppState>>) -> Json<SetupResponse> {
    let mut arena = state.arena.lock().await;
    arena.setup();
    state.comments.write().await.clear();

    Json(SetupResponse {
        status: "ready".to_string(),
        match_id: arena.match_id(),
    })
}

async fn start_match(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartReport>, ApiError> {
    let (participants, mode) = req.resolve()?;
    let mut arena = state.arena.lock().await;
    let mode = mode.unwrap_or_else(|| arena.active_mode());
    let report = arena.start_as(mode, &participants).await?;
    Ok(Json(report))
}

/// Degraded rounds are still a 200 with a complete result
async fn play_round(State(state): State<Arc<AppState>>) -> Result<Json<RoundResult>, ApiError> {
    let mut arena = state.arena.lock().await;
    let result = arena.advance().await?;
    Ok(Json(result))
}

async fn match_state(State(state): State<Arc<AppState>>) -> Json<MatchSnapshot> {
    let arena = state.arena.lock().await;
    Json(arena.snapshot())
}

/// WebSocket handler for live round results
async fn stream_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state.publisher.clone()))
}

/// Forward round results until either side goes away
async fn handle_stream(mut socket: WebSocket, publisher: Arc<UpdatePublisher>) {
    let mut sub = publisher.subscribe_channel();
    tracing::debug!(subscriber = sub.id, "stream connected");

    loop {
        tokio::select! {
            event = sub.rx.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode round result");
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    publisher.unsubscribe(sub.id);
    tracing::debug!(subscriber = sub.id, "stream closed");
}

/// WebSocket handler for viewer comments
async fn comments_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_comments(socket, state))
}

async fn handle_comments(mut socket: WebSocket, state: Arc<AppState>) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                state.comments.write().await.push(text.clone());
                let ack = format!("Comment received: {}", text);
                if socket.send(Message::Text(ack)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Run the API server
pub async fn run_server(addr: &str, controller: MatchController) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "arena API listening");
    println!("  GET  /health        - Health check");
    println!("  GET  /personas      - List personas");
    println!("  POST /arena/setup   - Fresh match");
    println!("  POST /arena/start   - Start match");
    println!("  POST /arena/round   - Play next round");
    println!("  GET  /arena/state   - Match state");
    println!("  WS   /stream        - Live rounds");
    println!("  WS   /comments      - Viewer comments");
    axum::serve(listener, router).await?;
    Ok(())
}
