use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use shared::history::{HistoryStore, session_key};
use shared::llm::{GenerationEngine, GenerationReply, ModelCatalog, assemble_conversation};
use shared::models::{ChatRequest, ChatResponse, OkResponse, Role, Turn};
use tracing::error;
use uuid::Uuid;

mod errors;

use errors::{bad_gateway_response, bad_request_response, not_found_response};

/// Ceiling for one whole exchange across both fallback attempts.
const DISPATCH_DEADLINE: Duration = Duration::from_secs(60);

/// Cap on clips held for retrieval. Clips are full binary payloads, so the
/// store is bounded the same way session history is: oldest evicted first.
const MAX_AUDIO_CLIPS: usize = 128;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GenerationEngine>,
    pub catalog: Arc<ModelCatalog>,
    pub history: Arc<dyn HistoryStore>,
    pub audio: AudioStore,
}

/// Audio replies are bytes owned by the engine's caller; this keeps them
/// retrievable under a fresh id so the chat response can carry a URL
/// instead of a binary body. Bounded at `MAX_AUDIO_CLIPS`; once the cap is
/// reached, the oldest clip is dropped with each insertion, so a stale
/// audio URL can read as gone.
#[derive(Clone, Default)]
pub struct AudioStore {
    inner: Arc<Mutex<AudioClips>>,
}

#[derive(Default)]
struct AudioClips {
    order: VecDeque<Uuid>,
    clips: HashMap<Uuid, AudioClip>,
}

#[derive(Clone)]
pub struct AudioClip {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl AudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, AudioClips> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Eviction and insertion share one critical section, so the bound
    /// holds at every observable point.
    fn insert(&self, clip: AudioClip) -> Uuid {
        let clip_id = Uuid::new_v4();
        let mut inner = self.lock_inner();
        while inner.order.len() >= MAX_AUDIO_CLIPS {
            if let Some(evicted) = inner.order.pop_front() {
                inner.clips.remove(&evicted);
            }
        }
        inner.order.push_back(clip_id);
        inner.clips.insert(clip_id, clip);
        clip_id
    }

    fn get(&self, clip_id: &Uuid) -> Option<AudioClip> {
        self.lock_inner().clips.get(clip_id).cloned()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/models", get(list_models))
        .route("/v1/chat", post(chat))
        .route("/v1/audio/{clip_id}", get(get_audio))
        .with_state(state)
}

async fn healthz() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

async fn list_models(State(state): State<AppState>) -> Response {
    Json(state.catalog.descriptors().to_vec()).into_response()
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    if req.messages.is_empty() {
        return bad_request_response("messages_required", "Messages are required");
    }
    let Some(prompt) = latest_user_prompt(&req.messages) else {
        return bad_request_response("prompt_required", "Prompt is required");
    };
    let prompt = prompt.to_string();

    let model_id = req
        .model
        .as_deref()
        .unwrap_or_else(|| state.catalog.default_model())
        .to_string();
    if model_id != state.catalog.default_model() && !state.catalog.exists(&model_id) {
        return bad_request_response("invalid_model", "Invalid model specified");
    }
    let is_private = req.is_private.unwrap_or(true);

    let session = session_key(&device_identity(&headers));
    let prior_turns = state.history.get(&session);
    let conversation = assemble_conversation(&prior_turns, &prompt);

    let dispatch = state.engine.dispatch(&conversation, &model_id, is_private);
    let reply = match tokio::time::timeout(DISPATCH_DEADLINE, dispatch).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            error!(model = %model_id, "generation dispatch failed: {err}");
            return bad_gateway_response("generation_failed", "Text generation failed");
        }
        Err(_) => {
            error!(model = %model_id, "generation dispatch exceeded the exchange deadline");
            return bad_gateway_response("generation_timeout", "Text generation timed out");
        }
    };

    let response = match reply {
        GenerationReply::Text(content) => ChatResponse::Text { content },
        GenerationReply::Audio { media_type, bytes } => {
            let clip_id = state.audio.insert(AudioClip {
                media_type: media_type.clone(),
                bytes,
            });
            ChatResponse::Audio {
                media_type,
                audio_url: format!("/v1/audio/{clip_id}"),
            }
        }
    };

    let assistant_content = match &response {
        ChatResponse::Text { content } => content.clone(),
        ChatResponse::Audio { audio_url, .. } => audio_url.clone(),
    };
    state
        .history
        .append(&session, Turn::user(prompt), Turn::assistant(assistant_content));

    (StatusCode::OK, Json(response)).into_response()
}

async fn get_audio(State(state): State<AppState>, Path(clip_id): Path<Uuid>) -> Response {
    match state.audio.get(&clip_id) {
        Some(clip) => {
            ([(header::CONTENT_TYPE, clip.media_type)], clip.bytes).into_response()
        }
        None => not_found_response("audio_not_found", "Audio clip not found"),
    }
}

fn latest_user_prompt(messages: &[Turn]) -> Option<&str> {
    let last = messages.last()?;
    if last.role != Role::User {
        return None;
    }
    let trimmed = last.content.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

/// Session identity for history scoping only: device header first, session
/// cookie second, shared anonymous bucket last.
fn device_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-device-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| cookie_value(headers, "sessionId"))
        .unwrap_or_else(|| "anonymous".to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
