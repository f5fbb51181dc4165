use std::collections::VecDeque;
use std::sync::Arc;

use api_server::http::{AppState, AudioStore, build_router};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use serde_json::{Value, json};
use shared::history::{HistoryStore, InMemoryHistory, session_key};
use shared::llm::{
    AnonymousClient, AuthenticatedClient, DispatchPolicy, GenerationEngine, ModelCatalog,
};
use tokio::sync::Mutex;
use tower::ServiceExt;

#[derive(Debug, Clone)]
struct MockReply {
    status: StatusCode,
    content_type: &'static str,
    body: Vec<u8>,
}

impl MockReply {
    fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    fn audio(body: &[u8]) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "audio/mpeg",
            body: body.to_vec(),
        }
    }
}

#[derive(Clone)]
struct MockProviderState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    seen_get_queries: Arc<Mutex<Vec<String>>>,
    seen_post_models: Arc<Mutex<Vec<String>>>,
}

struct MockProvider {
    base_url: String,
    state: MockProviderState,
    handle: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    async fn start(replies: Vec<MockReply>) -> Self {
        let state = MockProviderState {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            seen_get_queries: Arc::new(Mutex::new(Vec::new())),
            seen_post_models: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/", post(mock_premium_handler))
            .fallback(get(mock_free_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock provider listener should bind");
        let bind_addr = listener
            .local_addr()
            .expect("mock provider address should resolve");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock provider should run");
        });

        Self {
            base_url: format!("http://{bind_addr}"),
            state,
            handle,
        }
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn mock_free_handler(
    State(state): State<MockProviderState>,
    uri: axum::http::Uri,
) -> Response {
    state
        .seen_get_queries
        .lock()
        .await
        .push(uri.query().unwrap_or("").to_string());
    next_reply(&state).await
}

async fn mock_premium_handler(
    State(state): State<MockProviderState>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if let Some(model) = body.get("model").and_then(Value::as_str) {
        state.seen_post_models.lock().await.push(model.to_string());
    }
    next_reply(&state).await
}

async fn next_reply(state: &MockProviderState) -> Response {
    let reply = state
        .replies
        .lock()
        .await
        .pop_front()
        .unwrap_or_else(|| MockReply::text(StatusCode::INTERNAL_SERVER_ERROR, "exhausted"));
    Response::builder()
        .status(reply.status)
        .header(header::CONTENT_TYPE, reply.content_type)
        .body(Body::from(reply.body))
        .expect("mock response should build")
}

fn build_test_state(base_url: &str, api_token: Option<&str>) -> (AppState, Arc<InMemoryHistory>) {
    let catalog = Arc::new(ModelCatalog::load().expect("embedded table should parse"));
    let authenticated =
        AuthenticatedClient::new(base_url, api_token.map(str::to_string), 5_000)
            .expect("authenticated client should build");
    let anonymous = AnonymousClient::new(base_url, 5_000).expect("anonymous client should build");
    let engine = GenerationEngine::new(
        Arc::clone(&catalog),
        Arc::new(authenticated),
        Arc::new(anonymous),
        DispatchPolicy {
            credentials_held: api_token.is_some(),
            max_authenticated_payload_chars: 4_500,
        },
    );
    let history = Arc::new(InMemoryHistory::new());

    (
        AppState {
            engine: Arc::new(engine),
            catalog,
            history: Arc::clone(&history) as Arc<dyn HistoryStore>,
            audio: AudioStore::new(),
        },
        history,
    )
}

fn chat_request(body: Value, device_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-device-id", device_id)
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    serde_json::from_slice(&bytes).expect("body should be json")
}

#[tokio::test]
async fn rejects_empty_message_lists() {
    let provider = MockProvider::start(vec![]).await;
    let (state, _history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let response = router
        .oneshot(chat_request(json!({ "messages": [] }), "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], "messages_required");
}

#[tokio::test]
async fn rejects_conversations_without_a_final_user_prompt() {
    let provider = MockProvider::start(vec![]).await;
    let (state, _history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "assistant", "content": "hello" }],
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], "prompt_required");
}

#[tokio::test]
async fn rejects_unknown_model_identifiers() {
    let provider = MockProvider::start(vec![]).await;
    let (state, _history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "hello" }],
        "model": "made-up-model",
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_model");
}

#[tokio::test]
async fn lists_the_model_table() {
    let provider = MockProvider::start(vec![]).await;
    let (state, _history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let models = body.as_array().expect("model list should be an array");
    assert!(
        models
            .iter()
            .any(|descriptor| descriptor["id"] == "openai" && descriptor["free"] == true)
    );
}

#[tokio::test]
async fn chat_returns_sanitized_text_and_records_the_exchange() {
    let provider = MockProvider::start(vec![MockReply::text(
        StatusCode::OK,
        "```markdown\n**Hi** there\n---\n```",
    )])
    .await;
    let (state, history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "salam" }],
        "model": "mistral",
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "text");
    assert_eq!(body["content"], "Hi there");

    let turns = history.get(&session_key("device-1"));
    assert_eq!(turns.len(), 2, "one exchange should be recorded");
    assert_eq!(turns[0].content, "salam");
    assert_eq!(turns[1].content, "Hi there");
}

#[tokio::test]
async fn authenticated_failure_downgrades_to_the_default_anonymous_model() {
    let provider = MockProvider::start(vec![
        MockReply::text(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
        MockReply::text(StatusCode::OK, "degraded reply"),
    ])
    .await;
    let (state, _history) = build_test_state(&provider.base_url, Some("test-token"));
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "hello" }],
        "model": "openai-large",
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["content"], "degraded reply");

    let post_models = provider.state.seen_post_models.lock().await.clone();
    assert_eq!(post_models, vec!["openai-large".to_string()]);

    let get_queries = provider.state.seen_get_queries.lock().await.clone();
    assert_eq!(get_queries, vec!["model=openai".to_string()]);
}

#[tokio::test]
async fn audio_replies_are_materialized_behind_a_retrievable_url() {
    let clip = [0x49u8, 0x44, 0x33, 0x04, 0x00];
    let provider = MockProvider::start(vec![MockReply::audio(&clip)]).await;
    let (state, history) = build_test_state(&provider.base_url, Some("test-token"));
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "say hello out loud" }],
        "model": "openai-audio",
    });
    let response = router
        .clone()
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "audio");
    assert_eq!(body["media_type"], "audio/mpeg");
    let audio_url = body["audio_url"].as_str().expect("audio url should be set");
    assert!(audio_url.starts_with("/v1/audio/"));

    let audio_response = router
        .oneshot(
            Request::builder()
                .uri(audio_url)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(audio_response.status(), StatusCode::OK);
    assert_eq!(
        audio_response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("audio/mpeg")
    );
    let bytes = axum::body::to_bytes(audio_response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    assert_eq!(bytes.as_ref(), clip);

    let turns = history.get(&session_key("device-1"));
    assert_eq!(turns[1].content, audio_url, "history records the audio url");
}

#[tokio::test]
async fn empty_audio_replies_degrade_to_an_apology_recorded_in_history() {
    let provider = MockProvider::start(vec![MockReply::audio(&[])]).await;
    let (state, history) = build_test_state(&provider.base_url, Some("test-token"));
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "say hello out loud" }],
        "model": "openai-audio",
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["kind"], "text", "empty audio degrades to a text reply");
    let content = body["content"].as_str().expect("apology should be text");
    assert!(content.contains("فایل صوتی خالی"));

    let turns = history.get(&session_key("device-1"));
    assert_eq!(turns.len(), 2, "the degraded exchange is still recorded");
    assert_eq!(turns[0].content, "say hello out loud");
    assert_eq!(turns[1].content, content, "apology is the assistant turn");
}

#[tokio::test]
async fn unknown_audio_ids_return_not_found() {
    let provider = MockProvider::start(vec![]).await;
    let (state, _history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/v1/audio/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_path_failure_surfaces_as_bad_gateway() {
    let provider = MockProvider::start(vec![MockReply::text(
        StatusCode::INTERNAL_SERVER_ERROR,
        "boom",
    )])
    .await;
    let (state, history) = build_test_state(&provider.base_url, None);
    let router = build_router(state);

    let body = json!({
        "messages": [{ "role": "user", "content": "hello" }],
        "model": "mistral",
    });
    let response = router
        .oneshot(chat_request(body, "device-1"))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], "generation_failed");
    assert!(
        history.get(&session_key("device-1")).is_empty(),
        "failed exchanges are not recorded"
    );
}
