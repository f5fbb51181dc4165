use std::net::SocketAddr;
use std::sync::Arc;

use api_server::http::{self, AppState, AudioStore};
use shared::config::{ServerConfig, load_dotenv};
use shared::history::InMemoryHistory;
use shared::llm::{
    AnonymousClient, AuthenticatedClient, DispatchPolicy, GenerationEngine, ModelCatalog,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api_server=info,shared=info,axum=info".to_string()),
        )
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load server config");
            std::process::exit(1);
        }
    };

    let catalog = match ModelCatalog::load() {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            error!(error = %err, "failed to load model table");
            std::process::exit(1);
        }
    };

    let authenticated = match AuthenticatedClient::new(
        &config.text_api_base_url,
        config.api_token.clone(),
        config.request_timeout_ms,
    ) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to initialize authenticated provider client");
            std::process::exit(1);
        }
    };
    let anonymous =
        match AnonymousClient::new(&config.text_api_base_url, config.request_timeout_ms) {
            Ok(client) => client,
            Err(err) => {
                error!(error = %err, "failed to initialize anonymous provider client");
                std::process::exit(1);
            }
        };

    let engine = GenerationEngine::new(
        Arc::clone(&catalog),
        Arc::new(authenticated),
        Arc::new(anonymous),
        DispatchPolicy {
            credentials_held: config.credentials_held(),
            max_authenticated_payload_chars: config.max_authenticated_payload_chars,
        },
    );

    let app = http::build_router(AppState {
        engine: Arc::new(engine),
        catalog,
        history: Arc::new(InMemoryHistory::new()),
        audio: AudioStore::new(),
    });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, bind_addr = %config.bind_addr, "invalid bind addr");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, bind_addr = %addr, "failed to bind api server listener");
            std::process::exit(1);
        }
    };

    info!(
        bind_addr = %listener.local_addr().unwrap_or(addr),
        credentials_held = config.credentials_held(),
        "api server listening"
    );

    if let Err(err) = axum::serve(listener, app.into_make_service()).await {
        error!(error = %err, "api server failed");
        std::process::exit(1);
    }
}
