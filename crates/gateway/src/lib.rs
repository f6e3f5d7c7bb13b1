//! HTTP webhook gateway for Chatbridge.
//!
//! Exposes the signed webhook endpoint and a health check. The webhook
//! handler validates the signature, parses the event batch, hands every
//! message event to the dispatcher, and acknowledges immediately — the
//! transport never waits for background processing.
//!
//! Built on Axum.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::{info, warn};

use chatbridge_agent::{Dispatcher, PromptAssembler, TurnConfig, TurnController};
use chatbridge_channels::{LineChannel, LineConfig};
use chatbridge_config::AppConfig;

/// Header carrying the webhook signature.
const SIGNATURE_HEADER: &str = "x-line-signature";

/// Webhook bodies may carry several events; images arrive by reference,
/// so 10 MB is generous.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub channel: Arc<LineChannel>,
    pub dispatcher: Arc<Dispatcher>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Webhook intake: a signature mismatch is a client rejection with no
/// side effects; a structurally invalid payload is a processing failure;
/// otherwise dispatch and ack regardless of background outcome.
async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.channel.validate_signature(&body, signature) {
        warn!("Webhook rejected: signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    let events = match state.channel.parse_events(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "Webhook rejected: invalid payload");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    for event in events {
        state.dispatcher.dispatch(event);
    }

    StatusCode::OK
}

/// Build all subsystems from configuration and serve until shutdown.
pub async fn start(config: AppConfig) -> Result<(), chatbridge_core::Error> {
    let provider = Arc::new(chatbridge_providers::build_from_config(&config.provider)?);
    let store =
        chatbridge_history::build_from_config(&config.history.backend, &config.history.url)
            .await?;
    let channel = Arc::new(LineChannel::new(LineConfig::from(&config.messaging)));
    let tools = Arc::new(chatbridge_tools::default_registry());

    let assembler = PromptAssembler::new(
        config.chat.persona.clone(),
        config.chat.language.clone(),
        config.history.max_turns,
    );

    let controller = Arc::new(TurnController::new(
        provider,
        store,
        channel.clone(),
        tools,
        assembler,
        TurnConfig::from_app_config(&config),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        controller,
        channel.clone(),
        config.server.max_workers,
    ));

    let state = Arc::new(GatewayState {
        channel,
        dispatcher,
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| chatbridge_core::Error::Internal(format!("bind {addr}: {e}")))?;
    info!("Chatbridge gateway listening on {addr}");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| chatbridge_core::Error::Internal(e.to_string()))?;
    Ok(())
}
