//! HTTP gateway for lexstream.
//!
//! Exposes the streaming chat endpoint, a health check, and a read-only
//! view of stored conversations. Built on Axum.
//!
//! `GET /chat_stream/{message}?checkpoint_id=` answers with a
//! `text/event-stream` where every frame is `data: <json>\n\n`. Frames are
//! written in the order the agent loop produces them, and the last one is
//! always `{"type":"end"}`.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        Json,
        sse::{Event, Sse},
    },
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use lexstream_agent::{AgentLoop, StreamEvent};
use lexstream_config::AppConfig;
use lexstream_core::message::{ConversationId, Message};
use lexstream_providers::{CompletionClient, CompletionSettings};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: AgentLoop,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/chat_stream/{message}", get(chat_stream_handler))
        .route("/conversations/{id}", get(conversation_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the agent loop from configuration: provider, search tool, history.
pub async fn assemble(config: &AppConfig) -> lexstream_core::Result<AgentLoop> {
    let providers = lexstream_providers::build_from_config(config);
    let provider = providers.primary()?;
    let client = Arc::new(CompletionClient::new(
        provider,
        CompletionSettings::from_config(config),
    ));
    let tools = Arc::new(lexstream_tools::default_registry(config));
    let history = lexstream_history::open_from_config(&config.history).await?;

    info!(
        provider = %client.provider_name(),
        model = %client.settings().model,
        history = %history.name(),
        tools = ?tools.names(),
        "Agent assembled"
    );
    Ok(AgentLoop::from_config(config, client, tools, history))
}

/// Start the gateway HTTP server and serve until Ctrl+C or SIGTERM.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let agent = assemble(&config).await?;
    let app = build_router(Arc::new(GatewayState { agent }));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C stops the gateway");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// --- Handlers ---

#[derive(Debug, Default, Deserialize)]
struct ChatStreamParams {
    checkpoint_id: Option<String>,
}

/// `GET /chat_stream/{message}`: run the agent and stream its events.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Path(message): Path<String>,
    Query(params): Query<ChatStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Blank ids mean "start over"; anything else names a conversation byte-for-byte.
    let supplied = params.checkpoint_id.filter(|id| !id.trim().is_empty());

    let (conversation_id, announce) = match supplied {
        Some(id) => (ConversationId(id), None),
        None => {
            let id = ConversationId::new();
            let checkpoint = StreamEvent::Checkpoint {
                checkpoint_id: id.to_string(),
            };
            (id, Some(checkpoint))
        }
    };

    info!(
        conversation_id = %conversation_id,
        new_conversation = announce.is_some(),
        message_len = message.len(),
        "Chat stream request"
    );

    let run = state.agent.run(conversation_id, message);
    let events = tokio_stream::iter(announce)
        .chain(ReceiverStream::new(run.events))
        .filter_map(|event| encode(&event).map(Ok::<_, Infallible>));

    Sse::new(events)
}

/// Encode one event as an SSE frame. Events that fail to encode are dropped.
fn encode(event: &StreamEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(kind = event.kind(), error = %e, "Failed to encode stream event");
            None
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ConversationResponse {
    checkpoint_id: String,
    turns: Vec<Message>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// `GET /conversations/{id}`: the stored turns of one conversation.
async fn conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, (StatusCode, Json<ErrorResponse>)> {
    let id = ConversationId(id);
    let history = state.agent.history();

    let internal = |e: lexstream_core::HistoryError| {
        error!(conversation_id = %id, error = %e, "History lookup failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("History error: {e}"),
            }),
        )
    };

    if !history.contains(&id).await.map_err(internal)? {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Unknown conversation: {id}"),
            }),
        ));
    }

    let turns = history.load(&id).await.map_err(internal)?;
    Ok(Json(ConversationResponse {
        checkpoint_id: id.to_string(),
        turns,
    }))
}
