use super::{
    error::{ApiError, SESSION_ID_RULE, ValidatedJson},
    types::{ChatRequest, ChatResponse, CreateSessionRequest, HealthResponse},
};
use crate::{
    Error,
    agent::StreamEvent,
    chat::{ChatInput, ChatOrchestrator},
    session::{SessionContext, is_valid_session_id},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub orchestrator: Arc<ChatOrchestrator>,
}

impl AppState {
    pub fn new(app_name: impl Into<String>, orchestrator: ChatOrchestrator) -> Self {
        Self {
            app_name: app_name.into(),
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        app: state.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn chat(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ChatRequest>,
) -> Result<Response, ApiError> {
    let stream = request.stream;
    let input = ChatInput::from(request);
    info!(
        "Received chat request for session {:?} (stream: {})",
        input.session_id, stream
    );

    if !stream {
        let reply = state.orchestrator.chat(input).await?;
        return Ok(Json(ChatResponse::from(reply)).into_response());
    }

    let prepared = state.orchestrator.prepare(input).await?;
    let session_id = prepared.session_id().to_string();
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.run_streamed(prepared, tx).await });

    // Runs after the event channel closes, i.e. once the task is done.
    let outcome = futures::stream::once(task).filter_map(|joined| async move {
        match joined {
            Ok(Ok(_)) | Ok(Err(Error::Cancelled)) => None,
            Ok(Err(e)) => Some(error_event(e.into())),
            Err(join_error) => Some(error_event(ApiError::Unhandled(join_error.into()))),
        }
    });

    let events = ReceiverStream::new(rx)
        .map(move |event| sse_event(&session_id, event))
        .chain(outcome)
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn sse_event(session_id: &str, event: StreamEvent) -> Event {
    match event {
        // SSE data lines cannot carry carriage returns.
        StreamEvent::TextDelta(text) => Event::default()
            .event("delta")
            .data(text.replace('\r', "")),
        StreamEvent::ToolCall { name } => json_event("tool_call", &json!({ "name": name })),
        StreamEvent::Completed(output) => json_event(
            "done",
            &ChatResponse {
                session_id: session_id.to_string(),
                output,
            },
        ),
    }
}

fn error_event(err: ApiError) -> Event {
    let (_, body) = err.render();
    json_event("error", &body)
}

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            warn!("Failed to encode {} event: {}", name, e);
            Event::default().event(name)
        })
}

pub async fn create_session(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionContext>), ApiError> {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut context = SessionContext::new(session_id);
    context.apply_instruction(request.instruction.as_deref());
    context.metadata = request.metadata;

    state.orchestrator.store().create(&context).await?;

    Ok((StatusCode::CREATED, Json(context)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionContext>, ApiError> {
    if !is_valid_session_id(&session_id) {
        return Err(ApiError::invalid_field("path.session_id", SESSION_ID_RULE));
    }

    let context = state.orchestrator.store().fetch(&session_id).await?;
    Ok(Json(context))
}
