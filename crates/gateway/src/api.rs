//! `/api` routes.
//!
//! - `GET /api/models`: configured providers
//! - `POST /api/chat`: stream one chat turn
//! - `DELETE /api/threads/{kind}/{id}?user_id=`: delete a thread and everything it owns

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{Json, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use storyloom_agent::ChatRequest;
use storyloom_core::{ChannelSink, ChatMessage, ThreadKind, ThreadRef};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{ApiError, SharedState, THREAD_ID_HEADER, THREAD_TITLE_HEADER, TURN_ID_HEADER};

/// Deltas buffered between the turn task and the response body.
const STREAM_BUFFER: usize = 64;

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/models", get(models_handler))
        .route("/chat", post(chat_handler))
        .route("/threads/{kind}/{id}", delete(delete_thread_handler))
}

// ── Models ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ModelInfo {
    provider: String,
    default_model: String,
}

#[derive(Serialize)]
struct ModelsResponse {
    default_provider: String,
    models: Vec<ModelInfo>,
}

async fn models_handler(State(state): State<SharedState>) -> Json<ModelsResponse> {
    let router = state.chat.router();
    Json(ModelsResponse {
        default_provider: router.default_provider().to_string(),
        models: router
            .list()
            .into_iter()
            .map(|(provider, default_model)| ModelInfo {
                provider: provider.to_string(),
                default_model: default_model.to_string(),
            })
            .collect(),
    })
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// Body of `POST /api/chat`.
///
/// At most one of `conversation_id` and `work_id` may be set. With neither,
/// a new thread of `kind` (default: conversation) is created.
#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub user_id: String,
    pub model: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub work_id: Option<String>,
    #[serde(default)]
    pub kind: Option<ThreadKind>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatPayload {
    fn into_request(self) -> Result<ChatRequest, ApiError> {
        let (kind, thread_id) = match (self.conversation_id, self.work_id) {
            (Some(_), Some(_)) => {
                return Err(ApiError::bad_request(
                    "conversation_id and work_id are mutually exclusive",
                ));
            }
            (Some(id), None) => (ThreadKind::Conversation, Some(id)),
            (None, Some(id)) => (ThreadKind::Work, Some(id)),
            (None, None) => (self.kind.unwrap_or(ThreadKind::Conversation), None),
        };
        Ok(ChatRequest::new(self.user_id, self.model, self.messages).on_thread(kind, thread_id))
    }
}

/// `POST /api/chat`: run one turn and stream the model's output.
///
/// Everything that can reject the request happens before the response
/// starts. After that, a client that goes away only stops receiving bytes;
/// the turn keeps streaming into storage.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Response, ApiError> {
    let request = payload.into_request()?;
    info!(user_id = %request.user_id, model = %request.model, kind = %request.kind, "Chat request");

    let pending = state.chat.begin_turn(request).await?;

    let thread_id = header_value(pending.thread_id());
    let turn_id = header_value(pending.assistant_turn_id());
    let title = header_value(pending.title());

    let (tx, rx) = tokio::sync::mpsc::channel::<Vec<u8>>(STREAM_BUFFER);
    tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        let outcome = pending.stream_to(&mut sink).await;
        debug!(
            thread_id = %outcome.thread.id,
            turn_id = %outcome.assistant_turn_id,
            client_error = outcome.report.client_error.is_some(),
            "Chat stream closed"
        );
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(HeaderName::from_static(THREAD_ID_HEADER), thread_id);
    headers.insert(HeaderName::from_static(TURN_ID_HEADER), turn_id);
    headers.insert(HeaderName::from_static(THREAD_TITLE_HEADER), title);
    Ok(response)
}

/// Header-safe rendering: control characters become spaces. Non-ASCII text
/// is passed through as raw UTF-8 bytes.
fn header_value(text: &str) -> HeaderValue {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    HeaderValue::from_bytes(cleaned.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

// ── Threads ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    user_id: Option<String>,
}

/// `DELETE /api/threads/{kind}/{id}?user_id=`: cascade delete.
async fn delete_thread_handler(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Query(owner): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    let kind: ThreadKind = kind.parse().map_err(ApiError::bad_request)?;
    let user_id = owner
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("user_id is required"))?;

    state
        .chat
        .delete_thread(&ThreadRef::new(kind, id), &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> ChatPayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn thread_selection_from_payload() {
        let base = serde_json::json!({"user_id": "u", "model": "m", "messages": []});

        let request = payload(base.clone()).into_request().unwrap();
        assert_eq!(request.kind, ThreadKind::Conversation);
        assert!(request.thread_id.is_none());

        let mut work = base.clone();
        work["work_id"] = "w1".into();
        let request = payload(work).into_request().unwrap();
        assert_eq!(request.kind, ThreadKind::Work);
        assert_eq!(request.thread_id.as_deref(), Some("w1"));

        let mut new_work = base.clone();
        new_work["kind"] = "work".into();
        let request = payload(new_work).into_request().unwrap();
        assert_eq!(request.kind, ThreadKind::Work);
        assert!(request.thread_id.is_none());

        let mut both = base;
        both["conversation_id"] = "c1".into();
        both["work_id"] = "w1".into();
        let err = payload(both).into_request().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn header_values_survive_odd_titles() {
        assert_eq!(header_value("line one\nline two"), "line one line two");
        assert_eq!(header_value("新对话").as_bytes(), "新对话".as_bytes());
    }
}
