//! API request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::chat::{ChatTurnRequest, StreamFrame};
use crate::storage::{Chat, ChatVisibility, Document, DocumentKind, Vote};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

/// Credential login issuing a bearer token.
#[instrument(skip(state, request))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = state
        .auth
        .check_credentials(&request.username, &request.password)?
        .clone();
    let token = state
        .auth
        .generate_token(&user.user_id, &user.username, user.role)?;

    info!(user_id = %user.user_id, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user_id: user.user_id,
        username: user.username,
    }))
}

// ============================================================================
// Chat Turn
// ============================================================================

fn frame_to_event(frame: StreamFrame) -> Result<Event, Infallible> {
    match serde_json::to_string(&frame) {
        Ok(json) => Ok(Event::default().data(json)),
        Err(err) => {
            warn!("failed to serialize stream frame: {}", err);
            Ok(Event::default().data("{\"type\":\"error\",\"message\":\"serialization failed\"}"))
        }
    }
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keepalive")
}

/// Run a chat turn, streaming the reply as server-sent events.
///
/// POST /api/chat
///
/// The user message is persisted and the chat resolved before the stream
/// opens; validation and persistence failures surface as plain HTTP errors.
/// The response stream ends when the turn is done, delivering every frame
/// broadcast to the chat in between.
#[instrument(skip(state, user, request))]
pub async fn chat_turn(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChatTurnRequest>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let turn = state.orchestrator.begin_turn(&user.0, &request).await?;
    info!(chat_id = %turn.chat_id, model = %turn.model_name, "chat turn started");

    // The turn's own subscription goes to the orchestrator task; when the
    // turn reaches Done the registry drops the sender and this response
    // stream ends on its own.
    let (subscription, rx) = state.streams.subscribe(&turn.chat_id);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.stream_turn(turn, subscription).await;
    });

    let stream = ReceiverStream::new(rx).map(frame_to_event);
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// Attach to a chat's live event stream without sending a turn.
///
/// GET /api/chats/{chat_id}/stream
///
/// A late joiner only sees frames broadcast from this point on; there is no
/// replay.
#[instrument(skip(state, user))]
pub async fn attach_chat_stream(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let chat = require_chat(&state, &chat_id).await?;
    require_visible(&chat, &user)?;

    let (subscription, rx) = state.streams.subscribe(&chat_id);
    info!(chat_id = %chat_id, user_id = %user.id(), "subscriber attached");

    // The guard rides inside the stream so the subscription ends exactly
    // when the client connection does.
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _guard = &subscription;
        frame_to_event(frame)
    });
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

// ============================================================================
// Chat Management
// ============================================================================

async fn require_chat(state: &AppState, chat_id: &str) -> ApiResult<Chat> {
    state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("chat not found: {}", chat_id)))
}

fn require_owner(chat: &Chat, user: &CurrentUser) -> ApiResult<()> {
    if chat.user_id != user.id() {
        return Err(ApiError::unauthorized("chat belongs to another user"));
    }
    Ok(())
}

fn require_visible(chat: &Chat, user: &CurrentUser) -> ApiResult<()> {
    if chat.visibility == ChatVisibility::Public {
        return Ok(());
    }
    require_owner(chat, user)
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub ending_before: Option<String>,
}

/// List the requester's chats, newest first.
#[instrument(skip(state, user))]
pub async fn list_chats(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListChatsQuery>,
) -> ApiResult<Json<Vec<Chat>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let chats = state
        .store
        .list_chats_by_user(user.id(), limit, query.ending_before.as_deref())
        .await?;
    Ok(Json(chats))
}

/// A stored message with its parts decoded for the client.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub role: String,
    pub parts: serde_json::Value,
    pub attachments: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: Chat,
    pub messages: Vec<MessageView>,
}

/// Fetch a chat with its messages, ordered by creation time.
#[instrument(skip(state, user))]
pub async fn get_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatView>> {
    let chat = require_chat(&state, &chat_id).await?;
    require_visible(&chat, &user)?;

    let messages = state
        .store
        .get_messages_by_chat(&chat_id)
        .await?
        .into_iter()
        .map(|m| MessageView {
            id: m.id.clone(),
            role: m.role.to_string(),
            parts: serde_json::from_str(&m.parts).unwrap_or_default(),
            attachments: serde_json::from_str(&m.attachments).unwrap_or_default(),
            created_at: m.created_at.clone(),
        })
        .collect();

    Ok(Json(ChatView { chat, messages }))
}

/// Delete a chat and all its records.
///
/// DELETE /api/chats/{chat_id}
///
/// Votes go first, then messages, then the chat itself, so an interruption
/// never leaves children pointing at a missing chat.
#[instrument(skip(state, user))]
pub async fn delete_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<StatusCode> {
    let chat = require_chat(&state, &chat_id).await?;
    require_owner(&chat, &user)?;

    state.store.delete_chat(&chat_id).await?;
    info!(chat_id = %chat_id, user_id = %user.id(), "chat deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateVisibilityRequest {
    pub visibility: String,
}

/// Change a chat's visibility.
#[instrument(skip(state, user, request))]
pub async fn update_chat_visibility(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    Json(request): Json<UpdateVisibilityRequest>,
) -> ApiResult<StatusCode> {
    let chat = require_chat(&state, &chat_id).await?;
    require_owner(&chat, &user)?;

    let visibility: ChatVisibility = request
        .visibility
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;
    state.store.update_chat_visibility(&chat_id, visibility).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct DeleteTrailingResponse {
    pub deleted: u64,
}

/// Delete a message and everything after it (turn regeneration).
///
/// DELETE /api/chats/{chat_id}/messages/{message_id}/trailing
#[instrument(skip(state, user))]
pub async fn delete_trailing_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> ApiResult<Json<DeleteTrailingResponse>> {
    let chat = require_chat(&state, &chat_id).await?;
    require_owner(&chat, &user)?;

    let message = state
        .store
        .get_message(&message_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("message not found: {}", message_id)))?;
    if message.chat_id != chat_id {
        return Err(ApiError::bad_request("message does not belong to this chat"));
    }

    let deleted = state
        .store
        .delete_messages_after(&chat_id, &message.created_at)
        .await?;
    Ok(Json(DeleteTrailingResponse { deleted }))
}

// ============================================================================
// Votes
// ============================================================================

/// List votes for a chat.
#[instrument(skip(state, user))]
pub async fn get_votes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<Vote>>> {
    let chat = require_chat(&state, &chat_id).await?;
    require_visible(&chat, &user)?;

    let votes = state.store.get_votes_by_chat(&chat_id).await?;
    Ok(Json(votes))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub message_id: String,
    /// "up" or "down".
    #[serde(rename = "type")]
    pub vote_type: String,
}

/// Record a vote on a message.
#[instrument(skip(state, user, request))]
pub async fn patch_vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<StatusCode> {
    let chat = require_chat(&state, &chat_id).await?;
    require_owner(&chat, &user)?;

    let is_upvoted = match request.vote_type.as_str() {
        "up" => true,
        "down" => false,
        other => {
            return Err(ApiError::bad_request(format!("invalid vote type: {}", other)));
        }
    };

    state
        .store
        .upsert_vote(&chat_id, &request.message_id, is_upvoted)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Uploads
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub name: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Upload a file into a chat's context.
///
/// POST /api/chats/{chat_id}/files
///
/// The chat is marked upload-active for the whole operation so its
/// heartbeat keeps subscribed streams alive; the mark is cleared on every
/// exit path, success or failure.
#[instrument(skip(state, user, multipart))]
pub async fn upload_chat_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    state.streams.mark_upload_started(&chat_id);
    let result = store_upload(&state, &user, &chat_id, multipart).await;
    state.streams.mark_upload_complete(&chat_id);
    result.map(Json)
}

async fn store_upload(
    state: &AppState,
    user: &CurrentUser,
    chat_id: &str,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let mut upload: Option<(String, String, bytes::Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::bad_request("missing file name"))?;
        let content_type = field.content_type().map(str::to_string).unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string()
        });
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("reading upload: {}", e)))?;
        upload = Some((file_name, content_type, data));
        break;
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("empty file"));
    }

    // Blob storage boundary: local disk under the uploads dir.
    let dir = state.uploads_dir.join(chat_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::internal(format!("creating upload directory: {}", e)))?;
    let stored_name = format!("{}-{}", Uuid::new_v4(), file_name);
    tokio::fs::write(dir.join(&stored_name), &data)
        .await
        .map_err(|e| ApiError::internal(format!("writing upload: {}", e)))?;

    // Text extraction boundary: text-like payloads become documents the
    // model can reference.
    let document_id = if is_text_payload(&content_type) {
        match String::from_utf8(data.to_vec()) {
            Ok(text) => {
                let document = state
                    .store
                    .create_document(user.id(), &file_name, DocumentKind::Text, Some(&text))
                    .await?;
                Some(document.id)
            }
            Err(_) => {
                warn!("upload {} claims {} but is not valid UTF-8", file_name, content_type);
                None
            }
        }
    } else {
        None
    };

    let has_images = content_type.starts_with("image/");
    state
        .streams
        .broadcast(chat_id, StreamFrame::DocumentContextUpdate { has_images })
        .await;

    info!(chat_id = %chat_id, name = %file_name, "file uploaded");
    Ok(UploadResponse {
        url: format!("/uploads/{}/{}", chat_id, stored_name),
        name: file_name,
        content_type,
        document_id,
    })
}

fn is_text_payload(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || matches!(
            content_type,
            "application/json" | "application/xml" | "application/x-markdown"
        )
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

// ============================================================================
// Documents
// ============================================================================

/// Fetch a document produced by tools or uploads.
#[instrument(skip(state, user))]
pub async fn get_document(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_id): Path<String>,
) -> ApiResult<Json<Document>> {
    let document = state
        .store
        .get_document(&document_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("document not found: {}", document_id)))?;
    if document.user_id != user.id() {
        return Err(ApiError::unauthorized("document belongs to another user"));
    }
    Ok(Json(document))
}
