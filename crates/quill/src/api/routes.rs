//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    // Tracing layer with request timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Every /api route resolves the bearer token through the CurrentUser
    // extractor; unauthenticated requests get a terminal 401 before any
    // stream opens.
    let api_routes = Router::new()
        // Chat turns and live streams
        .route("/chat", post(handlers::chat_turn))
        .route("/chats/{chat_id}/stream", get(handlers::attach_chat_stream))
        // Chat management
        .route("/chats", get(handlers::list_chats))
        .route("/chats/{chat_id}", get(handlers::get_chat))
        .route("/chats/{chat_id}", delete(handlers::delete_chat))
        .route(
            "/chats/{chat_id}/visibility",
            patch(handlers::update_chat_visibility),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}/trailing",
            delete(handlers::delete_trailing_messages),
        )
        // Votes
        .route("/chats/{chat_id}/votes", get(handlers::get_votes))
        .route("/chats/{chat_id}/votes", patch(handlers::patch_vote))
        // Uploads and documents
        .route("/chats/{chat_id}/files", post(handlers::upload_chat_file))
        .route("/documents/{document_id}", get(handlers::get_document));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/login", post(handlers::login))
        .nest("/api", api_routes)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            HeaderValue::from_static("http://localhost:3000"),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
