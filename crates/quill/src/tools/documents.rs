//! Document tools: create, update, and suggest edits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;

use super::{ChatTool, ToolContext};
use crate::storage::{CreateSuggestion, DocumentKind};

const DOCUMENT_WRITER_PROMPT: &str = "You are a writing assistant. Write a \
document about the given topic. Markdown is allowed. Respond with the \
document content only, no preamble.";

const DOCUMENT_UPDATER_PROMPT: &str = "You are a writing assistant. Rewrite \
the given document according to the instructions. Respond with the full \
updated document content only.";

const SUGGESTIONS_PROMPT: &str = "You are a writing assistant. Given a \
document, propose improvements as a JSON array of objects with keys \
\"original_text\", \"suggested_text\" and \"description\". Respond with the \
JSON array only.";

/// Create a document and fill it with model-generated content.
pub struct CreateDocumentTool;

#[derive(Debug, Deserialize)]
struct CreateDocumentArgs {
    title: String,
    #[serde(default)]
    kind: Option<DocumentKind>,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatTool for CreateDocumentTool {
    fn name(&self) -> &'static str {
        "create_document"
    }

    fn description(&self) -> &'static str {
        "Create a document for writing or content creation activities."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "kind": { "type": "string", "enum": ["text", "code", "sheet"] },
                "content": { "type": "string" }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<String> {
        let args: CreateDocumentArgs =
            serde_json::from_value(arguments).context("create_document arguments")?;
        let kind = args.kind.unwrap_or_default();

        let content = match args.content {
            Some(content) => content,
            None => ctx
                .model
                .complete(&ctx.model_name, DOCUMENT_WRITER_PROMPT, &args.title)
                .await
                .context("generating document content")?,
        };

        let document = ctx
            .store
            .create_document(&ctx.user_id, &args.title, kind, Some(&content))
            .await?;

        debug!("created document {} for chat {}", document.id, ctx.chat_id);
        Ok(format!(
            "Created {} document \"{}\" (id {}).",
            kind, args.title, document.id
        ))
    }
}

/// Rewrite an existing document per a description of the change.
pub struct UpdateDocumentTool;

#[derive(Debug, Deserialize)]
struct UpdateDocumentArgs {
    id: String,
    description: String,
}

#[async_trait]
impl ChatTool for UpdateDocumentTool {
    fn name(&self) -> &'static str {
        "update_document"
    }

    fn description(&self) -> &'static str {
        "Update an existing document with the described changes."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "description": { "type": "string" }
            },
            "required": ["id", "description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<String> {
        let args: UpdateDocumentArgs =
            serde_json::from_value(arguments).context("update_document arguments")?;

        let document = ctx
            .store
            .get_document(&args.id)
            .await?
            .with_context(|| format!("document not found: {}", args.id))?;

        let prompt = format!(
            "Instructions: {}\n\nDocument:\n{}",
            args.description,
            document.content.unwrap_or_default()
        );
        let updated = ctx
            .model
            .complete(&ctx.model_name, DOCUMENT_UPDATER_PROMPT, &prompt)
            .await
            .context("generating updated document content")?;

        ctx.store
            .update_document_content(&document.id, &updated)
            .await?;

        Ok(format!("Updated document \"{}\".", document.title))
    }
}

/// Ask the model for edit suggestions and persist them.
pub struct RequestSuggestionsTool;

#[derive(Debug, Deserialize)]
struct RequestSuggestionsArgs {
    document_id: String,
}

#[async_trait]
impl ChatTool for RequestSuggestionsTool {
    fn name(&self) -> &'static str {
        "request_suggestions"
    }

    fn description(&self) -> &'static str {
        "Request writing suggestions for an existing document."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string" }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<String> {
        let args: RequestSuggestionsArgs =
            serde_json::from_value(arguments).context("request_suggestions arguments")?;

        let document = ctx
            .store
            .get_document(&args.document_id)
            .await?
            .with_context(|| format!("document not found: {}", args.document_id))?;

        let reply = ctx
            .model
            .complete(
                &ctx.model_name,
                SUGGESTIONS_PROMPT,
                &document.content.unwrap_or_default(),
            )
            .await
            .context("generating suggestions")?;

        let suggestions: Vec<CreateSuggestion> =
            serde_json::from_str(reply.trim()).context("decoding suggestions")?;
        let count = ctx
            .store
            .create_suggestions(&document.id, suggestions)
            .await?;

        Ok(format!(
            "Added {} suggestions to document \"{}\".",
            count, document.title
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::MockProvider;
    use crate::storage::ChatRepository;
    use std::sync::Arc;

    async fn context(completion: &str) -> ToolContext {
        let db = Database::in_memory().await.unwrap();
        ToolContext {
            store: Arc::new(ChatRepository::new(db.pool().clone())),
            model: Arc::new(MockProvider::canned().with_completion(completion)),
            model_name: "mock".to_string(),
            user_id: "u1".to_string(),
            chat_id: "c1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_document_generates_content() {
        let ctx = context("Generated body").await;
        let output = CreateDocumentTool
            .execute(&ctx, json!({ "title": "Trip notes" }))
            .await
            .unwrap();
        assert!(output.contains("Trip notes"));

        // The document landed with model-generated content.
        let id = output
            .rsplit_once("(id ")
            .map(|(_, rest)| rest.trim_end_matches(").").to_string())
            .unwrap();
        let document = ctx.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(document.content.as_deref(), Some("Generated body"));
    }

    #[tokio::test]
    async fn test_update_document_missing_is_error() {
        let ctx = context("irrelevant").await;
        let result = UpdateDocumentTool
            .execute(&ctx, json!({ "id": "nope", "description": "tighten it" }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_suggestions_persists_rows() {
        let ctx = context(
            r#"[{"original_text":"a","suggested_text":"b","description":"clearer"}]"#,
        )
        .await;
        let document = ctx
            .store
            .create_document("u1", "Draft", DocumentKind::Text, Some("a"))
            .await
            .unwrap();

        let output = RequestSuggestionsTool
            .execute(&ctx, json!({ "document_id": document.id }))
            .await
            .unwrap();
        assert!(output.contains("1 suggestions"));

        let rows = ctx
            .store
            .get_suggestions_by_document(&document.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].suggested_text, "b");
    }
}
