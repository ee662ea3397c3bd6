//! Repository for chat storage operations.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{
    Chat, ChatMessage, ChatVisibility, CreateChat, CreateChatMessage, CreateSuggestion,
    Document, DocumentKind, Suggestion, Vote,
};

/// Fixed-width UTC timestamp; lexicographic order matches chronological
/// order, which the message-ordering queries rely on.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Repository for chats, messages, votes, documents and suggestions.
///
/// Creates are at-least-once: a retried create may duplicate, and nothing
/// here rolls back earlier writes when a later one fails.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========== Chat Operations ==========

    /// Insert a chat record.
    pub async fn create_chat(&self, chat: CreateChat) -> Result<Chat> {
        let created_at = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO chats (id, user_id, title, visibility, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.visibility.to_string())
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .context("inserting chat")?;

        self.get_chat(&chat.id)
            .await?
            .context("fetching inserted chat")
    }

    /// Look a chat up by id.
    pub async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        sqlx::query_as::<_, Chat>(
            "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chat")
    }

    /// List a user's chats, newest first.
    ///
    /// `ending_before` pages backwards from an existing chat id.
    pub async fn list_chats_by_user(
        &self,
        user_id: &str,
        limit: i64,
        ending_before: Option<&str>,
    ) -> Result<Vec<Chat>> {
        let cutoff = match ending_before {
            Some(chat_id) => {
                let chat = self
                    .get_chat(chat_id)
                    .await?
                    .with_context(|| format!("pagination chat not found: {}", chat_id))?;
                Some(chat.created_at)
            }
            None => None,
        };

        let chats = match cutoff {
            Some(cutoff) => {
                sqlx::query_as::<_, Chat>(
                    r#"
                    SELECT id, user_id, title, visibility, created_at
                    FROM chats
                    WHERE user_id = ? AND created_at < ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(user_id)
                .bind(cutoff)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Chat>(
                    r#"
                    SELECT id, user_id, title, visibility, created_at
                    FROM chats
                    WHERE user_id = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        };

        chats.context("listing chats")
    }

    /// Change a chat's visibility.
    pub async fn update_chat_visibility(
        &self,
        id: &str,
        visibility: ChatVisibility,
    ) -> Result<()> {
        sqlx::query("UPDATE chats SET visibility = ? WHERE id = ?")
            .bind(visibility.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating chat visibility")?;
        Ok(())
    }

    /// Delete a chat and everything hanging off it.
    ///
    /// Children go first (votes, then messages, then the chat row) so an
    /// interruption between steps never leaves orphans pointing at a missing
    /// parent. Forward-only cleanup, not a transaction.
    pub async fn delete_chat(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM votes WHERE chat_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting chat votes")?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting chat messages")?;

        sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting chat")?;
        Ok(())
    }

    // ========== Message Operations ==========

    /// Insert a message.
    pub async fn create_message(&self, message: CreateChatMessage) -> Result<ChatMessage> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339();
        let parts = serde_json::to_string(&message.parts).context("encoding message parts")?;
        let attachments =
            serde_json::to_string(&message.attachments).context("encoding attachments")?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&message.chat_id)
        .bind(message.role.to_string())
        .bind(&parts)
        .bind(&attachments)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .context("inserting message")?;

        self.get_message(&id)
            .await?
            .context("fetching inserted message")
    }

    /// Get a message by id.
    pub async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        sqlx::query_as::<_, ChatMessage>(
            "SELECT id, chat_id, role, parts, attachments, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching message")
    }

    /// All messages of a chat, ordered by creation time.
    pub async fn get_messages_by_chat(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, chat_id, role, parts, attachments, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching chat messages")
    }

    /// Delete every message of a chat at or after `created_at`.
    ///
    /// Used when a turn is regenerated from an earlier message.
    pub async fn delete_messages_after(&self, chat_id: &str, created_at: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE chat_id = ? AND created_at >= ?",
        )
        .bind(chat_id)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("deleting trailing messages")?;
        Ok(result.rows_affected())
    }

    // ========== Vote Operations ==========

    /// Record or flip a vote on a message.
    pub async fn upsert_vote(
        &self,
        chat_id: &str,
        message_id: &str,
        is_upvoted: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (chat_id, message_id, is_upvoted)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id, message_id) DO UPDATE SET is_upvoted = excluded.is_upvoted
            "#,
        )
        .bind(chat_id)
        .bind(message_id)
        .bind(is_upvoted)
        .execute(&self.pool)
        .await
        .context("upserting vote")?;
        Ok(())
    }

    /// All votes for a chat.
    pub async fn get_votes_by_chat(&self, chat_id: &str) -> Result<Vec<Vote>> {
        sqlx::query_as::<_, Vote>(
            "SELECT chat_id, message_id, is_upvoted FROM votes WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching votes")
    }

    // ========== Document Operations ==========

    /// Insert a document.
    pub async fn create_document(
        &self,
        user_id: &str,
        title: &str,
        kind: DocumentKind,
        content: Option<&str>,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, title, kind, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(kind.to_string())
        .bind(content)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .context("inserting document")?;

        self.get_document(&id)
            .await?
            .context("fetching inserted document")
    }

    /// Get a document by id.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        sqlx::query_as::<_, Document>(
            "SELECT id, user_id, title, kind, content, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching document")
    }

    /// Replace a document's content.
    pub async fn update_document_content(&self, id: &str, content: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating document content")?;
        Ok(())
    }

    // ========== Suggestion Operations ==========

    /// Insert suggestions for a document.
    pub async fn create_suggestions(
        &self,
        document_id: &str,
        suggestions: Vec<CreateSuggestion>,
    ) -> Result<usize> {
        let count = suggestions.len();
        for suggestion in suggestions {
            let id = Uuid::new_v4().to_string();
            let created_at = now_rfc3339();
            sqlx::query(
                r#"
                INSERT INTO suggestions
                    (id, document_id, original_text, suggested_text, description, is_resolved, created_at)
                VALUES (?, ?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&id)
            .bind(document_id)
            .bind(&suggestion.original_text)
            .bind(&suggestion.suggested_text)
            .bind(&suggestion.description)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .context("inserting suggestion")?;
        }
        Ok(count)
    }

    /// All suggestions for a document.
    pub async fn get_suggestions_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<Suggestion>> {
        sqlx::query_as::<_, Suggestion>(
            r#"
            SELECT id, document_id, original_text, suggested_text, description,
                   is_resolved, created_at
            FROM suggestions
            WHERE document_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching suggestions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::storage::models::MessageRole;

    async fn setup() -> ChatRepository {
        let db = Database::in_memory().await.unwrap();
        ChatRepository::new(db.pool().clone())
    }

    fn chat(id: &str, user_id: &str) -> CreateChat {
        CreateChat {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: "Test chat".to_string(),
            visibility: ChatVisibility::Private,
        }
    }

    #[tokio::test]
    async fn test_chat_crud() {
        let repo = setup().await;

        let created = repo.create_chat(chat("c1", "u1")).await.unwrap();
        assert_eq!(created.id, "c1");
        assert_eq!(created.visibility, ChatVisibility::Private);

        let fetched = repo.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Test chat");

        repo.update_chat_visibility("c1", ChatVisibility::Public)
            .await
            .unwrap();
        let fetched = repo.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(fetched.visibility, ChatVisibility::Public);

        assert!(repo.get_chat("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_messages_ordered_by_creation() {
        let repo = setup().await;
        repo.create_chat(chat("c1", "u1")).await.unwrap();

        for text in ["one", "two", "three"] {
            repo.create_message(CreateChatMessage::text("c1", MessageRole::User, text))
                .await
                .unwrap();
        }

        let messages = repo.get_messages_by_chat("c1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text_content(), "one");
        assert_eq!(messages[2].text_content(), "three");
    }

    #[tokio::test]
    async fn test_delete_chat_removes_children_first() {
        let repo = setup().await;
        repo.create_chat(chat("c1", "u1")).await.unwrap();
        let message = repo
            .create_message(CreateChatMessage::text("c1", MessageRole::User, "hello"))
            .await
            .unwrap();
        repo.upsert_vote("c1", &message.id, true).await.unwrap();

        repo.delete_chat("c1").await.unwrap();

        assert!(repo.get_chat("c1").await.unwrap().is_none());
        assert!(repo.get_messages_by_chat("c1").await.unwrap().is_empty());
        assert!(repo.get_votes_by_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_messages_after() {
        let repo = setup().await;
        repo.create_chat(chat("c1", "u1")).await.unwrap();

        repo.create_message(CreateChatMessage::text("c1", MessageRole::User, "keep"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let pivot = repo
            .create_message(CreateChatMessage::text("c1", MessageRole::Assistant, "drop"))
            .await
            .unwrap();
        repo.create_message(CreateChatMessage::text("c1", MessageRole::User, "drop too"))
            .await
            .unwrap();

        let removed = repo
            .delete_messages_after("c1", &pivot.created_at)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = repo.get_messages_by_chat("c1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text_content(), "keep");
    }

    #[tokio::test]
    async fn test_vote_upsert_flips() {
        let repo = setup().await;
        repo.create_chat(chat("c1", "u1")).await.unwrap();

        repo.upsert_vote("c1", "m1", true).await.unwrap();
        repo.upsert_vote("c1", "m1", false).await.unwrap();

        let votes = repo.get_votes_by_chat("c1").await.unwrap();
        assert_eq!(votes.len(), 1);
        assert!(!votes[0].is_upvoted);
    }

    #[tokio::test]
    async fn test_document_and_suggestions() {
        let repo = setup().await;

        let document = repo
            .create_document("u1", "Notes", DocumentKind::Text, Some("draft"))
            .await
            .unwrap();
        repo.update_document_content(&document.id, "final")
            .await
            .unwrap();
        let fetched = repo.get_document(&document.id).await.unwrap().unwrap();
        assert_eq!(fetched.content.as_deref(), Some("final"));

        let count = repo
            .create_suggestions(
                &document.id,
                vec![CreateSuggestion {
                    original_text: "final".to_string(),
                    suggested_text: "polished".to_string(),
                    description: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(count, 1);

        let suggestions = repo
            .get_suggestions_by_document(&document.id)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        assert!(!suggestions[0].is_resolved);
    }

    #[tokio::test]
    async fn test_list_chats_pagination() {
        let repo = setup().await;
        for id in ["c1", "c2", "c3"] {
            repo.create_chat(chat(id, "u1")).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let newest = repo.list_chats_by_user("u1", 2, None).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].id, "c3");

        let older = repo
            .list_chats_by_user("u1", 10, Some("c2"))
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "c1");
    }
}
