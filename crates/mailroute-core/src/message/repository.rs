//! Message storage repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::{NewChatEmail, NewPost, StoredMessage};
use crate::Result;
use crate::outcome::RoutingOutcome;

/// Repository for message rows and their group associations.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Finds a message by Message-ID, matching either the bare id or
    /// a group-suffixed form (`<id>-<groupid>`). This lookup is what
    /// makes routing idempotent under MTA retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_message_id(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            r"
            SELECT id, messageid, outcome, fromuser
            FROM messages
            WHERE messageid = ? OR messageid LIKE ? || '-%'
            ORDER BY id ASC
            LIMIT 1
            ",
        )
        .bind(message_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredMessage {
            id: row.get("id"),
            message_id: row.get("messageid"),
            outcome: row
                .get::<Option<String>, _>("outcome")
                .as_deref()
                .and_then(RoutingOutcome::parse),
            from_user: row.get("fromuser"),
        }))
    }

    /// Stores a group post: message row, group association and
    /// history record in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database transaction fails.
    pub async fn insert_post(&self, post: &NewPost) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let message_row = sqlx::query(
            r"
            INSERT INTO messages
                (messageid, envelopefrom, fromuser, fromaddr, subject, textbody,
                 outcome, spamreason, arrival)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&post.message_id)
        .bind(&post.envelope_from)
        .bind(post.from_user)
        .bind(&post.from_address)
        .bind(&post.subject)
        .bind(&post.text_body)
        .bind(post.outcome.as_str())
        .bind(&post.spam_reason)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let msg_id = message_row.last_insert_rowid();

        sqlx::query(
            r"
            INSERT INTO messages_groups (msgid, groupid, collection, arrival)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(msg_id)
        .bind(post.group_id)
        .bind(post.collection.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO messages_history (msgid, messageid, envelopefrom, fromaddr, groupid, arrival)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(msg_id)
        .bind(&post.message_id)
        .bind(&post.envelope_from)
        .bind(&post.from_address)
        .bind(post.group_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(msg_id)
    }

    /// Stores a chat-bound email: message row (so the duplicate check
    /// covers chat replies), chat message and room freshness bump in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database transaction fails.
    pub async fn insert_chat_email(&self, email: &NewChatEmail) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let message_row = sqlx::query(
            r"
            INSERT INTO messages
                (messageid, envelopefrom, fromuser, fromaddr, subject, textbody,
                 outcome, spamreason, arrival)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ",
        )
        .bind(&email.message_id)
        .bind(&email.envelope_from)
        .bind(email.from_user)
        .bind(&email.from_address)
        .bind(&email.subject)
        .bind(&email.text_body)
        .bind(email.outcome.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let msg_id = message_row.last_insert_rowid();

        let chat_row = sqlx::query(
            r"
            INSERT INTO chat_messages (chatid, userid, message, date)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(email.chat_id)
        .bind(email.from_user)
        .bind(&email.text_body)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_rooms SET latestmessage = ? WHERE id = ?")
            .bind(chat_row.last_insert_rowid())
            .bind(email.chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(msg_id)
    }

    /// Counts all message rows, for zero-write assertions in tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Collection;
    use crate::store::Store;

    fn post(message_id: &str, group_id: i64) -> NewPost {
        NewPost {
            message_id: message_id.to_string(),
            envelope_from: "alice@example.com".to_string(),
            from_user: 1,
            from_address: "alice@example.com".to_string(),
            subject: "OFFER: Chair (Bristol)".to_string(),
            text_body: "Collection only".to_string(),
            outcome: RoutingOutcome::Approved,
            spam_reason: None,
            group_id,
            collection: Collection::Approved,
        }
    }

    #[tokio::test]
    async fn test_suffix_match_finds_group_suffixed_id() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.messages();
        repo.insert_post(&post("abc@example.com-7", 7)).await.unwrap();

        let found = repo.find_by_message_id("abc@example.com").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().outcome, Some(RoutingOutcome::Approved));
    }

    #[tokio::test]
    async fn test_exact_match() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.messages();
        repo.insert_post(&post("plain@example.com", 7)).await.unwrap();

        assert!(repo.find_by_message_id("plain@example.com").await.unwrap().is_some());
        assert!(repo.find_by_message_id("other@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chat_email_updates_room_freshness() {
        let store = Store::in_memory().await.unwrap();
        let chats = store.chats();
        let memberships = store.memberships();
        let repo = store.messages();

        let alice = memberships.create_user().await.unwrap();
        let bob = memberships.create_user().await.unwrap();
        let chat = chats.create_user_chat(alice, bob).await.unwrap();

        repo.insert_chat_email(&NewChatEmail {
            message_id: "reply@example.com".to_string(),
            envelope_from: "alice@example.com".to_string(),
            from_user: alice,
            from_address: "alice@example.com".to_string(),
            subject: "Re: chair".to_string(),
            text_body: "Still interested".to_string(),
            chat_id: chat,
            outcome: RoutingOutcome::ToUser,
        })
        .await
        .unwrap();

        let room = chats.find_room(chat).await.unwrap().unwrap();
        assert!(room.latest_message.is_some());
        assert!(repo.find_by_message_id("reply@example.com").await.unwrap().is_some());
    }
}
