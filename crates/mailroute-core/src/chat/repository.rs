//! Chat and tryst storage repositories.

use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::{ChatRoom, ChatType, Tryst, TrystResponse};
use crate::Result;

/// Repository for chat rooms and read rosters.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Looks up a room by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_room(&self, chat_id: i64) -> Result<Option<ChatRoom>> {
        let row = sqlx::query(
            r"
            SELECT id, chattype, user1, user2, groupid, latestmessage
            FROM chat_rooms
            WHERE id = ?
            ",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ChatRoom {
            id: row.get("id"),
            chat_type: ChatType::parse(row.get::<String, _>("chattype").as_str())
                .unwrap_or(ChatType::User2User),
            user1: row.get("user1"),
            user2: row.get("user2"),
            group_id: row.get("groupid"),
            latest_message: row.get("latestmessage"),
        }))
    }

    /// Creates a member-to-member room.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create_user_chat(&self, user1: i64, user2: i64) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO chat_rooms (chattype, user1, user2, groupid)
            VALUES (?, ?, ?, NULL)
            ",
        )
        .bind(ChatType::User2User.as_str())
        .bind(user1)
        .bind(user2)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The member-to-volunteers room for a user and group, created on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn volunteers_room(&self, user_id: i64, group_id: i64) -> Result<i64> {
        let existing = sqlx::query(
            r"
            SELECT id FROM chat_rooms
            WHERE chattype = ? AND user1 = ? AND groupid = ?
            ",
        )
        .bind(ChatType::User2Mod.as_str())
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(row.get("id"));
        }

        let result = sqlx::query(
            r"
            INSERT INTO chat_rooms (chattype, user1, user2, groupid)
            VALUES (?, ?, NULL, ?)
            ",
        )
        .bind(ChatType::User2Mod.as_str())
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Records how far a user has read in a room. Idempotent; the
    /// high-water mark never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_read(&self, chat_id: i64, user_id: i64, chat_message_id: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO chat_roster (chatid, userid, lastmsgseen)
            VALUES (?, ?, ?)
            ON CONFLICT(chatid, userid) DO UPDATE SET
                lastmsgseen = MAX(lastmsgseen, excluded.lastmsgseen)
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(chat_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The user's read high-water mark in a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn last_seen(&self, chat_id: i64, user_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            r"
            SELECT lastmsgseen FROM chat_roster
            WHERE chatid = ? AND userid = ?
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get("lastmsgseen")))
    }

    /// When the room last saw a message, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn last_activity(&self, chat_id: i64) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let row = sqlx::query("SELECT MAX(date) AS latest FROM chat_messages WHERE chatid = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        let latest: Option<String> = row.get("latest");
        Ok(latest
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&chrono::Utc)))
    }

    /// Counts chat message rows, for zero-write assertions in tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn message_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM chat_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

/// Repository for handover arrangements.
#[derive(Debug, Clone)]
pub struct TrystRepository {
    pool: SqlitePool,
}

impl TrystRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Looks up an arrangement by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find(&self, tryst_id: i64) -> Result<Option<Tryst>> {
        let row = sqlx::query("SELECT id, user1, user2 FROM trysts WHERE id = ?")
            .bind(tryst_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Tryst {
            id: row.get("id"),
            user1: row.get("user1"),
            user2: row.get("user2"),
        }))
    }

    /// Creates an arrangement between two members.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&self, user1: i64, user2: i64) -> Result<i64> {
        let result = sqlx::query("INSERT INTO trysts (user1, user2) VALUES (?, ?)")
            .bind(user1)
            .bind(user2)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Records one party's answer. Idempotent: re-recording the same
    /// or a different answer simply overwrites.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_response(
        &self,
        tryst_id: i64,
        user_id: i64,
        response: TrystResponse,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE trysts SET
                user1response = CASE WHEN user1 = ?1 THEN ?2 ELSE user1response END,
                user2response = CASE WHEN user2 = ?1 THEN ?2 ELSE user2response END
            WHERE id = ?3
            ",
        )
        .bind(user_id)
        .bind(response.as_str())
        .bind(tryst_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One party's recorded answer, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn response_of(&self, tryst_id: i64, user_id: i64) -> Result<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT
                CASE WHEN user1 = ?1 THEN user1response
                     WHEN user2 = ?1 THEN user2response
                END AS response
            FROM trysts WHERE id = ?2
            ",
        )
        .bind(user_id)
        .bind(tryst_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get("response")))
    }
}
