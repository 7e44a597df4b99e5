//! Membership storage repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::{Group, Membership, PostingStatus, Role, UserEmail};
use crate::Result;

/// Repository for users, groups, emails and memberships.
#[derive(Debug, Clone)]
pub struct MembershipRepository {
    pool: SqlitePool,
}

impl MembershipRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Looks up a group by its short name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn group_by_short_name(&self, short_name: &str) -> Result<Option<Group>> {
        let row = sqlx::query(
            r"
            SELECT id, nameshort, moderated, moderateall
            FROM groups
            WHERE LOWER(nameshort) = LOWER(?)
            ",
        )
        .bind(short_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Group {
            id: row.get("id"),
            short_name: row.get("nameshort"),
            moderated: row.get::<i64, _>("moderated") != 0,
            moderate_all: row.get::<i64, _>("moderateall") != 0,
        }))
    }

    /// Finds a user's membership of a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_membership(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<Option<Membership>> {
        let row = sqlx::query(
            r"
            SELECT userid, groupid, role, ourpostingstatus, emailfrequency
            FROM memberships
            WHERE userid = ? AND groupid = ?
            ",
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Membership {
            user_id: row.get("userid"),
            group_id: row.get("groupid"),
            role: Role::parse(row.get::<String, _>("role").as_str()).unwrap_or(Role::Member),
            posting_status: PostingStatus::parse(
                row.get::<String, _>("ourpostingstatus").as_str(),
            )
            .unwrap_or(PostingStatus::Default),
            email_frequency: row.get("emailfrequency"),
        }))
    }

    /// Finds the registered email row for an address, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_email(&self, email: &str) -> Result<Option<UserEmail>> {
        let row = sqlx::query(
            r"
            SELECT id, userid, email, preferred, bounced
            FROM users_emails
            WHERE LOWER(email) = LOWER(?)
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::email_from_row))
    }

    /// The user's preferred email row, falling back to any email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn preferred_email(&self, user_id: i64) -> Result<Option<UserEmail>> {
        let row = sqlx::query(
            r"
            SELECT id, userid, email, preferred, bounced
            FROM users_emails
            WHERE userid = ?
            ORDER BY preferred DESC, id ASC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::email_from_row))
    }

    /// Whether a user row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn user_exists(&self, user_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Registers an address against a user unless some user already
    /// owns it. Mail senders often reply from an alias we have not
    /// seen before.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add_email_if_missing(&self, user_id: i64, email: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users_emails (userid, email, preferred)
            VALUES (?, LOWER(?), 0)
            ON CONFLICT(email) DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears the digest preference for one membership. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_digest_off(&self, user_id: i64, group_id: i64) -> Result<()> {
        sqlx::query(
            r"
            UPDATE memberships SET emailfrequency = 0
            WHERE userid = ? AND groupid = ?
            ",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Adds a membership. Idempotent: an existing row is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add_membership(
        &self,
        user_id: i64,
        group_id: i64,
        role: Role,
        posting_status: PostingStatus,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO memberships (userid, groupid, role, ourpostingstatus, emailfrequency)
            VALUES (?, ?, ?, ?, 24)
            ON CONFLICT(userid, groupid) DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(group_id)
        .bind(role.as_str())
        .bind(posting_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes a membership. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove_membership(&self, user_id: i64, group_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM memberships WHERE userid = ? AND groupid = ?")
            .bind(user_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records sign-of-life for a user who mailed us.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn touch_last_access(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET lastaccess = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Creates a user row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create_user(&self) -> Result<i64> {
        let result = sqlx::query("INSERT INTO users (suspended, lastaccess) VALUES (0, ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Creates a group row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create_group(&self, short_name: &str, moderated: bool) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO groups (nameshort, moderated, moderateall) VALUES (?, ?, 0)")
                .bind(short_name)
                .bind(i64::from(moderated))
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Flips the group-wide moderate-everything override.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_moderate_all(&self, group_id: i64, on: bool) -> Result<()> {
        sqlx::query("UPDATE groups SET moderateall = ? WHERE id = ?")
            .bind(i64::from(on))
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Registers an email for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add_email(&self, user_id: i64, email: &str, preferred: bool) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO users_emails (userid, email, preferred) VALUES (?, LOWER(?), ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(i64::from(preferred))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    fn email_from_row(row: sqlx::sqlite::SqliteRow) -> UserEmail {
        UserEmail {
            id: row.get("id"),
            user_id: row.get("userid"),
            email: row.get("email"),
            preferred: row.get::<i64, _>("preferred") != 0,
            bounced: row.get("bounced"),
        }
    }
}
