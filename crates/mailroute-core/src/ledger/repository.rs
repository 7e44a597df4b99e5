//! Bounce ledger storage.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::BounceRecord;
use crate::Result;

/// Repository for the bounce ledger and user suspension.
#[derive(Debug, Clone)]
pub struct BounceLedger {
    pool: SqlitePool,
}

impl BounceLedger {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends one record. The ledger is never updated in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record(&self, record: &BounceRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO bounces_emails (emailid, date, diagnostic, permanent, reset)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(record.email_id)
        .bind(record.date.to_rfc3339())
        .bind(&record.diagnostic)
        .bind(i64::from(record.permanent))
        .bind(i64::from(record.reset))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counts unresolved permanent records for one email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn unresolved_permanent(&self, email_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count
            FROM bounces_emails
            WHERE emailid = ? AND permanent = 1 AND reset = 0
            ",
        )
        .bind(email_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    /// Stamps the email's first-bounce timestamp if it is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_email_bounced_if_unset(&self, email_id: i64) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users_emails SET bounced = ?
            WHERE id = ? AND bounced IS NULL
            ",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(email_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Suspends a user's mail delivery. One-way and idempotent; there
    /// is no unsuspend path here.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn suspend_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET suspended = 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether a user's delivery is suspended.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_user_suspended(&self, user_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT suspended FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|r| r.get::<i64, _>("suspended") != 0))
    }
}
