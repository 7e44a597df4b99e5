//! SQLite-backed store shared by all repositories.
//!
//! One pool, one schema; repositories hand out narrow views so the
//! router never sees SQL. The pool is the only shared mutable
//! resource across deliveries.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;
use crate::chat::{ChatRepository, TrystRepository};
use crate::ledger::BounceLedger;
use crate::membership::MembershipRepository;
use crate::message::MessageRepository;

/// The backing store for the routing engine.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                suspended INTEGER NOT NULL DEFAULT 0,
                lastaccess TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                email TEXT NOT NULL UNIQUE,
                preferred INTEGER NOT NULL DEFAULT 0,
                bounced TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nameshort TEXT NOT NULL UNIQUE,
                moderated INTEGER NOT NULL DEFAULT 0,
                moderateall INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS memberships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                groupid INTEGER NOT NULL,
                role TEXT NOT NULL DEFAULT 'Member',
                ourpostingstatus TEXT NOT NULL DEFAULT 'DEFAULT',
                emailfrequency INTEGER NOT NULL DEFAULT 24,
                UNIQUE(userid, groupid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                messageid TEXT NOT NULL,
                envelopefrom TEXT NOT NULL,
                fromuser INTEGER,
                fromaddr TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                textbody TEXT NOT NULL DEFAULT '',
                outcome TEXT,
                spamreason TEXT,
                arrival TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_messageid ON messages(messageid)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                msgid INTEGER NOT NULL,
                groupid INTEGER NOT NULL,
                collection TEXT NOT NULL,
                arrival TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                msgid INTEGER NOT NULL,
                messageid TEXT NOT NULL,
                envelopefrom TEXT NOT NULL,
                fromaddr TEXT NOT NULL,
                groupid INTEGER NOT NULL,
                arrival TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chattype TEXT NOT NULL,
                user1 INTEGER,
                user2 INTEGER,
                groupid INTEGER,
                latestmessage INTEGER
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chatid INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                message TEXT NOT NULL,
                date TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_roster (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chatid INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                lastmsgseen INTEGER NOT NULL,
                UNIQUE(chatid, userid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS bounces_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                emailid INTEGER NOT NULL,
                date TEXT NOT NULL,
                diagnostic TEXT NOT NULL,
                permanent INTEGER NOT NULL DEFAULT 0,
                reset INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bounces_emailid ON bounces_emails(emailid)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS trysts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user1 INTEGER NOT NULL,
                user2 INTEGER NOT NULL,
                user1response TEXT,
                user2response TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Membership repository view.
    #[must_use]
    pub fn memberships(&self) -> MembershipRepository {
        MembershipRepository::new(self.pool.clone())
    }

    /// Message repository view.
    #[must_use]
    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.pool.clone())
    }

    /// Chat repository view.
    #[must_use]
    pub fn chats(&self) -> ChatRepository {
        ChatRepository::new(self.pool.clone())
    }

    /// Tryst repository view.
    #[must_use]
    pub fn trysts(&self) -> TrystRepository {
        TrystRepository::new(self.pool.clone())
    }

    /// Bounce ledger view.
    #[must_use]
    pub fn bounces(&self) -> BounceLedger {
        BounceLedger::new(self.pool.clone())
    }
}
