use crate::{
    directory::Bot,
    error::{DashboardError, Result},
    message::{Message, RawMessageRow},
};
use anyhow::Context;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteRow},
    ConnectOptions, QueryBuilder, Row, Sqlite, SqlitePool,
};
use std::{collections::HashMap, path::Path, str::FromStr};
use tracing::debug;

/// Rows fetched per range request when paging through `chatbot`.
pub const BATCH_SIZE: i64 = 1000;

const MESSAGE_COLUMNS: &str = "id, created_at, typebot_id, thread_id, user_message, bot_message, \
     user_email, user_name, user_phone, user_company, user_callback_message, suggested_message, \
     sentiment_analysis, sentiment_analysis_justification, chat_history, callback_spare1, callback_spare2";

/// Result of persisting a sentiment score onto a thread's anchor message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SentimentUpdate {
    pub message_id: String,
    pub thread_id: String,
    pub score: i64,
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` would otherwise see its own empty schema.
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chatbot (
                id TEXT PRIMARY KEY,
                created_at DATETIME NOT NULL,
                typebot_id TEXT,
                thread_id TEXT,
                user_message TEXT,
                bot_message TEXT,
                user_email TEXT,
                user_name TEXT,
                user_phone TEXT,
                user_company TEXT,
                user_callback_message TEXT,
                suggested_message TEXT,
                sentiment_analysis INTEGER,
                sentiment_analysis_justification TEXT,
                chat_history TEXT,
                callback_spare1 TEXT,
                callback_spare2 TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_chatbot_thread_created ON chatbot(thread_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_chatbot_bot ON chatbot(typebot_id);

            CREATE TABLE IF NOT EXISTS client_table (
                bot_id TEXT PRIMARY KEY,
                bot_name TEXT,
                sentiment_analysis_prompt TEXT
            );

            CREATE TABLE IF NOT EXISTS user_bot_assignments (
                user_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                PRIMARY KEY (user_id, bot_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Fetch the threaded content rows of the given bots, paging in range
    /// batches, with each bot's sentiment prompt attached. `selected_bot`
    /// narrows the result to one of `bot_ids`.
    ///
    /// Rows with none of user text, bot text, suggestion or email are left
    /// out. Rows come back ordered by `thread_id DESC, created_at ASC, id ASC`.
    pub async fn fetch_messages(
        &self,
        bot_ids: &[String],
        selected_bot: Option<&str>,
    ) -> Result<Vec<RawMessageRow>> {
        if bot_ids.is_empty() {
            return Ok(Vec::new());
        }

        let prompts = self.sentiment_prompts(bot_ids).await?;
        let mut all = Vec::new();
        let mut start = 0;

        loop {
            let mut query = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {MESSAGE_COLUMNS} FROM chatbot WHERE thread_id IS NOT NULL \
                 AND (user_message IS NOT NULL OR suggested_message IS NOT NULL \
                 OR bot_message IS NOT NULL OR user_email IS NOT NULL) \
                 AND typebot_id IN ("
            ));
            let mut ids = query.separated(", ");
            for id in bot_ids {
                ids.push_bind(id.clone());
            }
            ids.push_unseparated(")");
            if let Some(bot) = selected_bot {
                query.push(" AND typebot_id = ").push_bind(bot.to_string());
            }
            query
                .push(" ORDER BY thread_id DESC, created_at ASC, id ASC LIMIT ")
                .push_bind(BATCH_SIZE)
                .push(" OFFSET ")
                .push_bind(start);

            let rows = query.build().fetch_all(&self.pool).await?;
            if rows.is_empty() {
                break;
            }
            debug!("Fetched {} chatbot rows at offset {}", rows.len(), start);

            for row in &rows {
                let mut raw = raw_message(row)?;
                raw.sentiment_analysis_prompt = raw
                    .typebot_id
                    .as_ref()
                    .and_then(|bot| prompts.get(bot).cloned());
                all.push(raw);
            }
            start += BATCH_SIZE;
        }

        Ok(all)
    }

    /// Bot ids the user is allowed to see.
    pub async fn assigned_bot_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT bot_id FROM user_bot_assignments
            WHERE user_id = ?
            ORDER BY bot_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("bot_id").map_err(DashboardError::from))
            .collect()
    }

    /// Directory entries for exactly the given ids, ordered by name.
    pub async fn bot_names(&self, bot_ids: &[String]) -> Result<Vec<Bot>> {
        if bot_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT bot_id, bot_name, sentiment_analysis_prompt FROM client_table WHERE bot_id IN (",
        );
        let mut ids = query.separated(", ");
        for id in bot_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
        query.push(" ORDER BY bot_name ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(bot_from_row).collect()
    }

    pub async fn sentiment_prompt(&self, bot_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT sentiment_analysis_prompt FROM client_table WHERE bot_id = ?")
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("sentiment_analysis_prompt")?),
            None => Ok(None),
        }
    }

    async fn sentiment_prompts(&self, bot_ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(self
            .bot_names(bot_ids)
            .await?
            .into_iter()
            .filter_map(|bot| bot.sentiment_prompt.map(|prompt| (bot.bot_id, prompt)))
            .collect())
    }

    /// Messages of one thread, oldest first.
    pub async fn thread_messages(&self, thread_id: &str) -> Result<Vec<RawMessageRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chatbot WHERE thread_id = ? ORDER BY created_at ASC"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(raw_message).collect()
    }

    /// Write a sentiment score onto the chronologically first message of the
    /// thread. Later rows are left untouched.
    pub async fn update_thread_sentiment(
        &self,
        thread_id: &str,
        score: i64,
        justification: Option<&str>,
        chat_history: Option<&str>,
    ) -> Result<SentimentUpdate> {
        let anchor = sqlx::query(
            r#"
            SELECT id FROM chatbot
            WHERE thread_id = ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DashboardError::not_found("No messages found for the thread"))?;

        let message_id: String = anchor.try_get("id")?;

        sqlx::query(
            r#"
            UPDATE chatbot
            SET sentiment_analysis = ?,
                sentiment_analysis_justification = ?,
                chat_history = ?
            WHERE id = ?
            "#,
        )
        .bind(score)
        .bind(justification.unwrap_or_default())
        .bind(chat_history.unwrap_or_default())
        .bind(&message_id)
        .execute(&self.pool)
        .await?;

        Ok(SentimentUpdate {
            message_id,
            thread_id: thread_id.to_string(),
            score,
        })
    }

    /// Insert a message row; an existing row with the same id is kept.
    pub async fn insert_message(&self, msg: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chatbot (
                id, created_at, typebot_id, thread_id, user_message, bot_message,
                user_email, user_name, user_phone, user_company, user_callback_message,
                suggested_message, sentiment_analysis, sentiment_analysis_justification,
                chat_history, callback_spare1
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(msg.created_at)
        .bind(&msg.bot_id)
        .bind(&msg.thread_id)
        .bind(&msg.user_message)
        .bind(&msg.bot_message)
        .bind(&msg.user_email)
        .bind(&msg.user_name)
        .bind(&msg.user_phone)
        .bind(&msg.user_company)
        .bind(&msg.user_callback_message)
        .bind(&msg.suggested_question)
        .bind(msg.sentiment_score)
        .bind(&msg.sentiment_justification)
        .bind(&msg.chat_history)
        .bind(&msg.callback)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Save or update a directory entry.
    pub async fn upsert_bot(&self, bot: &Bot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO client_table (bot_id, bot_name, sentiment_analysis_prompt)
            VALUES (?, ?, ?)
            ON CONFLICT(bot_id) DO UPDATE SET
                bot_name = excluded.bot_name,
                sentiment_analysis_prompt = excluded.sentiment_analysis_prompt
            "#,
        )
        .bind(&bot.bot_id)
        .bind(&bot.bot_name)
        .bind(&bot.sentiment_prompt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn assign_bot(&self, user_id: &str, bot_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_bot_assignments (user_id, bot_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(bot_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn raw_message(row: &SqliteRow) -> Result<RawMessageRow> {
    Ok(RawMessageRow {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        typebot_id: row.try_get("typebot_id")?,
        bot_id: None,
        thread_id: row.try_get("thread_id")?,
        user_message: row.try_get("user_message")?,
        bot_message: row.try_get("bot_message")?,
        user_email: row.try_get("user_email")?,
        user_name: row.try_get("user_name")?,
        user_phone: row.try_get("user_phone")?,
        user_company: row.try_get("user_company")?,
        user_callback_message: row.try_get("user_callback_message")?,
        suggested_message: row.try_get("suggested_message")?,
        suggested_question: None,
        sentiment_analysis: row.try_get("sentiment_analysis")?,
        sentiment_analysis_justification: row.try_get("sentiment_analysis_justification")?,
        sentiment_analysis_prompt: None,
        chat_history: row.try_get("chat_history")?,
        callback_spare1: row.try_get("callback_spare1")?,
        callback_spare2: row.try_get("callback_spare2")?,
    })
}

fn bot_from_row(row: &SqliteRow) -> Result<Bot> {
    Ok(Bot {
        bot_id: row.try_get("bot_id")?,
        bot_name: row.try_get("bot_name")?,
        sentiment_prompt: row.try_get("sentiment_analysis_prompt")?,
    })
}
