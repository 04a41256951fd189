// SQLite-backed host store.
//
// Tables:
// - users, topics, posts, comments: the content the pipeline checks
// - spam_fields: per-target fields the pipeline persists (spam_state, origin, task id)
// - escalations / escalation_scores: the human review queue
// - author_notices: messages sent to authors about their content
// - host_events: inbound content/review events written by the host, drained by the worker

use crate::core::moderation::{
    Author, AuthorNotice, BouncerError, CommentParent, CommentTarget, ContentModerator,
    EscalationHandle, EscalationScore, EscalationSink, NewEscalation, OriginMetadata, PostTarget,
    SpamState, TargetFieldStore, TargetKind, TargetRef, TargetSource, TopicInfo, TrustLevel,
    UserTarget,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::broadcast;

const SPAM_STATE_FIELD: &str = "spam_state";
const IP_ADDRESS_FIELD: &str = "ip_address";
const USER_AGENT_FIELD: &str = "user_agent";
const REFERRER_FIELD: &str = "referrer";
const TASK_ID_FIELD: &str = "task_id";

/// Escalation status while it waits for a reviewer.
pub const ESCALATION_PENDING: &str = "pending";

fn storage(e: impl std::fmt::Display) -> BouncerError {
    BouncerError::Storage(e.to_string())
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// One row of the inbound event table.
#[derive(Debug, Clone)]
pub struct StoredHostEvent {
    pub id: u64,
    pub payload: String,
}

/// A stored escalation as the review queue sees it.
#[derive(Debug, Clone)]
pub struct StoredEscalation {
    pub id: u64,
    pub target: TargetRef,
    pub topic_id: Option<u64>,
    pub reason: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub struct SqliteHostStore {
    pool: Pool<Sqlite>,
    topic_events: broadcast::Sender<u64>,
}

impl SqliteHostStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;
        let (topic_events, _) = broadcast::channel(64);

        let store = Self { pool, topic_events };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                name TEXT,
                email TEXT,
                website TEXT,
                trust_level INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                post_count INTEGER NOT NULL DEFAULT 0,
                groups TEXT NOT NULL DEFAULT '[]',
                is_system BOOLEAN NOT NULL DEFAULT 0,
                is_staff BOOLEAN NOT NULL DEFAULT 0,
                bio_raw TEXT,
                last_ip TEXT,
                last_user_agent TEXT,
                deleted BOOLEAN NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                private_message BOOLEAN NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                topic_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                post_number INTEGER NOT NULL,
                raw TEXT NOT NULL,
                cooked TEXT NOT NULL,
                user_deleted BOOLEAN NOT NULL DEFAULT 0,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_user ON posts(user_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                raw TEXT NOT NULL,
                cooked TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_comments_user ON comments(user_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spam_fields (
                kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, target_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_spam_fields_state
                ON spam_fields(kind, name, value);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                topic_id INTEGER,
                reason TEXT NOT NULL,
                payload TEXT NOT NULL,
                actions TEXT NOT NULL,
                reviewable_by_moderator BOOLEAN NOT NULL DEFAULT 1,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_escalations_target
                ON escalations(kind, target_id, status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalation_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                escalation_id INTEGER NOT NULL,
                weight REAL NOT NULL,
                reason TEXT NOT NULL,
                force_review BOOLEAN NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS author_notices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                topic_title TEXT NOT NULL,
                link TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS host_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                processed_at TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_host_events_unprocessed
                ON host_events(processed_at, id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Topic ids whose first post was removed as spam.
    pub fn subscribe_topic_events(&self) -> broadcast::Receiver<u64> {
        self.topic_events.subscribe()
    }

    // ========================================================================
    // HOST WRITES
    // ========================================================================

    pub async fn save_user(&self, user: &UserTarget) -> Result<(), BouncerError> {
        let groups = serde_json::to_string(&user.user.groups).map_err(storage)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO users
                (id, username, name, email, website, trust_level, created_at, post_count,
                 groups, is_system, is_staff, bio_raw, last_ip, last_user_agent, deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.user.id as i64)
        .bind(&user.user.username)
        .bind(&user.user.name)
        .bind(&user.user.email)
        .bind(&user.user.website)
        .bind(user.user.trust_level.0 as i64)
        .bind(user.user.created_at.to_rfc3339())
        .bind(user.user.post_count as i64)
        .bind(groups)
        .bind(user.user.is_system)
        .bind(user.user.is_staff)
        .bind(&user.bio_raw)
        .bind(&user.last_ip)
        .bind(&user.last_user_agent)
        .bind(user.deleted)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    /// Upsert the account columns of an author, keeping the profile fields
    /// (bio, last IP, last user agent) already on file.
    pub async fn save_author(&self, author: &Author) -> Result<(), BouncerError> {
        let groups = serde_json::to_string(&author.groups).map_err(storage)?;
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, name, email, website, trust_level, created_at, post_count,
                 groups, is_system, is_staff)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                name = excluded.name,
                email = excluded.email,
                website = excluded.website,
                trust_level = excluded.trust_level,
                post_count = excluded.post_count,
                groups = excluded.groups,
                is_system = excluded.is_system,
                is_staff = excluded.is_staff
            "#,
        )
        .bind(author.id as i64)
        .bind(&author.username)
        .bind(&author.name)
        .bind(&author.email)
        .bind(&author.website)
        .bind(author.trust_level.0 as i64)
        .bind(author.created_at.to_rfc3339())
        .bind(author.post_count as i64)
        .bind(groups)
        .bind(author.is_system)
        .bind(author.is_staff)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    pub async fn save_topic(&self, topic: &TopicInfo) -> Result<(), BouncerError> {
        sqlx::query("INSERT OR REPLACE INTO topics (id, title, private_message) VALUES (?, ?, ?)")
            .bind(topic.id as i64)
            .bind(&topic.title)
            .bind(topic.private_message)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    /// Store a post. The topic and author must be saved separately.
    pub async fn save_post(&self, post: &PostTarget) -> Result<(), BouncerError> {
        let topic_id = post.topic.as_ref().map(|t| t.id as i64).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO posts
                (id, topic_id, user_id, post_number, raw, cooked, user_deleted, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.id as i64)
        .bind(topic_id)
        .bind(post.author.id as i64)
        .bind(post.post_number as i64)
        .bind(&post.raw)
        .bind(&post.cooked)
        .bind(post.user_deleted)
        .bind(post.deleted_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    pub async fn save_comment(&self, comment: &CommentTarget) -> Result<(), BouncerError> {
        let post_id = comment
            .parent
            .as_ref()
            .map(|p| p.post_id as i64)
            .unwrap_or_default();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO comments (id, post_id, user_id, raw, cooked, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(comment.id as i64)
        .bind(post_id)
        .bind(comment.author.id as i64)
        .bind(&comment.raw)
        .bind(&comment.cooked)
        .bind(comment.deleted_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    // ========================================================================
    // REVIEW QUEUE
    // ========================================================================

    pub async fn escalation(&self, id: u64) -> Result<Option<StoredEscalation>, BouncerError> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, target_id, topic_id, reason, payload, status, created_at
            FROM escalations WHERE id = ?
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| Self::map_escalation(&row)).transpose()
    }

    #[cfg(test)]
    pub async fn pending_escalations(&self) -> Result<Vec<StoredEscalation>, BouncerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, target_id, topic_id, reason, payload, status, created_at
            FROM escalations WHERE status = ? ORDER BY id
            "#,
        )
        .bind(ESCALATION_PENDING)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::map_escalation).collect()
    }

    /// Close a pending escalation with the reviewer's outcome.
    pub async fn close_escalation(&self, id: u64, status: &str) -> Result<(), BouncerError> {
        sqlx::query("UPDATE escalations SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn notices_for(&self, user_id: u64) -> Result<Vec<AuthorNotice>, BouncerError> {
        let rows = sqlx::query(
            "SELECT kind, topic_title, link FROM author_notices WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Ok(AuthorNotice {
                    user_id,
                    kind: serde_json::from_value(serde_json::Value::String(kind))
                        .map_err(storage)?,
                    topic_title: row.get("topic_title"),
                    link: row.get("link"),
                })
            })
            .collect()
    }

    // ========================================================================
    // HOST EVENTS
    // ========================================================================

    /// Oldest events not yet handled, at most `limit` of them.
    pub async fn unprocessed_host_events(
        &self,
        limit: u32,
    ) -> Result<Vec<StoredHostEvent>, BouncerError> {
        let rows = sqlx::query(
            "SELECT id, payload FROM host_events WHERE processed_at IS NULL ORDER BY id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| StoredHostEvent {
                id: row.get::<i64, _>("id") as u64,
                payload: row.get("payload"),
            })
            .collect())
    }

    /// Mark an event handled. `error` is kept for events that failed.
    pub async fn finish_host_event(&self, id: u64, error: Option<&str>) -> Result<(), BouncerError> {
        sqlx::query("UPDATE host_events SET processed_at = ?, error = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(error)
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    /// Drop handled events older than `cutoff`. Failed ones go too.
    pub async fn delete_processed_host_events(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, BouncerError> {
        let result =
            sqlx::query("DELETE FROM host_events WHERE processed_at IS NOT NULL AND processed_at < ?")
                .bind(cutoff.to_rfc3339())
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub async fn push_host_event(&self, payload: &str) -> Result<u64, BouncerError> {
        let result = sqlx::query("INSERT INTO host_events (payload, created_at) VALUES (?, ?)")
            .bind(payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.last_insert_rowid() as u64)
    }

    /// `None` while unprocessed, `Some(error)` once handled.
    #[cfg(test)]
    pub async fn host_event_outcome(
        &self,
        id: u64,
    ) -> Result<Option<Option<String>>, BouncerError> {
        let row = sqlx::query("SELECT processed_at, error FROM host_events WHERE id = ?")
            .bind(id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let processed_at: Option<String> = row.get("processed_at");
        Ok(processed_at.map(|_| row.get("error")))
    }

    fn map_escalation(row: &SqliteRow) -> Result<StoredEscalation, BouncerError> {
        let kind: String = row.get("kind");
        let payload: String = row.get("payload");
        let topic_id: Option<i64> = row.get("topic_id");

        Ok(StoredEscalation {
            id: row.get::<i64, _>("id") as u64,
            target: TargetRef::new(
                kind.parse().map_err(BouncerError::Storage)?,
                row.get::<i64, _>("target_id") as u64,
            ),
            topic_id: topic_id.map(|t| t as u64),
            reason: row.get("reason"),
            payload: serde_json::from_str(&payload).map_err(storage)?,
            status: row.get("status"),
            created_at: parse_timestamp(row.get("created_at")).unwrap_or_else(Utc::now),
        })
    }

    // ========================================================================
    // LOADERS
    // ========================================================================

    async fn author(&self, user_id: u64) -> Result<Option<Author>, BouncerError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, name, email, website, trust_level, created_at, post_count,
                   groups, is_system, is_staff
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| Self::map_author(&row)).transpose()
    }

    fn map_author(row: &SqliteRow) -> Result<Author, BouncerError> {
        let groups: String = row.get("groups");
        Ok(Author {
            id: row.get::<i64, _>("id") as u64,
            username: row.get("username"),
            name: row.get("name"),
            email: row.get("email"),
            website: row.get("website"),
            trust_level: TrustLevel(row.get::<i64, _>("trust_level") as u8),
            created_at: parse_timestamp(row.get("created_at")).unwrap_or_else(Utc::now),
            post_count: row.get::<i64, _>("post_count") as u32,
            groups: serde_json::from_str(&groups).map_err(storage)?,
            is_system: row.get("is_system"),
            is_staff: row.get("is_staff"),
        })
    }

    async fn topic(&self, topic_id: u64) -> Result<Option<TopicInfo>, BouncerError> {
        let row = sqlx::query("SELECT id, title, private_message FROM topics WHERE id = ?")
            .bind(topic_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row.map(|row| TopicInfo {
            id: row.get::<i64, _>("id") as u64,
            title: row.get("title"),
            private_message: row.get("private_message"),
        }))
    }

    async fn field(&self, target: TargetRef, name: &str) -> Result<Option<String>, BouncerError> {
        let row = sqlx::query(
            "SELECT value FROM spam_fields WHERE kind = ? AND target_id = ? AND name = ?",
        )
        .bind(target.kind.as_str())
        .bind(target.id as i64)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn set_field(
        &self,
        target: TargetRef,
        name: &str,
        value: &str,
    ) -> Result<(), BouncerError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO spam_fields (kind, target_id, name, value, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(kind, target_id, name)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(target.kind.as_str())
        .bind(target.id as i64)
        .bind(name)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn set_deleted_at(
        &self,
        target: TargetRef,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<(), BouncerError> {
        let table = match target.kind {
            TargetKind::Post => "posts",
            TargetKind::Comment => "comments",
            // Accounts are removed by the host's own user tooling
            TargetKind::User => return Ok(()),
        };

        sqlx::query(&format!("UPDATE {} SET deleted_at = ? WHERE id = ?", table))
            .bind(deleted_at.map(|d| d.to_rfc3339()))
            .bind(target.id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

// ============================================================================
// FIELD STORE
// ============================================================================

#[async_trait]
impl TargetFieldStore for SqliteHostStore {
    async fn spam_state(&self, target: TargetRef) -> Result<Option<SpamState>, BouncerError> {
        match self.field(target, SPAM_STATE_FIELD).await? {
            Some(value) => Ok(Some(value.parse().map_err(BouncerError::Storage)?)),
            None => Ok(None),
        }
    }

    async fn set_spam_state(
        &self,
        target: TargetRef,
        state: SpamState,
    ) -> Result<(), BouncerError> {
        self.set_field(target, SPAM_STATE_FIELD, state.as_str()).await
    }

    async fn origin(&self, target: TargetRef) -> Result<OriginMetadata, BouncerError> {
        Ok(OriginMetadata {
            ip_address: self.field(target, IP_ADDRESS_FIELD).await?,
            user_agent: self.field(target, USER_AGENT_FIELD).await?,
            referrer: self.field(target, REFERRER_FIELD).await?,
        })
    }

    async fn store_origin(
        &self,
        target: TargetRef,
        origin: &OriginMetadata,
    ) -> Result<(), BouncerError> {
        let values = [
            (IP_ADDRESS_FIELD, &origin.ip_address),
            (USER_AGENT_FIELD, &origin.user_agent),
            (REFERRER_FIELD, &origin.referrer),
        ];
        for (name, value) in values {
            if let Some(value) = value {
                self.set_field(target, name, value).await?;
            }
        }
        Ok(())
    }

    async fn task_id(&self, target: TargetRef) -> Result<Option<String>, BouncerError> {
        self.field(target, TASK_ID_FIELD).await
    }

    async fn set_task_id(&self, target: TargetRef, task_id: &str) -> Result<(), BouncerError> {
        self.set_field(target, TASK_ID_FIELD, task_id).await
    }

    async fn targets_in_state(
        &self,
        kind: TargetKind,
        state: SpamState,
    ) -> Result<Vec<u64>, BouncerError> {
        let rows = sqlx::query(
            r#"
            SELECT target_id FROM spam_fields
            WHERE kind = ? AND name = ? AND value = ?
            ORDER BY target_id
            "#,
        )
        .bind(kind.as_str())
        .bind(SPAM_STATE_FIELD)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("target_id") as u64)
            .collect())
    }

    async fn state_counts(
        &self,
        kind: TargetKind,
    ) -> Result<HashMap<SpamState, u64>, BouncerError> {
        let rows = sqlx::query(
            r#"
            SELECT value, COUNT(*) AS count FROM spam_fields
            WHERE kind = ? AND name = ?
            GROUP BY value
            "#,
        )
        .bind(kind.as_str())
        .bind(SPAM_STATE_FIELD)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut counts = HashMap::new();
        for row in rows {
            let value: String = row.get("value");
            match value.parse::<SpamState>() {
                Ok(state) => {
                    counts.insert(state, row.get::<i64, _>("count") as u64);
                }
                Err(e) => tracing::warn!(kind = %kind, "Ignoring stored state: {}", e),
            }
        }
        Ok(counts)
    }

    async fn delete_side_channel_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, BouncerError> {
        let result = sqlx::query("DELETE FROM spam_fields WHERE name != ? AND updated_at < ?")
            .bind(SPAM_STATE_FIELD)
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn anonymize_ip(&self, author_id: u64, new_ip: &str) -> Result<u64, BouncerError> {
        let result = sqlx::query(
            r#"
            UPDATE spam_fields SET value = ?, updated_at = ?
            WHERE name = ? AND (
                (kind = 'post' AND target_id IN (SELECT id FROM posts WHERE user_id = ?))
                OR (kind = 'comment' AND target_id IN (SELECT id FROM comments WHERE user_id = ?))
            )
            "#,
        )
        .bind(new_ip)
        .bind(Utc::now().to_rfc3339())
        .bind(IP_ADDRESS_FIELD)
        .bind(author_id as i64)
        .bind(author_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// REVIEW QUEUE
// ============================================================================

#[async_trait]
impl EscalationSink for SqliteHostStore {
    async fn has_open_escalation(&self, target: TargetRef) -> Result<bool, BouncerError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM escalations
            WHERE kind = ? AND target_id = ? AND status = ?
            "#,
        )
        .bind(target.kind.as_str())
        .bind(target.id as i64)
        .bind(ESCALATION_PENDING)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn create_escalation(
        &self,
        escalation: NewEscalation,
    ) -> Result<EscalationHandle, BouncerError> {
        let payload = serde_json::to_string(&escalation.payload).map_err(storage)?;
        let actions = serde_json::to_string(&escalation.actions).map_err(storage)?;

        let result = sqlx::query(
            r#"
            INSERT INTO escalations
                (kind, target_id, topic_id, reason, payload, actions,
                 reviewable_by_moderator, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(escalation.target.kind.as_str())
        .bind(escalation.target.id as i64)
        .bind(escalation.topic_id.map(|t| t as i64))
        .bind(escalation.reason.as_str())
        .bind(payload)
        .bind(actions)
        .bind(escalation.reviewable_by_moderator)
        .bind(ESCALATION_PENDING)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let id = result.last_insert_rowid() as u64;
        tracing::info!(
            escalation_id = id,
            kind = %escalation.target.kind,
            target_id = escalation.target.id,
            reason = escalation.reason.as_str(),
            "Escalation created"
        );
        Ok(EscalationHandle {
            id,
            target: escalation.target,
        })
    }

    async fn attach_score(
        &self,
        handle: &EscalationHandle,
        score: EscalationScore,
    ) -> Result<(), BouncerError> {
        sqlx::query(
            r#"
            INSERT INTO escalation_scores (escalation_id, weight, reason, force_review, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(handle.id as i64)
        .bind(score.weight as f64)
        .bind(score.reason.as_str())
        .bind(score.force_review)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

// ============================================================================
// CONTENT ACTIONS
// ============================================================================

#[async_trait]
impl ContentModerator for SqliteHostStore {
    async fn remove(&self, target: TargetRef) -> Result<(), BouncerError> {
        self.set_deleted_at(target, Some(Utc::now())).await
    }

    async fn restore(&self, target: TargetRef) -> Result<(), BouncerError> {
        self.set_deleted_at(target, None).await
    }

    async fn notify_author(&self, notice: AuthorNotice) -> Result<(), BouncerError> {
        let kind = serde_json::to_value(notice.kind).map_err(storage)?;
        sqlx::query(
            r#"
            INSERT INTO author_notices (user_id, kind, topic_title, link, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(notice.user_id as i64)
        .bind(kind.as_str().unwrap_or_default())
        .bind(&notice.topic_title)
        .bind(&notice.link)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn publish_topic_removed(&self, topic_id: u64) -> Result<(), BouncerError> {
        // No subscribers is fine
        let _ = self.topic_events.send(topic_id);
        tracing::debug!(topic_id, "Published topic removal");
        Ok(())
    }
}

// ============================================================================
// TARGET LOADERS
// ============================================================================

#[async_trait]
impl TargetSource<PostTarget> for SqliteHostStore {
    async fn find(&self, id: u64) -> Result<Option<PostTarget>, BouncerError> {
        let row = sqlx::query(
            r#"
            SELECT id, topic_id, user_id, post_number, raw, cooked, user_deleted, deleted_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(author) = self.author(row.get::<i64, _>("user_id") as u64).await? else {
            return Ok(None);
        };

        Ok(Some(PostTarget {
            id,
            topic: self.topic(row.get::<i64, _>("topic_id") as u64).await?,
            author,
            post_number: row.get::<i64, _>("post_number") as u32,
            raw: row.get("raw"),
            cooked: row.get("cooked"),
            user_deleted: row.get("user_deleted"),
            deleted_at: parse_timestamp(row.get("deleted_at")),
        }))
    }
}

#[async_trait]
impl TargetSource<CommentTarget> for SqliteHostStore {
    async fn find(&self, id: u64) -> Result<Option<CommentTarget>, BouncerError> {
        let row = sqlx::query(
            "SELECT id, post_id, user_id, raw, cooked, deleted_at FROM comments WHERE id = ?",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(author) = self.author(row.get::<i64, _>("user_id") as u64).await? else {
            return Ok(None);
        };

        let parent_row = sqlx::query("SELECT id, topic_id, post_number FROM posts WHERE id = ?")
            .bind(row.get::<i64, _>("post_id"))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        let parent = match parent_row {
            Some(p) => Some(CommentParent {
                post_id: p.get::<i64, _>("id") as u64,
                post_number: p.get::<i64, _>("post_number") as u32,
                topic: self.topic(p.get::<i64, _>("topic_id") as u64).await?,
            }),
            None => None,
        };

        Ok(Some(CommentTarget {
            id,
            parent,
            author,
            raw: row.get("raw"),
            cooked: row.get("cooked"),
            deleted_at: parse_timestamp(row.get("deleted_at")),
        }))
    }
}

#[async_trait]
impl TargetSource<UserTarget> for SqliteHostStore {
    async fn find(&self, id: u64) -> Result<Option<UserTarget>, BouncerError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, name, email, website, trust_level, created_at, post_count,
                   groups, is_system, is_staff, bio_raw, last_ip, last_user_agent, deleted
            FROM users WHERE id = ?
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(UserTarget {
            user: Self::map_author(&row)?,
            bio_raw: row.get("bio_raw"),
            last_ip: row.get("last_ip"),
            last_user_agent: row.get("last_user_agent"),
            deleted: row.get("deleted"),
        }))
    }
}
