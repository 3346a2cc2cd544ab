//! `SQLite` document store adapter.
//!
//! Conversations are stored as single rows with the message sequence and
//! `last_message` as JSON columns, so an append updates both in one SQL
//! statement and the pair can never diverge. The canonical participant
//! pair is split into `(participant_lo, participant_hi)` columns backed by
//! an index, making pair equality an exact two-column match.
//!
//! Timestamps live as i64 millis in rows and are converted to
//! `chrono::DateTime<Utc>` here; store-native representations never leak
//! into the core.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio::sync::broadcast;
use tokio_rusqlite::Connection;

use crate::sync::core::config::StorageConfig;
use crate::sync::core::conversation::{Conversation, ParticipantPair};
use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::{ConversationId, MessageId, UserId};
use crate::sync::core::message::{Message, MessageDraft};
use crate::sync::core::user::User;
use crate::sync::store::{DocumentStore, StoreChange, StoreChangeKind, StoreFuture};

/// Raw conversation row before boundary conversion.
type ConversationRow = (ConversationId, UserId, UserId, String, Option<String>, i64);

/// Outcome of the append closure, mapped to domain errors outside.
enum AppendOutcome {
    Appended(UserId, UserId),
    Missing,
    NotParticipant,
}

/// `SQLite` implementation of the document store.
pub struct SqliteDocumentStore {
    conn: Connection,
    users_table: String,
    conversations_table: String,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteDocumentStore {
    /// Open the database and create tables if they do not exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn new(config: &StorageConfig) -> SyncResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::init(conn, config).await
    }

    /// Open an in-memory database, used by tests and local tooling.
    ///
    /// # Errors
    /// Returns an error if initialization fails.
    pub async fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, &StorageConfig::default()).await
    }

    async fn init(conn: Connection, config: &StorageConfig) -> SyncResult<Self> {
        let users_table = config.users_table.clone();
        let conversations_table = config.conversations_table.clone();
        let users = users_table.clone();
        let conversations = conversations_table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {users} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    avatar_url TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS {conversations} (
                    id TEXT PRIMARY KEY,
                    participant_lo TEXT NOT NULL,
                    participant_hi TEXT NOT NULL,
                    messages TEXT NOT NULL,
                    last_message TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{conversations}_pair
                    ON {conversations} (participant_lo, participant_hi);
                CREATE INDEX IF NOT EXISTS idx_{conversations}_hi
                    ON {conversations} (participant_hi);"
            ))?;
            Ok(())
        })
        .await?;

        let (changes, _) = broadcast::channel(config.change_buffer.max(1));

        Ok(Self {
            conn,
            users_table,
            conversations_table,
            changes,
        })
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is fine; the feed is best-effort until someone
        // subscribes.
        let _ = self.changes.send(change);
    }

    fn row_to_conversation(row: ConversationRow) -> SyncResult<Conversation> {
        let (id, lo, hi, messages_json, last_json, created_ms) = row;
        let participants = ParticipantPair::new(lo, hi)
            .map_err(|err| SyncError::Transport(format!("corrupt conversation row: {err}")))?;
        let messages: Vec<Message> = serde_json::from_str(&messages_json)?;
        let last_message: Option<Message> = match last_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let created_at = millis_to_datetime(created_ms)?;

        Ok(Conversation {
            id,
            participants,
            messages,
            last_message,
            created_at,
        })
    }

    async fn fetch_conversations(
        &self,
        sql: String,
        params: Vec<Box<dyn rusqlite::ToSql + Send>>,
    ) -> SyncResult<Vec<Conversation>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params.iter().map(|p| p.as_ref() as _).collect();
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(param_refs), |row| {
                        Ok((
                            row.get::<_, ConversationId>(0)?,
                            row.get::<_, UserId>(1)?,
                            row.get::<_, UserId>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<ConversationRow>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(Self::row_to_conversation).collect()
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get_user(&self, id: UserId) -> StoreFuture<'_, SyncResult<Option<User>>> {
        Box::pin(async move {
            let table = self.users_table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT name, email, avatar_url FROM {table} WHERE id = ?1"
                    ))?;
                    let row = stmt
                        .query_row(rusqlite::params![id], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        })
                        .optional()?;
                    Ok(row)
                })
                .await?;

            Ok(row.map(|(name, email, avatar_url)| User {
                id,
                name,
                email,
                avatar_url,
            }))
        })
    }

    fn put_user(&self, user: &User) -> StoreFuture<'_, SyncResult<()>> {
        let user = user.clone();
        Box::pin(async move {
            let table = self.users_table.clone();
            let now_ms = Utc::now().timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, name, email, avatar_url, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                             ON CONFLICT(id) DO UPDATE SET
                                 name = excluded.name,
                                 email = excluded.email,
                                 avatar_url = excluded.avatar_url,
                                 updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![user.id, user.name, user.email, user.avatar_url, now_ms],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }

    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, SyncResult<Option<Conversation>>> {
        Box::pin(async move {
            let table = self.conversations_table.clone();
            let sql = format!(
                "SELECT id, participant_lo, participant_hi, messages, last_message, created_at
                 FROM {table} WHERE id = ?1"
            );
            let mut rows = self
                .fetch_conversations(sql, vec![Box::new(id)])
                .await?;
            Ok(rows.pop())
        })
    }

    fn find_by_pair(
        &self,
        pair: ParticipantPair,
        limit: usize,
    ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
        Box::pin(async move {
            let table = self.conversations_table.clone();
            let sql = format!(
                "SELECT id, participant_lo, participant_hi, messages, last_message, created_at
                 FROM {table}
                 WHERE participant_lo = ?1 AND participant_hi = ?2
                 ORDER BY id ASC
                 LIMIT ?3"
            );
            self.fetch_conversations(
                sql,
                vec![
                    Box::new(pair.lo()),
                    Box::new(pair.hi()),
                    Box::new(i64::try_from(limit).unwrap_or(i64::MAX)),
                ],
            )
            .await
        })
    }

    fn create_conversation(
        &self,
        pair: ParticipantPair,
    ) -> StoreFuture<'_, SyncResult<Conversation>> {
        Box::pin(async move {
            let table = self.conversations_table.clone();
            let id = ConversationId::new();
            let created_at = Utc::now();
            let created_ms = created_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table}
                                 (id, participant_lo, participant_hi, messages, last_message, created_at)
                             VALUES (?1, ?2, ?3, '[]', NULL, ?4)"
                        ),
                        rusqlite::params![id, pair.lo(), pair.hi(), created_ms],
                    )?;
                    Ok(())
                })
                .await?;

            self.notify(StoreChange {
                conversation_id: id,
                participants: pair,
                kind: StoreChangeKind::ConversationCreated,
            });

            Ok(Conversation {
                id,
                participants: pair,
                messages: Vec::new(),
                last_message: None,
                created_at: millis_to_datetime(created_ms)?,
            })
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreFuture<'_, SyncResult<Vec<Conversation>>> {
        Box::pin(async move {
            let table = self.conversations_table.clone();
            let sql = format!(
                "SELECT id, participant_lo, participant_hi, messages, last_message, created_at
                 FROM {table}
                 WHERE participant_lo = ?1 OR participant_hi = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2"
            );
            self.fetch_conversations(
                sql,
                vec![
                    Box::new(user_id),
                    Box::new(i64::try_from(limit).unwrap_or(i64::MAX)),
                ],
            )
            .await
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        draft: MessageDraft,
    ) -> StoreFuture<'_, SyncResult<Message>> {
        Box::pin(async move {
            let table = self.conversations_table.clone();
            let message = Message {
                id: MessageId::new(),
                sender_id: draft.sender_id,
                content: draft.content,
                timestamp: Utc::now(),
            };
            let stored = message.clone();

            let outcome = self
                .conn
                .call(move |conn| {
                    // Immediate transaction: the read and the rewrite hold
                    // the write lock together, so a concurrent connection
                    // on the same file cannot interleave and lose a
                    // message.
                    let tx = conn
                        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                    let row = tx
                        .query_row(
                            &format!(
                                "SELECT participant_lo, participant_hi, messages
                                 FROM {table} WHERE id = ?1"
                            ),
                            rusqlite::params![conversation_id],
                            |row| {
                                Ok((
                                    row.get::<_, UserId>(0)?,
                                    row.get::<_, UserId>(1)?,
                                    row.get::<_, String>(2)?,
                                ))
                            },
                        )
                        .optional()?;

                    let Some((lo, hi, messages_json)) = row else {
                        return Ok(AppendOutcome::Missing);
                    };
                    if stored.sender_id != lo && stored.sender_id != hi {
                        return Ok(AppendOutcome::NotParticipant);
                    }

                    let mut messages: Vec<Message> =
                        serde_json::from_str(&messages_json).map_err(boxed_err)?;
                    messages.push(stored.clone());
                    let messages_json = serde_json::to_string(&messages).map_err(boxed_err)?;
                    let last_json = serde_json::to_string(&stored).map_err(boxed_err)?;

                    // Single statement: the message sequence and lastMessage
                    // can never advance independently.
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET messages = ?1, last_message = ?2 WHERE id = ?3"
                        ),
                        rusqlite::params![messages_json, last_json, conversation_id],
                    )?;
                    tx.commit()?;

                    Ok(AppendOutcome::Appended(lo, hi))
                })
                .await?;

            let participants = match outcome {
                AppendOutcome::Appended(lo, hi) => ParticipantPair::new(lo, hi).map_err(|err| {
                    SyncError::Transport(format!("corrupt conversation row: {err}"))
                })?,
                AppendOutcome::Missing => {
                    return Err(SyncError::NotFound(format!(
                        "conversation {conversation_id}"
                    )));
                }
                AppendOutcome::NotParticipant => {
                    return Err(SyncError::Validation(
                        "sender is not a participant of this conversation".to_string(),
                    ));
                }
            };

            self.notify(StoreChange {
                conversation_id,
                participants,
                kind: StoreChangeKind::MessageAppended(message.id),
            });

            Ok(message)
        })
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn boxed_err(err: serde_json::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}

fn millis_to_datetime(ms: i64) -> SyncResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| SyncError::Transport("invalid timestamp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_pair() -> (SqliteDocumentStore, ParticipantPair) {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        let pair = ParticipantPair::new(UserId::new(), UserId::new()).unwrap();
        (store, pair)
    }

    #[tokio::test]
    async fn test_create_starts_empty() {
        let (store, pair) = store_with_pair().await;
        let conversation = store.create_conversation(pair).await.unwrap();
        assert!(conversation.messages.is_empty());
        assert!(conversation.last_message.is_none());

        let fetched = store.get_conversation(conversation.id).await.unwrap();
        assert_eq!(fetched, Some(conversation));
    }

    #[tokio::test]
    async fn test_append_updates_both_fields_atomically() {
        let (store, pair) = store_with_pair().await;
        let conversation = store.create_conversation(pair).await.unwrap();

        let draft = MessageDraft::new(pair.lo(), "hello").unwrap();
        let message = store.append_message(conversation.id, draft).await.unwrap();

        let fetched = store
            .get_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(fetched.messages[0], message);
        assert_eq!(fetched.last_message, Some(message));
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let (store, pair) = store_with_pair().await;
        let store = std::sync::Arc::new(store);
        let conversation = store.create_conversation(pair).await.unwrap();

        let mut tasks = Vec::new();
        for sender in pair.ids() {
            let store = store.clone();
            let conversation_id = conversation.id;
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let draft = MessageDraft::new(sender, format!("{sender} {i}")).unwrap();
                    store.append_message(conversation_id, draft).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let fetched = store
            .get_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.messages.len(), 20);
        assert_eq!(fetched.last_message, fetched.messages.last().cloned());
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_is_not_found() {
        let (store, pair) = store_with_pair().await;
        let draft = MessageDraft::new(pair.lo(), "hello").unwrap();
        let err = store
            .append_message(ConversationId::new(), draft)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_from_outsider_is_rejected() {
        let (store, pair) = store_with_pair().await;
        let conversation = store.create_conversation(pair).await.unwrap();
        let draft = MessageDraft::new(UserId::new(), "hello").unwrap();
        let err = store
            .append_message(conversation.id, draft)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_change_feed_observes_writes() {
        let (store, pair) = store_with_pair().await;
        let mut changes = store.changes();

        let conversation = store.create_conversation(pair).await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.conversation_id, conversation.id);
        assert_eq!(change.kind, StoreChangeKind::ConversationCreated);

        let draft = MessageDraft::new(pair.hi(), "hi").unwrap();
        let message = store.append_message(conversation.id, draft).await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.kind, StoreChangeKind::MessageAppended(message.id));
        assert!(change.involves(pair.lo()));
        assert!(change.involves(pair.hi()));
    }

    #[tokio::test]
    async fn test_user_roundtrip_and_upsert() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        let mut user = User::new(UserId::new(), "Alice", "alice@example.com", "").unwrap();
        store.put_user(&user).await.unwrap();
        assert_eq!(store.get_user(user.id).await.unwrap(), Some(user.clone()));

        user.name = "Alice B".to_string();
        store.put_user(&user).await.unwrap();
        assert_eq!(store.get_user(user.id).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        assert_eq!(store.get_user(UserId::new()).await.unwrap(), None);
    }
}
