/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! SQLite message store.
//!
//! Production backend. Three tables: `messages` holds the live record per
//! `(session, direction, seq)`, `messages_archive` accumulates displaced
//! records with their `archived_at` stamp, and `sessions` holds the durable
//! sequence counters. Archive-then-replace runs inside one transaction, so
//! a crash leaves either both applied or neither.
//!
//! `rusqlite` is synchronous; every operation is a single-row statement on
//! a local database, executed under the connection mutex. That mutex also
//! provides the per-session write serialization the engine relies on.

use crate::traits::{raw_has_field, ArchivedRecord, MessageStore, StoredRecord};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use fixline_core::error::StoreError;
use fixline_core::{Direction, SessionId, Timestamp};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::warn;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    beginstring   TEXT    NOT NULL,
    sendercompid  TEXT    NOT NULL,
    targetcompid  TEXT    NOT NULL,
    direction     TEXT    NOT NULL,
    msgseqnum     INTEGER NOT NULL,
    message       BLOB    NOT NULL,
    created_at    INTEGER NOT NULL,
    PRIMARY KEY (beginstring, sendercompid, targetcompid, direction, msgseqnum)
);
CREATE TABLE IF NOT EXISTS messages_archive (
    beginstring   TEXT    NOT NULL,
    sendercompid  TEXT    NOT NULL,
    targetcompid  TEXT    NOT NULL,
    direction     TEXT    NOT NULL,
    msgseqnum     INTEGER NOT NULL,
    message       BLOB    NOT NULL,
    created_at    INTEGER NOT NULL,
    archived_at   INTEGER NOT NULL,
    PRIMARY KEY (beginstring, sendercompid, targetcompid, direction, msgseqnum, archived_at)
);
CREATE TABLE IF NOT EXISTS sessions (
    beginstring          TEXT    NOT NULL,
    sendercompid         TEXT    NOT NULL,
    targetcompid         TEXT    NOT NULL,
    creation_time        INTEGER NOT NULL,
    next_incoming_seqnum INTEGER NOT NULL,
    next_outgoing_seqnum INTEGER NOT NULL,
    PRIMARY KEY (beginstring, sendercompid, targetcompid)
);
";

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Io(err.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// SQLite-backed message store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and if necessary creates) the database at `path`.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory database. Intended for tests.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the database cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn ensure_session(conn: &Connection, session: &SessionId) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR IGNORE INTO sessions
             (beginstring, sendercompid, targetcompid, creation_time,
              next_incoming_seqnum, next_outgoing_seqnum)
             VALUES (?1, ?2, ?3, ?4, 1, 1)",
            params![
                session.begin_string,
                session.sender_comp_id.as_str(),
                session.target_comp_id.as_str(),
                now_ms(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn read_counters(conn: &Connection, session: &SessionId) -> Result<(u64, u64), StoreError> {
        let row: Option<(u64, u64)> = conn
            .query_row(
                "SELECT next_incoming_seqnum, next_outgoing_seqnum FROM sessions
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3",
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.unwrap_or((1, 1)))
    }

    fn write_counter(
        conn: &Connection,
        session: &SessionId,
        direction: Direction,
        value: u64,
    ) -> Result<(), StoreError> {
        Self::ensure_session(conn, session)?;
        let sql = match direction {
            Direction::Inbound => {
                "UPDATE sessions SET next_incoming_seqnum = ?4
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3"
            }
            Direction::Outbound => {
                "UPDATE sessions SET next_outgoing_seqnum = ?4
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3"
            }
        };
        conn.execute(
            sql,
            params![
                session.begin_string,
                session.sender_comp_id.as_str(),
                session.target_comp_id.as_str(),
                value,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn row_to_record(
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
        message: Vec<u8>,
        created_at: i64,
    ) -> StoredRecord {
        StoredRecord {
            session_id: session.clone(),
            seq_num,
            direction,
            raw: Bytes::from(message),
            timestamp: Timestamp::from_millis(created_at),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn store(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
        raw: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<(Vec<u8>, i64)> = tx
            .query_row(
                "SELECT message, created_at FROM messages
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                   AND direction = ?4 AND msgseqnum = ?5",
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    direction.as_char().to_string(),
                    seq_num,
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        if let Some((old_message, old_created_at)) = existing {
            warn!(
                session = %session, seq = seq_num, %direction,
                "archiving displaced record before overwrite"
            );
            tx.execute(
                "INSERT INTO messages_archive
                 (beginstring, sendercompid, targetcompid, direction, msgseqnum,
                  message, created_at, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    direction.as_char().to_string(),
                    seq_num,
                    old_message,
                    old_created_at,
                    now_ns(),
                ],
            )
            .map_err(db_err)?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO messages
             (beginstring, sendercompid, targetcompid, direction, msgseqnum, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.begin_string,
                session.sender_comp_id.as_str(),
                session.target_comp_id.as_str(),
                direction.as_char().to_string(),
                seq_num,
                raw,
                now_ms(),
            ],
        )
        .map_err(db_err)?;

        Self::ensure_session(&tx, session)?;
        if direction == Direction::Outbound {
            tx.execute(
                "UPDATE sessions SET next_outgoing_seqnum = ?4
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                   AND next_outgoing_seqnum <= ?5",
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    seq_num + 1,
                    seq_num,
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)
    }

    async fn get(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT message, created_at FROM messages
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                   AND direction = ?4 AND msgseqnum = ?5",
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    direction.as_char().to_string(),
                    seq_num,
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.map(|(message, created_at)| {
            Self::row_to_record(session, seq_num, direction, message, created_at)
        }))
    }

    async fn range(
        &self,
        session: &SessionId,
        begin: u64,
        end: u64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let end = if end == 0 {
            Self::read_counters(&conn, session)?.1.saturating_sub(1)
        } else {
            end
        };
        let mut stmt = conn
            .prepare(
                "SELECT msgseqnum, message, created_at FROM messages
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                   AND direction = 'O' AND msgseqnum BETWEEN ?4 AND ?5
                 ORDER BY msgseqnum",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    begin,
                    end,
                ],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (seq_num, message, created_at) = row.map_err(db_err)?;
            records.push(Self::row_to_record(
                session,
                seq_num,
                Direction::Outbound,
                message,
                created_at,
            ));
        }
        Ok(records)
    }

    async fn find_by_field(
        &self,
        session: &SessionId,
        tag: u32,
        value: &[u8],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT direction, msgseqnum, message, created_at FROM messages
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                 ORDER BY direction, msgseqnum",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (direction, seq_num, message, created_at) = row.map_err(db_err)?;
            if !raw_has_field(&message, tag, value) {
                continue;
            }
            let direction = direction
                .chars()
                .next()
                .and_then(Direction::from_char)
                .ok_or_else(|| StoreError::Corrupted {
                    reason: format!("bad direction column: {direction}"),
                })?;
            records.push(Self::row_to_record(
                session, seq_num, direction, message, created_at,
            ));
        }
        Ok(records)
    }

    async fn archived(
        &self,
        session: &SessionId,
        seq_num: u64,
        direction: Direction,
    ) -> Result<Vec<ArchivedRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT message, created_at, archived_at FROM messages_archive
                 WHERE beginstring = ?1 AND sendercompid = ?2 AND targetcompid = ?3
                   AND direction = ?4 AND msgseqnum = ?5
                 ORDER BY archived_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    session.begin_string,
                    session.sender_comp_id.as_str(),
                    session.target_comp_id.as_str(),
                    direction.as_char().to_string(),
                    seq_num,
                ],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (message, created_at, archived_at) = row.map_err(db_err)?;
            records.push(ArchivedRecord {
                record: Self::row_to_record(session, seq_num, direction, message, created_at),
                archived_at: Timestamp::from_millis(archived_at / 1_000_000),
            });
        }
        Ok(records)
    }

    async fn next_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        Ok(Self::read_counters(&conn, session)?.0)
    }

    async fn next_outgoing(&self, session: &SessionId) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        Ok(Self::read_counters(&conn, session)?.1)
    }

    async fn set_incoming(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        let conn = self.conn.lock();
        Self::write_counter(&conn, session, Direction::Inbound, seq)
    }

    async fn set_outgoing(&self, session: &SessionId, seq: u64) -> Result<(), StoreError> {
        if seq < 1 {
            return Err(StoreError::InvalidSequence { value: seq });
        }
        let conn = self.conn.lock();
        Self::write_counter(&conn, session, Direction::Outbound, seq)
    }

    async fn increment_incoming(&self, session: &SessionId) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let next = Self::read_counters(&conn, session)?.0 + 1;
        Self::write_counter(&conn, session, Direction::Inbound, next)?;
        Ok(next)
    }

    async fn reset(&self, session: &SessionId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::write_counter(&conn, session, Direction::Inbound, 1)?;
        Self::write_counter(&conn, session, Direction::Outbound, 1)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let _ = conn.pragma_update(None, "wal_checkpoint", "TRUNCATE");
        Ok(())
    }
}
