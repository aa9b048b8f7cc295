//! Acceptor Store
//!
//! Durable storage for acceptor state backed by SQLite. Promises and
//! Accepted votes are only released after `save` returns.

use std::path::Path;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::paxos::{AcceptorSnapshot, ProposalId, Value};

/// Persistent acceptor store backed by SQLite
pub struct AcceptorStore {
    /// Database connection
    conn: Mutex<Connection>,
}

impl AcceptorStore {
    /// Create or open the store in `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("acceptor.db");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS acceptor_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                promised_number INTEGER,
                promised_owner TEXT,
                accepted_number INTEGER,
                accepted_owner TEXT,
                accepted_value TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS resolution (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                proposal_number INTEGER NOT NULL,
                proposal_owner TEXT NOT NULL,
                value TEXT NOT NULL,
                resolved_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        tracing::debug!("Opened acceptor store at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write the acceptor's durable state
    pub async fn save(&self, snapshot: &AcceptorSnapshot) -> Result<()> {
        let (promised_number, promised_owner) = split_id(snapshot.promised_id.as_ref());
        let (accepted_number, accepted_owner) = split_id(snapshot.accepted_id.as_ref());

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO acceptor_state
                (id, promised_number, promised_owner, accepted_number, accepted_owner, accepted_value)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                promised_number = ?1,
                promised_owner = ?2,
                accepted_number = ?3,
                accepted_owner = ?4,
                accepted_value = ?5,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                promised_number,
                promised_owner,
                accepted_number,
                accepted_owner,
                snapshot.accepted_value,
            ],
        )?;
        Ok(())
    }

    /// Read back the acceptor's durable state, if any was ever saved
    pub async fn load(&self) -> Result<Option<AcceptorSnapshot>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"
                SELECT promised_number, promised_owner, accepted_number, accepted_owner, accepted_value
                FROM acceptor_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<Value>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(pn, po, an, ao, value)| AcceptorSnapshot {
            promised_id: join_id(pn, po),
            accepted_id: join_id(an, ao),
            accepted_value: value,
        }))
    }

    /// Remember the value this node learned
    pub async fn record_resolution(&self, proposal_id: &ProposalId, value: &Value) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO resolution (id, proposal_number, proposal_owner, value)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![proposal_id.number as i64, proposal_id.owner_id, value],
        )?;
        Ok(())
    }

    /// The value this node learned, if resolution happened
    pub async fn resolution(&self) -> Result<Option<(ProposalId, Value)>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT proposal_number, proposal_owner, value FROM resolution WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Value>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(number, owner, value)| (ProposalId::new(number as u64, owner), value)))
    }
}

fn split_id(id: Option<&ProposalId>) -> (Option<i64>, Option<&str>) {
    match id {
        Some(id) => (Some(id.number as i64), Some(id.owner_id.as_str())),
        None => (None, None),
    }
}

fn join_id(number: Option<i64>, owner: Option<String>) -> Option<ProposalId> {
    match (number, owner) {
        (Some(number), Some(owner)) => Some(ProposalId::new(number as u64, owner)),
        _ => None,
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = AcceptorStore::new(dir.path()).unwrap();

        assert!(store.load().await.unwrap().is_none());
        assert!(store.resolution().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = AcceptorStore::new(dir.path()).unwrap();

        let promised_only = AcceptorSnapshot {
            promised_id: Some(ProposalId::new(1, "node-2")),
            accepted_id: None,
            accepted_value: None,
        };
        store.save(&promised_only).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(promised_only));

        let accepted = AcceptorSnapshot {
            promised_id: Some(ProposalId::new(4, "node-3")),
            accepted_id: Some(ProposalId::new(4, "node-3")),
            accepted_value: Some("X".into()),
        };
        store.save(&accepted).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(accepted));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let snapshot = AcceptorSnapshot {
            promised_id: Some(ProposalId::new(7, "node-1")),
            accepted_id: Some(ProposalId::new(6, "node-1")),
            accepted_value: Some("config-v2".into()),
        };

        {
            let store = AcceptorStore::new(dir.path()).unwrap();
            store.save(&snapshot).await.unwrap();
        }

        let store = AcceptorStore::new(dir.path()).unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_resolution_recorded_once() {
        let dir = tempdir().unwrap();
        let store = AcceptorStore::new(dir.path()).unwrap();

        store.record_resolution(&ProposalId::new(2, "node-1"), &"X".to_string()).await.unwrap();
        store.record_resolution(&ProposalId::new(3, "node-2"), &"Y".to_string()).await.unwrap();

        let (id, value) = store.resolution().await.unwrap().unwrap();
        assert_eq!(id, ProposalId::new(2, "node-1"));
        assert_eq!(value, "X");
    }
}
