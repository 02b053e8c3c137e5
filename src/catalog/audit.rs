//! Encrypted audit-log store.
//!
//! A second single-file store receiving one structured record per
//! verification run (and one per aborted run). Record payloads are sealed
//! before hitting disk; the log is append-only and supports bounded
//! time-ordered reads for audit queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

use super::crypto::{generate_salt, Crypto};
use super::schema::{get_meta, set_meta};

/// One structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: String,
    pub model_id: String,
    /// Outcome summary, e.g. `completed overall=72` or `aborted existence`.
    pub summary: String,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
    crypto: Crypto,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>, secret: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::store(e.to_string()))?;
        Self::from_connection(conn, secret)
    }

    pub fn in_memory(secret: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::store(e.to_string()))?;
        Self::from_connection(conn, secret)
    }

    fn from_connection(conn: Connection, secret: &str) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::store(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                payload_cipher BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log(recorded_at);",
        )
        .map_err(|e| Error::store(e.to_string()))?;

        let salt = match get_meta(&conn, "store_salt").map_err(|e| Error::store(e.to_string()))? {
            Some(hex_salt) => {
                hex::decode(&hex_salt).map_err(|_| Error::Crypto("corrupt store salt".into()))?
            }
            None => {
                let salt = generate_salt();
                set_meta(&conn, "store_salt", &hex::encode(salt))
                    .map_err(|e| Error::store(e.to_string()))?;
                salt.to_vec()
            }
        };
        let crypto = Crypto::derive(secret.as_bytes(), &salt)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            crypto,
        })
    }

    /// Append one record.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let cipher = self.crypto.seal_str(&payload)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO audit_log (recorded_at, payload_cipher) VALUES (?1, ?2)",
            params![record.recorded_at.to_rfc3339(), cipher],
        )?;
        Ok(())
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT payload_cipher FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let ciphers = stmt
            .query_map(params![limit as i64], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut records = Vec::with_capacity(ciphers.len());
        for cipher in ciphers {
            let payload = self.crypto.open_str(&cipher)?;
            records.push(serde_json::from_str(&payload)?);
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let log = AuditLog::in_memory("secret").unwrap();
        assert!(log.is_empty().unwrap());

        log.append(&AuditRecord {
            run_id: "r1".into(),
            model_id: "m1".into(),
            summary: "completed overall=72".into(),
            duration_ms: 1234,
            recorded_at: Utc::now(),
        })
        .unwrap();
        log.append(&AuditRecord {
            run_id: "r2".into(),
            model_id: "m1".into(),
            summary: "aborted existence".into(),
            duration_ms: 90,
            recorded_at: Utc::now(),
        })
        .unwrap();

        let records = log.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, "r2");
        assert_eq!(records[1].summary, "completed overall=72");
    }

    #[test]
    fn test_payload_is_sealed_on_disk() {
        let log = AuditLog::in_memory("secret").unwrap();
        log.append(&AuditRecord {
            run_id: "r1".into(),
            model_id: "m-sensitive".into(),
            summary: "completed".into(),
            duration_ms: 1,
            recorded_at: Utc::now(),
        })
        .unwrap();

        let conn = log.conn.lock().unwrap();
        let cipher: Vec<u8> = conn
            .query_row("SELECT payload_cipher FROM audit_log", [], |row| row.get(0))
            .unwrap();
        drop(conn);
        assert!(!cipher.windows(11).any(|w| w == b"m-sensitive"));
    }
}
