use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    DownloadEntry, DownloadHistory, EngineEvent, EventError, EventFilter, EventRecord,
    EventStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS engine_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    job_id TEXT,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_engine_events_timestamp ON engine_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_engine_events_job_id ON engine_events(job_id);
CREATE INDEX IF NOT EXISTS idx_engine_events_event_type ON engine_events(event_type);

CREATE TABLE IF NOT EXISTS downloads (
    source TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    path TEXT NOT NULL,
    bytes INTEGER NOT NULL,
    downloaded_at TEXT NOT NULL,
    PRIMARY KEY (source, remote_id)
);

CREATE INDEX IF NOT EXISTS idx_downloads_downloaded_at ON downloads(downloaded_at);
"#;

/// SQLite-backed event log and download history
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    /// Open (creating if needed) the event log at the given path.
    pub fn new(path: &Path) -> Result<Self, EventError> {
        let conn = Connection::open(path).map_err(|e| EventError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// In-memory event log for tests.
    pub fn in_memory() -> Result<Self, EventError> {
        let conn =
            Connection::open_in_memory().map_err(|e| EventError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, EventError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| EventError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl EventStore for SqliteEventLog {
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError> {
        let conn = self.conn.lock().unwrap();

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO engine_events (timestamp, event_type, job_id, data) VALUES (?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.job_id,
                data_json,
            ],
        )
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        let conn = self.conn.lock().unwrap();

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref job_id) = filter.job_id {
            conditions.push("job_id = ?");
            params.push(Box::new(job_id.clone()));
        }
        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT id, timestamp, event_type, job_id, data FROM engine_events {} ORDER BY id DESC LIMIT ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EventError::Database(e.to_string()))?;

        params.push(Box::new(filter.limit));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let id: i64 = row.get(0)?;
                let timestamp: String = row.get(1)?;
                let event_type: String = row.get(2)?;
                let job_id: Option<String> = row.get(3)?;
                let data: String = row.get(4)?;
                Ok((id, timestamp, event_type, job_id, data))
            })
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, job_id, data) =
                row.map_err(|e| EventError::Database(e.to_string()))?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| EventError::Database(format!("Invalid timestamp: {}", e)))?
                .into();
            let data: EngineEvent = serde_json::from_str(&data)
                .map_err(|e| EventError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                id,
                timestamp,
                event_type,
                job_id,
                data,
            });
        }

        Ok(records)
    }
}

impl DownloadHistory for SqliteEventLog {
    fn record(&self, entry: &DownloadEntry) -> Result<(), EventError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO downloads (source, remote_id, path, bytes, downloaded_at) VALUES (?, ?, ?, ?, ?)",
            params![
                entry.source,
                entry.remote_id,
                entry.path,
                entry.bytes as i64,
                entry.downloaded_at.to_rfc3339(),
            ],
        )
        .map_err(|e| EventError::Database(e.to_string()))?;
        Ok(())
    }

    fn was_downloaded(&self, source: &str, remote_id: &str) -> Result<bool, EventError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM downloads WHERE source = ? AND remote_id = ?",
                params![source, remote_id],
                |row| row.get(0),
            )
            .map_err(|e| EventError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn recent(&self, limit: i64) -> Result<Vec<DownloadEntry>, EventError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT source, remote_id, path, bytes, downloaded_at FROM downloads ORDER BY downloaded_at DESC LIMIT ?",
            )
            .map_err(|e| EventError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit], |row| {
                let source: String = row.get(0)?;
                let remote_id: String = row.get(1)?;
                let path: String = row.get(2)?;
                let bytes: i64 = row.get(3)?;
                let downloaded_at: String = row.get(4)?;
                Ok((source, remote_id, path, bytes, downloaded_at))
            })
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (source, remote_id, path, bytes, downloaded_at) =
                row.map_err(|e| EventError::Database(e.to_string()))?;
            let downloaded_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&downloaded_at)
                .map_err(|e| EventError::Database(format!("Invalid timestamp: {}", e)))?
                .into();
            entries.push(DownloadEntry {
                source,
                remote_id,
                path,
                bytes: bytes as u64,
                downloaded_at,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: EngineEvent) -> EventRecord {
        EventRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            job_id: event.job_id().map(String::from),
            data: event,
        }
    }

    #[test]
    fn test_insert_and_query() {
        let log = SqliteEventLog::in_memory().unwrap();

        let id1 = log
            .insert(&record(EngineEvent::JobSubmitted {
                job_id: "j1".to_string(),
                source: "e621".to_string(),
                query: "canine".to_string(),
                dest_dir: "media".to_string(),
            }))
            .unwrap();
        let id2 = log
            .insert(&record(EngineEvent::JobCancelled {
                job_id: "j2".to_string(),
            }))
            .unwrap();
        assert!(id2 > id1);

        let all = log.query(&EventFilter::new()).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].event_type, "job_cancelled");
    }

    #[test]
    fn test_query_by_job_and_type() {
        let log = SqliteEventLog::in_memory().unwrap();
        log.insert(&record(EngineEvent::JobCancelled {
            job_id: "j1".to_string(),
        }))
        .unwrap();
        log.insert(&record(EngineEvent::JobCancelled {
            job_id: "j2".to_string(),
        }))
        .unwrap();
        log.insert(&record(EngineEvent::ProxyPoolDegraded { unhealthy_count: 1 }))
            .unwrap();

        let for_job = log
            .query(&EventFilter::new().with_job_id("j1"))
            .unwrap();
        assert_eq!(for_job.len(), 1);

        let by_type = log
            .query(&EventFilter::new().with_event_type("proxy_pool_degraded"))
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert!(by_type[0].job_id.is_none());
    }

    #[test]
    fn test_query_limit() {
        let log = SqliteEventLog::in_memory().unwrap();
        for i in 0..10 {
            log.insert(&record(EngineEvent::JobCancelled {
                job_id: format!("j{}", i),
            }))
            .unwrap();
        }
        let limited = log.query(&EventFilter::new().with_limit(3)).unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn test_download_history_roundtrip() {
        let log = SqliteEventLog::in_memory().unwrap();

        assert!(!log.was_downloaded("e621", "42").unwrap());

        log.record(&DownloadEntry {
            source: "e621".to_string(),
            remote_id: "42".to_string(),
            path: "media/e621/42.png".to_string(),
            bytes: 1000,
            downloaded_at: Utc::now(),
        })
        .unwrap();

        assert!(log.was_downloaded("e621", "42").unwrap());
        assert!(!log.was_downloaded("rule34", "42").unwrap());

        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].bytes, 1000);
    }

    #[test]
    fn test_download_history_replaces_duplicate() {
        let log = SqliteEventLog::in_memory().unwrap();
        for bytes in [100u64, 200] {
            log.record(&DownloadEntry {
                source: "e621".to_string(),
                remote_id: "42".to_string(),
                path: "media/e621/42.png".to_string(),
                bytes,
                downloaded_at: Utc::now(),
            })
            .unwrap();
        }
        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].bytes, 200);
    }
}
