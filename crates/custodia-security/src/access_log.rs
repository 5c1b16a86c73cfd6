// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capped access log.
//
// Schema:
//   access_log(
//     id   INTEGER PRIMARY KEY CHECK (id = 1),
//     logs TEXT    NOT NULL    -- newline-separated lines, oldest first
//   )
//
// Each line reads "yyyy-MM-dd HH:mm:ss - <category>: <action>" (UTC).  The
// whole log is one blob; every append rewrites it and drops the oldest lines
// beyond the capacity.

use chrono::{DateTime, Utc};
use custodia_core::error::Result;
use custodia_core::types::format_log_timestamp;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::store::db_err;

pub struct AccessLog {
    conn: Connection,
    capacity: usize,
}

impl AccessLog {
    /// Use `conn` for the log, creating its table if needed.
    pub fn new(conn: Connection, capacity: usize) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS access_log (
                id   INTEGER PRIMARY KEY CHECK (id = 1),
                logs TEXT    NOT NULL
             );",
        )
        .map_err(db_err)?;
        Ok(Self { conn, capacity })
    }

    /// Append one line stamped with `at`.
    pub fn append(&self, at: DateTime<Utc>, category: &str, action: &str) -> Result<()> {
        let line = format!("{} - {category}: {action}", format_log_timestamp(at));

        let mut lines = self.lines_oldest_first()?;
        lines.push(line);
        if lines.len() > self.capacity {
            lines.drain(..lines.len() - self.capacity);
        }

        self.conn
            .execute(
                "INSERT INTO access_log (id, logs) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET logs = excluded.logs",
                params![lines.join("\n")],
            )
            .map_err(db_err)?;

        debug!(category, lines = lines.len(), "access logged");
        Ok(())
    }

    /// Every retained line, newest first.
    pub fn lines_newest_first(&self) -> Result<Vec<String>> {
        let mut lines = self.lines_oldest_first()?;
        lines.reverse();
        Ok(lines)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lines_oldest_first()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM access_log", [])
            .map_err(db_err)?;
        Ok(())
    }

    fn lines_oldest_first(&self) -> Result<Vec<String>> {
        let blob: Option<String> = self
            .conn
            .query_row("SELECT logs FROM access_log WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;

        Ok(match blob {
            Some(text) if !text.is_empty() => text.split('\n').map(str::to_owned).collect(),
            _ => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_log(capacity: usize) -> AccessLog {
        AccessLog::new(Connection::open_in_memory().unwrap(), capacity).unwrap()
    }

    #[test]
    fn line_format() {
        let log = make_log(100);
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        log.append(at, "DATA_ACCESS", "read api_token").unwrap();
        assert_eq!(
            log.lines_newest_first().unwrap(),
            vec!["2026-03-04 05:06:07 - DATA_ACCESS: read api_token".to_owned()]
        );
    }

    #[test]
    fn keeps_most_recent_lines_newest_first() {
        let log = make_log(100);
        let at = Utc::now();
        for i in 0..130 {
            log.append(at, "TEST", &format!("op {i}")).unwrap();
        }

        let lines = log.lines_newest_first().unwrap();
        assert_eq!(lines.len(), 100);
        assert!(lines[0].ends_with("TEST: op 129"));
        assert!(lines[99].ends_with("TEST: op 30"));
    }

    #[test]
    fn clear_empties_log() {
        let log = make_log(3);
        log.append(Utc::now(), "A", "one").unwrap();
        assert!(!log.is_empty().unwrap());
        log.clear().unwrap();
        assert!(log.is_empty().unwrap());
        assert!(log.lines_newest_first().unwrap().is_empty());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");

        let log = AccessLog::new(Connection::open(&path).unwrap(), 10).unwrap();
        log.append(Utc::now(), "A", "persisted").unwrap();
        drop(log);

        let log = AccessLog::new(Connection::open(&path).unwrap(), 10).unwrap();
        assert_eq!(log.len().unwrap(), 1);
    }
}
