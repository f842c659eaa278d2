//! SQLite report writer, one table keyed by proxy string

use crate::proxy::models::CheckResult;
use crate::Result;
use anyhow::Context;
use rusqlite::{params, Connection};
use std::path::Path;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS proxies (
    proxy TEXT PRIMARY KEY,
    status TEXT,
    response_time REAL,
    country TEXT,
    city TEXT,
    anonymity TEXT,
    protocol TEXT,
    check_time TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

pub fn write(results: &[CheckResult], path: &Path) -> Result<()> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
    conn.execute(CREATE_TABLE, [])
        .context("Failed to create proxies table")?;

    // The proxy string is the primary key; repeated entries are skipped
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO proxies \
         (proxy, status, response_time, country, city, anonymity, protocol, check_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for result in results {
        stmt.execute(params![
            result.proxy,
            result.status.to_string(),
            result.response_time_ms,
            result.country,
            result.city,
            result.anonymity.to_string(),
            result.protocol.to_string(),
            result.checked_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])
        .context("Failed to insert result row")?;
    }
    Ok(())
}
