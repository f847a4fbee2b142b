pub mod migrations;
pub mod queries;
pub mod store;

use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

pub use store::{retry_once, CalendarStore, SqliteCalendarStore};

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}
