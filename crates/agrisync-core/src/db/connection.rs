//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Owned `SQLite` connection with the app's pragmas applied.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database file at the given path, creating it if it doesn't exist.
    ///
    /// Does not touch the schema; see [`super::migrations::run`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer mobile cache
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" here; only the error matters.
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection, surfacing any error from `SQLite`.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, error)| error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let value: i32 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn open_creates_file_in_wal_mode() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("agrisync.db");

        let db = Database::open(&path).unwrap();
        let mode: String = db
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();

        assert!(path.exists());
        assert_eq!(mode.to_ascii_lowercase(), "wal");
        db.close().unwrap();
    }

    #[test]
    fn open_rejects_garbage_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("agrisync.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let error = Database::open(&path).err().unwrap();
        assert!(error.is_corrupted_database(), "unexpected error: {error}");
    }
}
