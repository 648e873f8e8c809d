//! Versioned schema for the descriptor database.
//!
//! The on-disk version lives in `PRAGMA user_version`. Each entry in
//! `MIGRATIONS` lifts the schema by one version and must be safe to run on
//! a database that already has the structure it creates.

use rusqlite::Connection;

/// Name of the record collection, also the key used in backup documents.
pub const RECORD_STORE: &str = "research_data";

/// `MIGRATIONS[i]` upgrades a database from version `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[
    // 1: record collection, keyed by a never-reused auto-increment id.
    "CREATE TABLE IF NOT EXISTS research_data (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        descriptor  BLOB,
        landmarks   TEXT,
        detection   TEXT,
        timestamp   TEXT NOT NULL,
        kind        TEXT
    );",
];

/// Schema version this build writes.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// What `migrate` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    Current(u32),
    Upgraded { from: u32, to: u32 },
    /// Written by a newer build; left untouched.
    TooNew(u32),
}

pub fn read_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Bring the schema up to `SCHEMA_VERSION` in a single transaction.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<Migration> {
    let current = read_version(conn)?;
    if current > SCHEMA_VERSION {
        return Ok(Migration::TooNew(current));
    }
    if current == SCHEMA_VERSION {
        return Ok(Migration::Current(current));
    }

    let tx = conn.transaction()?;
    for step in &MIGRATIONS[current as usize..] {
        tx.execute_batch(step)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(Migration::Upgraded {
        from: current,
        to: SCHEMA_VERSION,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_is_upgraded() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(
            migrate(&mut conn).unwrap(),
            Migration::Upgraded {
                from: 0,
                to: SCHEMA_VERSION
            }
        );
        assert_eq!(read_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(
            migrate(&mut conn).unwrap(),
            Migration::Current(SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_existing_rows_survive_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        // Collection created by hand, version never stamped.
        conn.execute_batch(
            "CREATE TABLE research_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                descriptor BLOB, landmarks TEXT, detection TEXT,
                timestamp TEXT NOT NULL, kind TEXT
            );
            INSERT INTO research_data (timestamp, kind) VALUES ('2024-01-01T00:00:00.000Z', 'scan');",
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM research_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_newer_version_is_left_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert_eq!(
            migrate(&mut conn).unwrap(),
            Migration::TooNew(SCHEMA_VERSION + 1)
        );
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'research_data'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }
}
