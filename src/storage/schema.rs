//! Database schema and migrations.

use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS kv_sequence (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO kv_sequence (id, value) VALUES (1, 0);

        CREATE TABLE IF NOT EXISTS kv_items (
            key TEXT PRIMARY KEY,
            value TEXT,
            writer TEXT NOT NULL,
            revision INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_kv_items_revision ON kv_items(revision);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let seq: i64 = conn
            .query_row("SELECT value FROM kv_sequence WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seq, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute("UPDATE kv_sequence SET value = 7 WHERE id = 1", [])
            .unwrap();
        migrate(&conn).unwrap(); // Should not error or reset the sequence

        let seq: i64 = conn
            .query_row("SELECT value FROM kv_sequence WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seq, 7);
    }
}
