use rusqlite::Connection;

use super::StoreResult;

/// Stored in `PRAGMA user_version`; gates the one-time table and index creation.
pub const SCHEMA_VERSION: i32 = 1;

pub const DATE_INDEX: &str = "idx_weights_date";

/// Returns `true` when this call created the schema.
pub fn apply(conn: &Connection) -> StoreResult<bool> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(false);
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS weights (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            weight REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_weights_date ON weights(date);
        "#,
    )?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(true)
}
