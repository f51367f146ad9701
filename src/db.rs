//! SQLite connection setup shared by the vector store and the memory buffer.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::debug;

use crate::error::Result;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    corpus TEXT NOT NULL,
    source_location TEXT NOT NULL,
    text TEXT NOT NULL,
    vector BLOB NOT NULL,
    dimension INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS embeddings_corpus_id ON embeddings (corpus, id);

CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS memory_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations (id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS memory_turns_conversation_id ON memory_turns (conversation_id, id);
"#;

/// Open `db_url` and make sure every table exists.
///
/// `AUTOINCREMENT` keeps ids strictly increasing even after a corpus is cleared,
/// which the paged scan relies on.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    debug!("Opening SQLite database at {}", db_url);
    let mut conn = SqliteConnection::establish(db_url)?;
    conn.batch_execute(SCHEMA)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_establish_connection_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("copilot.db");
        let url = url.to_str().unwrap();

        establish_connection(url).unwrap();
        assert!(establish_connection(url).is_ok());
    }

    #[test]
    fn test_establish_connection_bad_path() {
        assert!(establish_connection("/nonexistent/dir/copilot.db").is_err());
    }
}
