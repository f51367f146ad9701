//! # Conversation memory
//!
//! Append-only log of chat turns for one session, plus the bounded *active
//! window* used to build prompts.
//!
//! - Every turn is persisted to the `memory_turns` table and kept forever.
//! - [`MemoryBuffer::recent`] reads the newest turns (`ORDER BY id DESC LIMIT n`)
//!   and reverses them, so callers always get oldest → newest.
//! - [`MemoryBuffer::active_window`] is `recent(window)` where `window` is the
//!   configured `memory_window`.
//!
//! Ids come from SQLite's `AUTOINCREMENT` and are strictly increasing.
//! Timestamps are milliseconds since the epoch, clamped so they never go
//! backwards even if the wall clock does.
//!
//! ```no_run
//! use context_copilot::memory::MemoryBuffer;
//! use context_copilot::models::TurnRole;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let memory = MemoryBuffer::open("copilot.db", "default", 10)?;
//! memory.append(TurnRole::User, "hi")?;
//! memory.append(TurnRole::Assistant, "hello")?;
//! for turn in memory.active_window()? {
//!     println!("{}: {}", turn.role, turn.content);
//! }
//! # Ok(()) }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use diesel::prelude::*;
use tracing::{debug, info};

use crate::db::establish_connection;
use crate::error::{CopilotError, Result};
use crate::models::{Conversation, MemoryTurn, TurnRole, TurnRow};
use crate::schema::{conversations, memory_turns};

/// Persistent turn log bound to one conversation.
pub struct MemoryBuffer {
    connection: Mutex<SqliteConnection>,
    conversation_id: i32,
    session_name: String,
    window: usize,
}

impl MemoryBuffer {
    /// Open the database and attach to `session_name`, creating the
    /// conversation on first use.
    pub fn open(db_url: &str, session_name: &str, window: usize) -> Result<Self> {
        let connection = establish_connection(db_url)?;
        Self::with_connection(connection, session_name, window)
    }

    /// Attach to `session_name` over an existing connection. The schema must exist.
    pub fn with_connection(
        mut connection: SqliteConnection,
        session_name: &str,
        window: usize,
    ) -> Result<Self> {
        let conversation = ensure_conversation(&mut connection, session_name)?;
        let conversation_id = conversation
            .id
            .ok_or_else(|| CopilotError::CorruptRecord("conversation without id".into()))?;

        Ok(Self {
            connection: Mutex::new(connection),
            conversation_id,
            session_name: session_name.to_string(),
            window,
        })
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Size of the active window.
    pub fn window(&self) -> usize {
        self.window
    }

    fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a new turn and return it with its assigned id and timestamp.
    ///
    /// Calls are applied in call order; the only failure mode is storage.
    pub fn append(&self, role: TurnRole, content: impl Into<String>) -> Result<MemoryTurn> {
        let content = content.into();
        let mut conn = self.conn();

        let row = conn.transaction::<_, CopilotError, _>(|conn| {
            let last: Option<i64> = memory_turns::table
                .filter(memory_turns::conversation_id.eq(self.conversation_id))
                .select(diesel::dsl::max(memory_turns::timestamp))
                .first(conn)?;
            let now = Utc::now().timestamp_millis();
            let timestamp = last.map_or(now, |last| now.max(last));

            let row = TurnRow {
                id: None,
                conversation_id: self.conversation_id,
                role: role.to_string(),
                content,
                timestamp,
            };
            Ok(diesel::insert_into(memory_turns::table)
                .values(&row)
                .returning(TurnRow::as_returning())
                .get_result(conn)?)
        })?;

        debug!(session = %self.session_name, id = ?row.id, %role, "Appended memory turn");
        MemoryTurn::try_from(row)
    }

    /// The `limit` most recent turns, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<MemoryTurn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut conn = self.conn();
        let newest_first: Vec<TurnRow> = memory_turns::table
            .filter(memory_turns::conversation_id.eq(self.conversation_id))
            .order(memory_turns::id.desc())
            .limit(limit)
            .select(TurnRow::as_select())
            .load(&mut *conn)?;
        drop(conn);

        newest_first
            .into_iter()
            .rev()
            .map(MemoryTurn::try_from)
            .collect()
    }

    /// `recent(window)`: the turns that go into the next prompt.
    pub fn active_window(&self) -> Result<Vec<MemoryTurn>> {
        self.recent(self.window)
    }

    /// Total turns ever appended to this conversation.
    pub fn len(&self) -> Result<usize> {
        let mut conn = self.conn();
        let count: i64 = memory_turns::table
            .filter(memory_turns::conversation_id.eq(self.conversation_id))
            .count()
            .get_result(&mut *conn)?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Find the conversation named `session_name`, inserting it if missing.
fn ensure_conversation(conn: &mut SqliteConnection, session_name: &str) -> Result<Conversation> {
    conn.transaction::<_, CopilotError, _>(|conn| {
        let existing: Option<Conversation> = conversations::table
            .filter(conversations::session_name.eq(session_name))
            .select(Conversation::as_select())
            .first(conn)
            .optional()?;

        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let conversation = diesel::insert_into(conversations::table)
            .values(&Conversation {
                id: None,
                session_name: session_name.to_string(),
            })
            .returning(Conversation::as_returning())
            .get_result(conn)?;
        info!("Started conversation {:?}", session_name);
        Ok(conversation)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn buffer(window: usize) -> (TempDir, MemoryBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let memory = MemoryBuffer::open(path.to_str().unwrap(), "test", window).unwrap();
        (dir, memory)
    }

    fn pairs(turns: &[MemoryTurn]) -> Vec<(TurnRole, &str)> {
        turns.iter().map(|t| (t.role, t.content.as_str())).collect()
    }

    #[test]
    fn test_recent_returns_last_turns_in_chronological_order() {
        let (_dir, memory) = buffer(10);
        memory.append(TurnRole::User, "hi").unwrap();
        memory.append(TurnRole::Assistant, "hello").unwrap();
        memory.append(TurnRole::User, "how are you").unwrap();

        let recent = memory.recent(2).unwrap();
        assert_eq!(
            pairs(&recent),
            vec![(TurnRole::Assistant, "hello"), (TurnRole::User, "how are you")]
        );
    }

    #[test]
    fn test_recent_n_after_n_and_n_plus_m_appends() {
        let (_dir, memory) = buffer(4);
        let n = 4;
        for i in 0..n {
            memory.append(TurnRole::User, format!("t{i}")).unwrap();
        }
        let all: Vec<String> = memory.recent(n).unwrap().into_iter().map(|t| t.content).collect();
        assert_eq!(all, vec!["t0", "t1", "t2", "t3"]);

        for i in n..n + 3 {
            memory.append(TurnRole::Assistant, format!("t{i}")).unwrap();
        }
        let window: Vec<String> =
            memory.active_window().unwrap().into_iter().map(|t| t.content).collect();
        assert_eq!(window, vec!["t3", "t4", "t5", "t6"]);
        assert_eq!(memory.len().unwrap(), 7);
    }

    #[test]
    fn test_ids_increase_and_timestamps_never_decrease() {
        let (_dir, memory) = buffer(10);
        let turns: Vec<MemoryTurn> = (0..5)
            .map(|i| memory.append(TurnRole::User, format!("{i}")).unwrap())
            .collect();
        assert!(turns.windows(2).all(|w| w[0].id < w[1].id));
        assert!(turns.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_recent_on_empty_and_zero_limit() {
        let (_dir, memory) = buffer(3);
        assert!(memory.recent(5).unwrap().is_empty());
        memory.append(TurnRole::User, "x").unwrap();
        assert!(memory.recent(0).unwrap().is_empty());
        assert_eq!(memory.recent(100).unwrap().len(), 1);
    }

    #[test]
    fn test_sessions_are_separate_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let url = path.to_str().unwrap();

        {
            let a = MemoryBuffer::open(url, "a", 10).unwrap();
            let b = MemoryBuffer::open(url, "b", 10).unwrap();
            a.append(TurnRole::User, "for a").unwrap();
            b.append(TurnRole::User, "for b").unwrap();
        }

        let a = MemoryBuffer::open(url, "a", 10).unwrap();
        let turns = a.recent(10).unwrap();
        assert_eq!(pairs(&turns), vec![(TurnRole::User, "for a")]);
        assert_eq!(a.session_name(), "a");
    }
}
