//! # Database models
//!
//! Row types that map to the SQLite schema via **Diesel**, plus the strongly
//! typed records the rest of the crate works with.
//!
//! - [`EmbeddingRow`] / [`NewEmbedding`]: raw `embeddings` rows; the vector is a
//!   little-endian `f32` blob. Decoded into [`EmbeddingRecord`].
//! - [`Conversation`]: a named chat session.
//! - [`TurnRow`]: one persisted chat turn. Decoded into [`MemoryTurn`].
//!
//! Rows never leave the storage modules; callers only see the typed records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::CopilotError;

/// One stored chunk of the corpus together with its embedding.
///
/// Created during ingestion, never mutated. `vector.len()` is identical for
/// every record of a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: i32,
    /// File path or logical name the chunk came from. Not unique.
    pub source_location: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A chunk waiting to be written by [`crate::vector_store::VectorStore::put`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub source_location: String,
    pub text: String,
    pub vector: Vec<f32>,
}

impl NewRecord {
    pub fn new(source_location: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            source_location: source_location.into(),
            text: text.into(),
            vector,
        }
    }
}

/// Raw `embeddings` row as read back from SQLite.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::embeddings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EmbeddingRow {
    pub id: i32,
    pub corpus: String,
    pub source_location: String,
    pub text: String,
    pub vector: Vec<u8>,
    pub dimension: i32,
}

/// Insertable `embeddings` row.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::embeddings)]
pub struct NewEmbedding<'a> {
    pub corpus: &'a str,
    pub source_location: &'a str,
    pub text: &'a str,
    pub vector: Vec<u8>,
    pub dimension: i32,
}

/// A named chat session. Turns are grouped under it.
#[derive(Queryable, Identifiable, Insertable, Debug, Selectable)]
#[diesel(table_name = crate::schema::conversations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Conversation {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub session_name: String,
}

/// Raw `memory_turns` row.
#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::memory_turns)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TurnRow {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub conversation_id: i32,
    pub role: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Who authored a turn. Closed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(CopilotError::CorruptRecord(format!(
                "unknown turn role: {other}"
            ))),
        }
    }
}

/// One conversation turn as materialized for prompt construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTurn {
    pub id: i32,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<TurnRow> for MemoryTurn {
    type Error = CopilotError;

    fn try_from(row: TurnRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .ok_or_else(|| CopilotError::CorruptRecord("memory turn without id".into()))?;
        let timestamp = Utc
            .timestamp_millis_opt(row.timestamp)
            .single()
            .ok_or_else(|| {
                CopilotError::CorruptRecord(format!("bad timestamp {} on turn {id}", row.timestamp))
            })?;

        Ok(Self {
            id,
            role: row.role.parse()?,
            content: row.content,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_role_round_trips_through_str() {
        for role in [TurnRole::User, TurnRole::Assistant] {
            assert_eq!(role.to_string().parse::<TurnRole>().unwrap(), role);
        }
        assert!("system".parse::<TurnRole>().is_err());
    }

    #[test]
    fn test_turn_row_decodes() {
        let row = TurnRow {
            id: Some(7),
            conversation_id: 1,
            role: "assistant".into(),
            content: "hello".into(),
            timestamp: 1_700_000_000_000,
        };
        let turn = MemoryTurn::try_from(row).unwrap();
        assert_eq!(turn.id, 7);
        assert_eq!(turn.role, TurnRole::Assistant);
        assert_eq!(turn.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_turn_row_with_unknown_role_is_corrupt() {
        let row = TurnRow {
            id: Some(1),
            conversation_id: 1,
            role: "tool".into(),
            content: String::new(),
            timestamp: 0,
        };
        assert!(matches!(
            MemoryTurn::try_from(row),
            Err(CopilotError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_memory_turn_serializes_timestamp_as_rfc3339() {
        let turn = MemoryTurn {
            id: 3,
            role: TurnRole::User,
            content: "hi".into(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");

        let back: MemoryTurn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }
}
