// Kept in the shape `diesel print-schema` emits; the DDL lives in `crate::db`.

diesel::table! {
    embeddings (id) {
        id -> Integer,
        corpus -> Text,
        source_location -> Text,
        text -> Text,
        vector -> Binary,
        dimension -> Integer,
    }
}

diesel::table! {
    conversations (id) {
        id -> Integer,
        session_name -> Text,
    }
}

diesel::table! {
    memory_turns (id) {
        id -> Integer,
        conversation_id -> Integer,
        role -> Text,
        content -> Text,
        timestamp -> BigInt,
    }
}

diesel::joinable!(memory_turns -> conversations (conversation_id));

diesel::allow_tables_to_appear_in_same_query!(embeddings, conversations, memory_turns,);
