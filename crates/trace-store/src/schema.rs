//! Diesel table definitions for the three logical tables of spec §6
//! ("Persisted store layout"): `sessions`, `events`, `snapshots`.

diesel::table! {
    use diesel::sql_types::*;

    sessions (id) {
        id -> Uuid,
        name -> Varchar,
        start_time -> Int8,
        end_time -> Nullable<Int8>,
        status -> Varchar,
        agent_count -> Int4,
        event_count -> Int8,
        metadata -> Json,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    events (id) {
        id -> Uuid,
        session_id -> Uuid,
        agent_id -> Nullable<Varchar>,
        parent_id -> Nullable<Uuid>,
        correlation_id -> Nullable<Uuid>,
        timestamp -> Int8,
        event_type -> Varchar,
        phase -> Varchar,
        severity -> Varchar,
        payload -> Json,
        metadata -> Json,
        performance -> Nullable<Json>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    snapshots (id) {
        id -> Uuid,
        session_id -> Uuid,
        timestamp -> Int8,
        snapshot_type -> Varchar,
        tags -> Array<Text>,
        description -> Nullable<Text>,
        base_snapshot_id -> Nullable<Uuid>,
        compressed -> Bool,
        size -> Int8,
        compressed_size -> Nullable<Int8>,
        checksum -> Varchar,
        body -> Binary,
        created_at -> Timestamptz,
        expires_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sessions, events, snapshots);
