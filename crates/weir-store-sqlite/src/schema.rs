//! SQL schema for the weir SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! the `PRAGMA user_version` number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS records (
    uri         TEXT PRIMARY KEY,   -- at://<did>/<collection>/<rkey>
    cid         TEXT NOT NULL,      -- content hash of the current revision
    did         TEXT NOT NULL,
    collection  TEXT NOT NULL,      -- always the URI's collection segment
    json        TEXT NOT NULL,      -- serialized record body
    indexed_at  TEXT NOT NULL       -- RFC 3339 UTC, fixed width
);

-- Secondary 'hot field' index: one row per configured field per record,
-- maintained in the same transaction as the owning record.
CREATE TABLE IF NOT EXISTS record_kv (
    uri    TEXT NOT NULL REFERENCES records(uri) ON DELETE CASCADE,
    key    TEXT NOT NULL,
    value  TEXT NOT NULL,
    PRIMARY KEY (uri, key)
);

-- Inverted index over rich-text annotations (mentions, tags, links).
-- Fully recomputed on every write of the owning record.
CREATE TABLE IF NOT EXISTS record_facets (
    uri    TEXT NOT NULL REFERENCES records(uri) ON DELETE CASCADE,
    type   TEXT NOT NULL,
    value  TEXT NOT NULL,
    PRIMARY KEY (uri, type, value)
);

CREATE TABLE IF NOT EXISTS actors (
    did               TEXT PRIMARY KEY,
    handle            TEXT,
    indexed_at        TEXT NOT NULL,
    last_seen_notifs  TEXT
);

-- Moderation labels. For a (src, uri, val) triple only the max-cts row is
-- authoritative; the store guards writes so cts never moves backwards for
-- an exact primary-key match.
CREATE TABLE IF NOT EXISTS labels (
    src  TEXT NOT NULL,
    uri  TEXT NOT NULL,
    cid  TEXT NOT NULL,
    val  TEXT NOT NULL,
    neg  INTEGER NOT NULL DEFAULT 0,
    cts  TEXT NOT NULL,
    exp  TEXT,
    PRIMARY KEY (src, uri, cid, val)
);

CREATE INDEX IF NOT EXISTS records_collection_idx ON records(collection, indexed_at);
CREATE INDEX IF NOT EXISTS records_did_idx        ON records(did);
CREATE INDEX IF NOT EXISTS record_kv_value_idx    ON record_kv(key, value);
CREATE INDEX IF NOT EXISTS record_facets_idx      ON record_facets(type, value);
CREATE INDEX IF NOT EXISTS labels_uri_idx         ON labels(uri);

PRAGMA user_version = 1;
";
