//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Cold-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs (one per site harvest)
CREATE TABLE IF NOT EXISTS harvest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_url TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Sites the tenant coordinator harvests
CREATE TABLE IF NOT EXISTS target_sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root_url TEXT NOT NULL UNIQUE,
    filter_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Normalized inventory
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    first_seen TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    web_id INTEGER NOT NULL REFERENCES webs(id),
    title TEXT NOT NULL,
    root_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    drive_id TEXT,
    delta_token TEXT,
    UNIQUE(title, root_path)
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers(id),
    web_id INTEGER NOT NULL REFERENCES webs(id),
    url TEXT NOT NULL UNIQUE,
    server_relative_path TEXT NOT NULL,
    sub_folder TEXT NOT NULL,
    author TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    size INTEGER NOT NULL,
    kind TEXT NOT NULL,
    drive_id TEXT,
    item_id TEXT,
    discovered_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_stats (
    file_id INTEGER PRIMARY KEY REFERENCES files(id),
    access_count INTEGER,
    actor_count INTEGER,
    version_count INTEGER,
    versions_size INTEGER,
    analysis_state TEXT NOT NULL,
    last_error TEXT,
    updated_at TEXT NOT NULL
);

-- Batch-tagged landing area, emptied by each merge
CREATE TABLE IF NOT EXISTS staging_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    inserted_at TEXT NOT NULL,
    site_url TEXT NOT NULL,
    web_url TEXT NOT NULL,
    container_title TEXT NOT NULL,
    container_root TEXT NOT NULL,
    container_kind TEXT NOT NULL,
    container_drive_id TEXT,
    delta_token TEXT,
    url TEXT NOT NULL,
    server_relative_path TEXT NOT NULL,
    sub_folder TEXT NOT NULL,
    author TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    size INTEGER NOT NULL,
    kind TEXT NOT NULL,
    drive_id TEXT,
    item_id TEXT
);

-- Indexes for common queries
CREATE INDEX IF NOT EXISTS idx_staging_batch ON staging_files(batch_id);
CREATE INDEX IF NOT EXISTS idx_files_container ON files(container_id);
CREATE INDEX IF NOT EXISTS idx_files_drive_item ON files(drive_id, item_id);
CREATE INDEX IF NOT EXISTS idx_file_stats_state ON file_stats(analysis_state);
CREATE INDEX IF NOT EXISTS idx_runs_site ON harvest_runs(site_url);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "containers",
            "file_stats",
            "files",
            "harvest_runs",
            "sites",
            "staging_files",
            "target_sites",
            "webs",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
    }

    #[test]
    fn test_file_url_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO sites (url, first_seen) VALUES ('s', 'now');
             INSERT INTO webs (site_id, url) VALUES (1, 'w');
             INSERT INTO containers (web_id, title, root_path, kind) VALUES (1, 'Docs', '/d', 'list');
             INSERT INTO files (container_id, web_id, url, server_relative_path, sub_folder, author,
                 last_modified, size, kind, discovered_at, updated_at)
             VALUES (1, 1, 'u', '/d/a', '', 'a', 'now', 1, 'plain', 'now', 'now');",
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO files (container_id, web_id, url, server_relative_path, sub_folder, author,
                 last_modified, size, kind, discovered_at, updated_at)
             VALUES (1, 1, 'u', '/d/a', '', 'a', 'now', 1, 'plain', 'now', 'now')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
