//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::AnalysisState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    FileStatsRecord, MergeOutcome, RunRecord, RunStatus, StagedFile, StoredFile, TargetSiteRecord,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// Each harvested site opens its own connection, so the busy timeout
    /// lets concurrent writers queue instead of failing.
    pub fn new(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(30))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            site_url: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            config_hash: row.get(4)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(RunStatus::Running),
        })
    }
}

fn stage_rows(tx: &Transaction<'_>, batch_id: &str, files: &[StagedFile]) -> StorageResult<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare_cached(
        "INSERT INTO staging_files (
            batch_id, inserted_at, site_url, web_url, container_title, container_root,
            container_kind, container_drive_id, delta_token, url, server_relative_path,
            sub_folder, author, last_modified, size, kind, drive_id, item_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?;

    for f in files {
        stmt.execute(params![
            batch_id,
            now,
            f.site_url,
            f.web_url,
            f.container_title,
            f.container_root,
            f.container_kind,
            f.container_drive_id,
            f.delta_token,
            f.url,
            f.server_relative_path,
            f.sub_folder,
            f.author,
            f.last_modified,
            f.size,
            f.kind,
            f.drive_id,
            f.item_id,
        ])?;
    }
    Ok(files.len())
}

/// Set-based upsert of one batch into sites, webs, containers and files,
/// followed by deletion of the batch
fn merge_rows(tx: &Transaction<'_>, batch_id: &str) -> StorageResult<usize> {
    let now = Utc::now().to_rfc3339();

    tx.execute(
        "INSERT INTO sites (url, first_seen)
         SELECT DISTINCT site_url, ?2 FROM staging_files WHERE batch_id = ?1
         ON CONFLICT(url) DO NOTHING",
        params![batch_id, now],
    )?;

    tx.execute(
        "INSERT INTO webs (site_id, url)
         SELECT DISTINCT s.id, st.web_url
         FROM staging_files st JOIN sites s ON s.url = st.site_url
         WHERE st.batch_id = ?1
         ON CONFLICT(url) DO NOTHING",
        params![batch_id],
    )?;

    tx.execute(
        "INSERT INTO containers (web_id, title, root_path, kind, drive_id, delta_token)
         SELECT MIN(w.id), st.container_title, st.container_root, MIN(st.container_kind),
                MAX(st.container_drive_id), MAX(st.delta_token)
         FROM staging_files st JOIN webs w ON w.url = st.web_url
         WHERE st.batch_id = ?1
         GROUP BY st.container_title, st.container_root
         ON CONFLICT(title, root_path) DO UPDATE SET
            drive_id = COALESCE(excluded.drive_id, containers.drive_id),
            delta_token = COALESCE(excluded.delta_token, containers.delta_token)",
        params![batch_id],
    )?;

    let merged = tx.execute(
        "INSERT INTO files (
            container_id, web_id, url, server_relative_path, sub_folder, author,
            last_modified, size, kind, drive_id, item_id, discovered_at, updated_at
         )
         SELECT c.id, w.id, st.url, st.server_relative_path, st.sub_folder, st.author,
                st.last_modified, st.size, st.kind, st.drive_id, st.item_id, ?2, ?2
         FROM staging_files st
         JOIN webs w ON w.url = st.web_url
         JOIN containers c ON c.title = st.container_title AND c.root_path = st.container_root
         WHERE st.batch_id = ?1
         ON CONFLICT(url) DO UPDATE SET
            container_id = excluded.container_id,
            web_id = excluded.web_id,
            sub_folder = excluded.sub_folder,
            author = excluded.author,
            last_modified = excluded.last_modified,
            size = excluded.size,
            kind = excluded.kind,
            drive_id = excluded.drive_id,
            item_id = excluded.item_id,
            updated_at = excluded.updated_at",
        params![batch_id, now],
    )?;

    tx.execute(
        "DELETE FROM staging_files WHERE batch_id = ?1",
        params![batch_id],
    )?;

    Ok(merged)
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, site_url: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO harvest_runs (site_url, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![site_url, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_url, started_at, finished_at, config_hash, status
             FROM harvest_runs WHERE id = ?1",
        )?;

        stmt.query_row(params![run_id], Self::row_to_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self, site_url: &str) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_url, started_at, finished_at, config_hash, status
             FROM harvest_runs WHERE site_url = ?1 ORDER BY id DESC LIMIT 1",
        )?;

        Ok(stmt.query_row(params![site_url], Self::row_to_run).optional()?)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE harvest_runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Target Sites =====

    fn upsert_target_site(
        &mut self,
        root_url: &str,
        filter_json: Option<&str>,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO target_sites (root_url, filter_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(root_url) DO UPDATE SET
                filter_json = excluded.filter_json,
                updated_at = excluded.updated_at",
            params![root_url, filter_json, now],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM target_sites WHERE root_url = ?1",
            params![root_url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn list_target_sites(&self) -> StorageResult<Vec<TargetSiteRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, root_url, filter_json FROM target_sites ORDER BY id")?;

        let sites = stmt
            .query_map([], |row| {
                Ok(TargetSiteRecord {
                    id: row.get(0)?,
                    root_url: row.get(1)?,
                    filter_json: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sites)
    }

    // ===== Staging =====

    fn insert_staging_batch(
        &mut self,
        batch_id: &str,
        files: &[StagedFile],
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let staged = stage_rows(&tx, batch_id, files)?;
        tx.commit()?;
        Ok(staged)
    }

    fn merge_staging_batch(&mut self, batch_id: &str) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let present: i64 = tx.query_row(
            "SELECT COUNT(*) FROM staging_files WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(StorageError::BatchNotFound(batch_id.to_string()));
        }

        let merged = merge_rows(&tx, batch_id)?;
        tx.commit()?;
        Ok(merged)
    }

    fn stage_and_merge(
        &mut self,
        batch_id: &str,
        files: &[StagedFile],
    ) -> StorageResult<MergeOutcome> {
        let tx = self.conn.transaction()?;
        let staged = stage_rows(&tx, batch_id, files)?;
        let merged = merge_rows(&tx, batch_id)?;
        tx.commit()?;

        Ok(MergeOutcome {
            batch_id: batch_id.to_string(),
            staged,
            merged,
        })
    }

    fn pending_staging_batches(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_id FROM staging_files GROUP BY batch_id ORDER BY MIN(inserted_at)",
        )?;

        let batches = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(batches)
    }

    fn discard_staging_batch(&mut self, batch_id: &str) -> StorageResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM staging_files WHERE batch_id = ?1",
            params![batch_id],
        )?)
    }

    // ===== Files and Stats =====

    fn get_file_by_url(&self, url: &str) -> StorageResult<Option<StoredFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, container_id, web_id, url, sub_folder, author, last_modified, size,
                    kind, drive_id, item_id
             FROM files WHERE url = ?1",
        )?;

        let file = stmt
            .query_row(params![url], |row| {
                Ok(StoredFile {
                    id: row.get(0)?,
                    container_id: row.get(1)?,
                    web_id: row.get(2)?,
                    url: row.get(3)?,
                    sub_folder: row.get(4)?,
                    author: row.get(5)?,
                    last_modified: row.get(6)?,
                    size: row.get(7)?,
                    kind: row.get(8)?,
                    drive_id: row.get(9)?,
                    item_id: row.get(10)?,
                })
            })
            .optional()?;

        Ok(file)
    }

    fn save_file_stats(&mut self, stats: &[FileStatsRecord]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO file_stats (
                    file_id, access_count, actor_count, version_count, versions_size,
                    analysis_state, last_error, updated_at
                 )
                 SELECT id, ?2, ?3, ?4, ?5, ?6, ?7, ?8 FROM files WHERE url = ?1
                 ON CONFLICT(file_id) DO UPDATE SET
                    access_count = excluded.access_count,
                    actor_count = excluded.actor_count,
                    version_count = excluded.version_count,
                    versions_size = excluded.versions_size,
                    analysis_state = excluded.analysis_state,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
            )?;

            for s in stats {
                let rows = stmt.execute(params![
                    s.url,
                    s.access_count,
                    s.actor_count,
                    s.version_count,
                    s.versions_size,
                    s.state.to_db_string(),
                    s.last_error,
                    now,
                ])?;
                if rows == 0 {
                    tracing::warn!("No stored file for {}, stats not saved", s.url);
                }
                written += rows;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn get_file_stats(&self, url: &str) -> StorageResult<Option<FileStatsRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.url, s.access_count, s.actor_count, s.version_count, s.versions_size,
                    s.analysis_state, s.last_error
             FROM file_stats s JOIN files f ON f.id = s.file_id
             WHERE f.url = ?1",
        )?;

        let stats = stmt
            .query_row(params![url], |row| {
                Ok(FileStatsRecord {
                    url: row.get(0)?,
                    access_count: row.get(1)?,
                    actor_count: row.get(2)?,
                    version_count: row.get(3)?,
                    versions_size: row.get(4)?,
                    state: AnalysisState::from_db_string(&row.get::<_, String>(5)?)
                        .unwrap_or(AnalysisState::Pending),
                    last_error: row.get(6)?,
                })
            })
            .optional()?;

        Ok(stats)
    }

    // ===== Statistics =====

    fn count_sites(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sites", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_containers(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM containers", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_files(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_files_by_kind(&self) -> StorageResult<HashMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM files GROUP BY kind")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count as u64);
        }
        Ok(counts)
    }

    fn count_stats_by_state(&self) -> StorageResult<HashMap<AnalysisState, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT analysis_state, COUNT(*) FROM file_stats GROUP BY analysis_state",
        )?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            if let Some(state) = AnalysisState::from_db_string(&state) {
                counts.insert(state, count as u64);
            }
        }
        Ok(counts)
    }

    fn total_access_count(&self) -> StorageResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(access_count), 0) FROM file_stats",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    fn count_runs_by_status(&self) -> StorageResult<HashMap<RunStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM harvest_runs GROUP BY status")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = RunStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }
}
