//! Recordings index.
//!
//! All SQLite access runs on one dedicated worker thread; callers queue
//! closures over the connection and await the reply. This keeps the rusqlite
//! connection off the async runtime and naturally serializes writes.

use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;

use crate::models::{NewRecording, Recording};
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("framegrab-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite database")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("recordings index at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    pub async fn insert_recording(&self, recording: &NewRecording) -> Result<i64> {
        let record = recording.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO recordings (title, url, started_at, path, x, y, width, height, fps)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.title,
                    record.url,
                    record.started_at.to_rfc3339(),
                    record.path,
                    record.region.x,
                    record.region.y,
                    record.region.width,
                    record.region.height,
                    to_i64(u64::from(record.fps))?,
                ],
            )
            .with_context(|| "failed to insert recording")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Stamps the end time, derives the duration from the stored start, and
    /// returns the output path. `None` when the row is gone.
    pub async fn finalize_recording(
        &self,
        recording_id: i64,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.execute(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT started_at, path FROM recordings WHERE id = ?1",
                    params![recording_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
                .with_context(|| "failed to look up recording")?;

            let Some((started_at, path)) = row else {
                return Ok(None);
            };

            let duration_ms = parse_datetime(&started_at)
                .ok()
                .map(|started| (ended_at - started).num_milliseconds().max(0));

            conn.execute(
                "UPDATE recordings SET ended_at = ?1, duration_ms = ?2 WHERE id = ?3",
                params![ended_at.to_rfc3339(), duration_ms, recording_id],
            )
            .with_context(|| "failed to finalize recording")?;

            Ok(Some(path))
        })
        .await
    }

    /// Newest-first listing with optional LIKE filters on title/url and tags.
    pub async fn list_recordings(
        &self,
        search: Option<String>,
        tag: Option<String>,
    ) -> Result<Vec<Recording>> {
        self.execute(move |conn| {
            let mut sql = String::from(
                "SELECT id, title, url, started_at, ended_at, duration_ms, path,
                        x, y, width, height, fps, tags, note
                 FROM recordings",
            );
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();

            if let Some(search) = search.filter(|s| !s.is_empty()) {
                clauses.push("(title LIKE ?1 OR url LIKE ?1)");
                args.push(format!("%{search}%"));
            }
            if let Some(tag) = tag.filter(|t| !t.is_empty()) {
                clauses.push(if args.is_empty() {
                    "tags LIKE ?1"
                } else {
                    "tags LIKE ?2"
                });
                args.push(format!("%{tag}%"));
            }

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(args))?;

            let mut recordings = Vec::new();
            while let Some(row) = rows.next()? {
                recordings.push(recording_from_row(row)?);
            }
            Ok(recordings)
        })
        .await
    }

    /// Returns whether the row existed.
    pub async fn update_annotations(
        &self,
        recording_id: i64,
        tags: Option<String>,
        note: Option<String>,
    ) -> Result<bool> {
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE recordings SET tags = ?1, note = ?2 WHERE id = ?3",
                    params![
                        tags.unwrap_or_default(),
                        note.unwrap_or_default(),
                        recording_id
                    ],
                )
                .with_context(|| "failed to update recording annotations")?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn recording_path(&self, recording_id: i64) -> Result<Option<String>> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT path FROM recordings WHERE id = ?1",
                params![recording_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .with_context(|| "failed to look up recording path")
        })
        .await
    }
}

fn recording_from_row(row: &Row<'_>) -> Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        started_at: parse_datetime(&row.get::<_, String>(3)?)?,
        ended_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s))
            .transpose()?,
        duration_ms: row
            .get::<_, Option<i64>>(5)?
            .map(|ms| u64::try_from(ms.max(0)).unwrap_or(0)),
        path: row.get(6)?,
        x: row.get(7)?,
        y: row.get(8)?,
        width: row.get(9)?,
        height: row.get(10)?,
        fps: u32::try_from(row.get::<_, i64>(11)?.max(0)).unwrap_or(0),
        tags: row.get(12)?,
        note: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::RecordRegion;
    use chrono::Duration as ChronoDuration;

    fn new_recording(title: &str, url: &str) -> NewRecording {
        NewRecording {
            title: title.to_string(),
            url: url.to_string(),
            started_at: Utc::now(),
            path: format!("/tmp/{title}.mp4"),
            region: RecordRegion {
                x: 10,
                y: 20,
                width: 1280,
                height: 720,
            },
            fps: 30,
        }
    }

    async fn database() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("recordings.sqlite3")).unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn insert_and_finalize_roundtrip() {
        let (db, _dir) = database().await;

        let started = Utc::now();
        let mut recording = new_recording("clip", "https://youtube.com/watch?v=a");
        recording.started_at = started;

        let id = db.insert_recording(&recording).await.unwrap();
        assert!(id > 0);

        let ended = started + ChronoDuration::seconds(12);
        let path = db.finalize_recording(id, ended).await.unwrap();
        assert_eq!(path.as_deref(), Some("/tmp/clip.mp4"));

        let rows = db.list_recordings(None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, Some(12_000));
        assert!(rows[0].ended_at.is_some());
    }

    #[tokio::test]
    async fn finalize_missing_recording_returns_none() {
        let (db, _dir) = database().await;
        assert_eq!(db.finalize_recording(999, Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_filters_by_search_and_tag() {
        let (db, _dir) = database().await;

        let a = db
            .insert_recording(&new_recording("rust talk", "https://youtube.com/watch?v=a"))
            .await
            .unwrap();
        let _b = db
            .insert_recording(&new_recording("cooking show", "https://youtube.com/watch?v=b"))
            .await
            .unwrap();

        db.update_annotations(a, Some("tech".into()), Some("good".into()))
            .await
            .unwrap();

        let rows = db.list_recordings(Some("rust".into()), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "rust talk");

        let rows = db.list_recordings(None, Some("tech".into())).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tags, "tech");

        let rows = db
            .list_recordings(Some("rust".into()), Some("tech".into()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = db
            .list_recordings(Some("rust".into()), Some("sports".into()))
            .await
            .unwrap();
        assert!(rows.is_empty());

        // Newest first.
        let rows = db.list_recordings(None, None).await.unwrap();
        assert_eq!(rows[0].title, "cooking show");
    }

    #[tokio::test]
    async fn annotations_update_reports_missing_rows() {
        let (db, _dir) = database().await;
        assert!(!db
            .update_annotations(1, Some("x".into()), None)
            .await
            .unwrap());

        let id = db
            .insert_recording(&new_recording("clip", "url"))
            .await
            .unwrap();
        assert!(db
            .update_annotations(id, Some("x".into()), Some("note".into()))
            .await
            .unwrap());

        let rows = db.list_recordings(None, None).await.unwrap();
        assert_eq!(rows[0].note, "note");
    }

    #[tokio::test]
    async fn recording_path_lookup() {
        let (db, _dir) = database().await;
        assert_eq!(db.recording_path(5).await.unwrap(), None);

        let id = db
            .insert_recording(&new_recording("clip", "url"))
            .await
            .unwrap();
        assert_eq!(
            db.recording_path(id).await.unwrap().as_deref(),
            Some("/tmp/clip.mp4")
        );
    }
}
