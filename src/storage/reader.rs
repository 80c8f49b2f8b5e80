//! Read connection pool for the query side.
//!
//! Uses r2d2 with r2d2_sqlite for pooled read access.
//! SQLite WAL mode lets readers run while the writer commits batches.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::apply_reader_pragmas;
use crate::model::{ImageSize, Run, Track, TrackIds, TrackPoint};

/// Error type for reader pool operations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Run {0} not found")]
    RunNotFound(i64),
}

/// Filters for [`ReaderPool::fetch_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackQuery {
    /// First frame to include.
    pub start: Option<i64>,
    /// Last frame to include.
    pub end: Option<i64>,
    /// Keep every `sample`-th point; 0 and 1 keep all.
    pub sample: usize,
}

impl Default for TrackQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            sample: 1,
        }
    }
}

/// Read connection pool over a detection database.
///
/// Connections are opened read-write but run with `query_only`, so they can
/// attach to a WAL database after the writer has checkpointed and exited.
#[derive(Clone)]
pub struct ReaderPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ReaderPool {
    /// Create a new reader pool for an existing database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn new<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<Self, ReaderError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ReaderConnectionCustomizer))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, ReaderError> {
        Ok(self.pool.get()?)
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<Run>, ReaderError> {
        let conn = self.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, started_at, frame_width, frame_height
             FROM runs ORDER BY run_id DESC",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok(Run {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    frame_width: row.get(2)?,
                    frame_height: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Distinct track ids of a run, ascending.
    pub fn list_tracks(&self, run_id: i64) -> Result<TrackIds, ReaderError> {
        let conn = self.get()?;
        run_image_size(&conn, run_id)?.ok_or(ReaderError::RunNotFound(run_id))?;

        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT track_id FROM detections WHERE run_id = ?1 ORDER BY track_id",
        )?;
        let track_ids = stmt
            .query_map([run_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(TrackIds { run_id, track_ids })
    }

    /// Boxes of one track in frame order, or `None` if it has no points in
    /// the requested range.
    pub fn fetch_track(
        &self,
        run_id: i64,
        track_id: i64,
        query: TrackQuery,
    ) -> Result<Option<Track>, ReaderError> {
        let conn = self.get()?;
        let image = run_image_size(&conn, run_id)?.ok_or(ReaderError::RunNotFound(run_id))?;

        let mut stmt = conn.prepare_cached(
            "SELECT frame_id, xmin, ymin, xmax, ymax
             FROM detections
             WHERE run_id = ?1 AND track_id = ?2
               AND (?3 IS NULL OR frame_id >= ?3)
               AND (?4 IS NULL OR frame_id <= ?4)
             ORDER BY frame_id, id",
        )?;
        let points = stmt
            .query_map(params![run_id, track_id, query.start, query.end], |row| {
                Ok(TrackPoint {
                    frame_id: row.get(0)?,
                    xmin: row.get(1)?,
                    ymin: row.get(2)?,
                    xmax: row.get(3)?,
                    ymax: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if points.is_empty() {
            return Ok(None);
        }

        let step = query.sample.max(1);
        let points = points.into_iter().step_by(step).collect();

        Ok(Some(Track {
            run_id,
            track_id,
            image,
            points,
        }))
    }

    /// Number of committed detections in a run.
    pub fn count_detections(&self, run_id: i64) -> Result<i64, ReaderError> {
        let conn = self.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM detections WHERE run_id = ?1",
            [run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for ReaderConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn)
    }
}

fn run_image_size(
    conn: &rusqlite::Connection,
    run_id: i64,
) -> Result<Option<ImageSize>, rusqlite::Error> {
    conn.query_row(
        "SELECT frame_width, frame_height FROM runs WHERE run_id = ?1",
        [run_id],
        |row| {
            Ok(ImageSize {
                w: row.get(0)?,
                h: row.get(1)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{
        apply_pragmas, begin_run, initialize_schema, record_frame, SCHEMA_SQL,
    };
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn seeded_db(temp_dir: &TempDir) -> (std::path::PathBuf, i64) {
        let db_path = temp_dir.path().join("test.db");
        let mut conn = Connection::open(&db_path).unwrap();
        apply_pragmas(&conn, Duration::from_secs(1)).unwrap();
        initialize_schema(&conn, SCHEMA_SQL).unwrap();
        let run_id = begin_run(&conn).unwrap();
        for frame_id in 1..=6 {
            record_frame(&mut conn, run_id, frame_id, 1920, 1080).unwrap();
        }
        for (track_id, frame_id) in [(2, 1), (2, 2), (2, 3), (2, 4), (2, 5), (2, 6), (1, 3)] {
            conn.execute(
                "INSERT INTO detections
                 (run_id, track_id, frame_id, class_name, confidence, xmin, ymin, xmax, ymax)
                 VALUES (?1, ?2, ?3, 'car', 0.7, ?4, 0, ?4 + 10, 10)",
                params![run_id, track_id, frame_id, frame_id as f64],
            )
            .unwrap();
        }
        (db_path, run_id)
    }

    #[test]
    fn test_reader_pool_creation() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, run_id) = seeded_db(&temp_dir);

        let pool = ReaderPool::new(&db_path, 5).unwrap();
        assert_eq!(pool.count_detections(run_id).unwrap(), 7);
    }

    #[test]
    fn test_reader_connections_are_query_only() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, _) = seeded_db(&temp_dir);

        let pool = ReaderPool::new(&db_path, 1).unwrap();
        let conn = pool.get().unwrap();
        assert!(conn.execute("DELETE FROM detections", []).is_err());
    }

    #[test]
    fn test_list_runs_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, run_id) = seeded_db(&temp_dir);
        let newer = {
            let conn = Connection::open(&db_path).unwrap();
            begin_run(&conn).unwrap()
        };

        let pool = ReaderPool::new(&db_path, 2).unwrap();
        let runs = pool.list_runs().unwrap();
        let ids: Vec<i64> = runs.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![newer, run_id]);
        assert_eq!(runs[1].frame_width, Some(1920));
        assert_eq!(runs[0].frame_width, None);
    }

    #[test]
    fn test_list_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, run_id) = seeded_db(&temp_dir);

        let pool = ReaderPool::new(&db_path, 2).unwrap();
        let tracks = pool.list_tracks(run_id).unwrap();
        assert_eq!(tracks.track_ids, vec![1, 2]);

        assert!(matches!(
            pool.list_tracks(run_id + 100),
            Err(ReaderError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_fetch_track_range_and_sample() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, run_id) = seeded_db(&temp_dir);
        let pool = ReaderPool::new(&db_path, 2).unwrap();

        let track = pool
            .fetch_track(run_id, 2, TrackQuery::default())
            .unwrap()
            .unwrap();
        let frames: Vec<i64> = track.points.iter().map(|p| p.frame_id).collect();
        assert_eq!(frames, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(track.image, ImageSize { w: Some(1920), h: Some(1080) });

        let query = TrackQuery {
            start: Some(2),
            end: Some(6),
            sample: 2,
        };
        let track = pool.fetch_track(run_id, 2, query).unwrap().unwrap();
        let frames: Vec<i64> = track.points.iter().map(|p| p.frame_id).collect();
        assert_eq!(frames, vec![2, 4, 6]);

        assert!(pool
            .fetch_track(run_id, 99, TrackQuery::default())
            .unwrap()
            .is_none());
    }
}
