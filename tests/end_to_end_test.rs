//! End-to-end scenario: one run, one frame, one detection, then the read side.

mod common;

use common::TestFixture;
use std::time::Duration;
use trackstore::model::Detection;
use trackstore::storage::{ReaderPool, TrackQuery};

fn car() -> Detection {
    Detection {
        track_id: 1,
        frame_id: 1,
        class_name: "car".to_string(),
        confidence: 0.7,
        xmin: 100.0,
        ymin: 100.0,
        xmax: 300.0,
        ymax: 300.0,
    }
}

#[test]
fn test_single_detection_round_trip() {
    let fixture = TestFixture::new();
    let store = fixture.open(200, Duration::from_millis(250));
    let run_id = store.run_id();

    store.record_frame(1, 1920, 1080).unwrap();
    store.enqueue_detection(car()).unwrap();
    store.close().unwrap();

    let conn = fixture.connection();
    assert_eq!(fixture.count("runs"), 1);
    assert_eq!(fixture.count("frames"), 1);
    assert_eq!(fixture.count("detections"), 1);

    let (frame_width, frame_height): (i64, i64) = conn
        .query_row(
            "SELECT frame_width, frame_height FROM runs WHERE run_id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((frame_width, frame_height), (1920, 1080));

    let (frame_run, width, height): (i64, i64, i64) = conn
        .query_row(
            "SELECT run_id, width, height FROM frames WHERE frame_id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((frame_run, width, height), (run_id, 1920, 1080));

    let row: (i64, i64, i64, String, f64, f64, f64, f64, f64) = conn
        .query_row(
            "SELECT run_id, track_id, frame_id, class_name, confidence, xmin, ymin, xmax, ymax
             FROM detections",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            },
        )
        .unwrap();
    assert_eq!(
        row,
        (run_id, 1, 1, "car".to_string(), 0.7, 100.0, 100.0, 300.0, 300.0)
    );
}

#[test]
fn test_reader_sees_closed_run() {
    let fixture = TestFixture::new();
    let store = fixture.open(200, Duration::from_millis(250));
    let run_id = store.run_id();
    store.record_frame(1, 1920, 1080).unwrap();
    store.enqueue_detection(car()).unwrap();
    store.close().unwrap();

    let pool = ReaderPool::new(&fixture.db_path, 2).unwrap();

    let runs = pool.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, run_id);
    assert_eq!(runs[0].frame_width, Some(1920));

    assert_eq!(pool.list_tracks(run_id).unwrap().track_ids, vec![1]);

    let track = pool
        .fetch_track(run_id, 1, TrackQuery::default())
        .unwrap()
        .unwrap();
    assert_eq!(track.points.len(), 1);
    assert_eq!(track.points[0].xmax, 300.0);
    assert_eq!(track.image.w, Some(1920));
    assert_eq!(track.image.h, Some(1080));
}

#[test]
fn test_reader_runs_alongside_writer() {
    let fixture = TestFixture::new();
    let store = fixture.open(10, Duration::from_millis(20));
    common::record_frames(&store, 30);
    let pool = ReaderPool::new(&fixture.db_path, 2).unwrap();

    for frame_id in 1..=30 {
        store
            .enqueue_detection(common::detection(5, frame_id))
            .unwrap();
    }
    assert!(common::wait_for(Duration::from_secs(3), || {
        pool.count_detections(store.run_id()).unwrap() == 30
    }));

    store.close().unwrap();
}
