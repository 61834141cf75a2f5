//! End-to-end cycle behaviour with stub sources, engines and reporters

mod helpers;

use chrono::{Duration, Utc};
use helpers::*;
use mtrack_common::events::CycleEvent;
use mtrack_rc::models::{CycleState, MediaKind, Watermark, WatermarkMode, Watermarks};
use mtrack_rc::services::{CycleError, CycleStatus, DISAMBIGUATION_INSTRUCTION};
use mtrack_rc::sources::MediaSource;
use std::collections::BTreeSet;
use std::sync::Arc;

fn titles(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn test_end_to_end_single_new_audiobook() {
    let yesterday_midnight = (Utc::now() - Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();

    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![
            audiobook("Project Hail Mary", "Andy Weir", hours_ago(1)),
            audiobook("The Martian", "Andy Weir", hours_ago(48)),
        ],
    );
    let engine = StubEngine::new(EngineMode::Echo);
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(vec![books as Arc<dyn MediaSource>], engine.clone(), reporter.clone());

    let mut watermarks = Watermarks::new();
    watermarks.set(
        "audiobook",
        Watermark::Since {
            timestamp: yesterday_midnight,
        },
    );

    let outcome = orchestrator.run_cycle(watermarks).await;

    assert!(outcome.is_completed());
    let report = outcome.report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.new_items()[0].title, "Project Hail Mary");
    assert_eq!(report.new_items()[0].creator, "Andy Weir");
    assert_eq!(report.new_items()[0].kind, MediaKind::Audiobook);

    let delivered = reporter.reports();
    assert_eq!(delivered.len(), 1);
    assert_eq!(&delivered[0], report);

    assert_eq!(engine.calls().len(), 1);
    assert_eq!(engine.calls()[0].len(), 1);
}

#[tokio::test]
async fn test_partial_source_failure_is_isolated() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![
            audiobook("Book 1", "Author 1", hours_ago(2)),
            audiobook("Book 2", "Author 2", hours_ago(1)),
        ],
    );
    let music = StubSource::failing("music", MediaKind::Music);
    let engine = StubEngine::new(EngineMode::Echo);
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(
        vec![books as Arc<dyn MediaSource>, music as Arc<dyn MediaSource>],
        engine.clone(),
        reporter,
    );

    let music_before = Watermark::Since {
        timestamp: hours_ago(30),
    };
    let mut watermarks = Watermarks::new();
    watermarks.set("music", music_before.clone());

    let outcome = orchestrator.run_cycle(watermarks).await;

    assert!(outcome.session.visited(CycleState::Disambiguating));
    assert!(outcome.is_completed());
    assert_eq!(engine.calls()[0].len(), 2);
    assert_eq!(outcome.watermarks.get("music"), Some(&music_before));

    let music_stats = outcome
        .session
        .sources
        .iter()
        .find(|s| s.source == "music")
        .unwrap();
    assert!(music_stats.error.is_some());
}

#[tokio::test]
async fn test_disambiguation_failure_sends_nothing_and_keeps_window() {
    let added = hours_ago(1);
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Missed Book", "Author", added)],
    );
    let engine = StubEngine::new(EngineMode::Fail(500));
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(vec![books as Arc<dyn MediaSource>], engine.clone(), reporter.clone());

    let before = Watermark::Since {
        timestamp: hours_ago(24),
    };
    let mut watermarks = Watermarks::new();
    watermarks.set("audiobook", before.clone());

    let failed = orchestrator.run_cycle(watermarks).await;

    match &failed.status {
        CycleStatus::Failed { failed_in, error } => {
            assert_eq!(*failed_in, CycleState::Disambiguating);
            assert!(matches!(error, CycleError::Disambiguation(_)));
        }
        CycleStatus::Completed { .. } => panic!("cycle should have failed"),
    }
    assert!(reporter.reports().is_empty());
    assert_eq!(failed.watermarks.get("audiobook"), Some(&before));
    assert!(!failed.session.visited(CycleState::Reporting));
    assert!(!failed.session.visited(CycleState::Committing));

    // Next cycle sees the same window again
    engine.set_mode(EngineMode::Echo);
    let retried = orchestrator.run_cycle(failed.watermarks).await;

    assert!(retried.is_completed());
    let report = retried.report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.new_items()[0].title, "Missed Book");
    assert_eq!(reporter.reports().len(), 1);
}

#[tokio::test]
async fn test_completed_cycle_does_not_report_twice() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Once", "Author", hours_ago(1))],
    );
    let engine = StubEngine::new(EngineMode::Echo);
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(vec![books as Arc<dyn MediaSource>], engine, reporter.clone());

    let first = orchestrator.run_cycle(Watermarks::new()).await;
    assert_eq!(first.report().unwrap().len(), 1);

    let second = orchestrator.run_cycle(first.watermarks).await;
    assert!(second.is_completed());
    assert!(second.report().unwrap().is_empty());
}

#[tokio::test]
async fn test_scalar_watermark_is_monotonic_across_cycles() {
    let books = StubSource::new("audiobook", MediaKind::Audiobook, vec![]);
    let engine = StubEngine::new(EngineMode::Echo);
    let orchestrator = orchestrator(
        vec![books.clone() as Arc<dyn MediaSource>],
        engine,
        RecordingReporter::new(),
    );

    let mut watermarks = Watermarks::new();
    let mut previous = None;

    for hours in [5, 3, 10, 1] {
        // Provider hands back older items on some cycles
        books.set_items(vec![audiobook("Item", "Author", hours_ago(hours))]);
        let outcome = orchestrator.run_cycle(watermarks).await;
        watermarks = outcome.watermarks;

        let current = watermarks.get("audiobook").and_then(Watermark::timestamp).unwrap();
        if let Some(prev) = previous {
            assert!(current >= prev, "watermark moved backwards");
        }
        previous = Some(current);
    }
}

#[tokio::test]
async fn test_fresh_scalar_source_starts_one_day_back() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![
            audiobook("Recent", "Author", hours_ago(2)),
            audiobook("Ancient", "Author", hours_ago(72)),
        ],
    );
    let engine = StubEngine::new(EngineMode::Echo);
    let orchestrator = orchestrator(
        vec![books as Arc<dyn MediaSource>],
        engine.clone(),
        RecordingReporter::new(),
    );

    orchestrator.run_cycle(Watermarks::new()).await;

    let sent = &engine.calls()[0];
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Recent");
}

#[tokio::test]
async fn test_failed_capture_preserves_seen_set() {
    let shelf = StubSource::failing("shelf", MediaKind::PhysicalBook);
    let orchestrator = orchestrator(
        vec![shelf as Arc<dyn MediaSource>],
        StubEngine::new(EngineMode::Echo),
        RecordingReporter::new(),
    );

    let mut watermarks = Watermarks::new();
    watermarks.set(
        "shelf",
        Watermark::Seen {
            titles: titles(&["Dune", "Foundation"]),
        },
    );

    let outcome = orchestrator.run_cycle(watermarks).await;

    assert_eq!(
        outcome.watermarks.get("shelf").and_then(Watermark::seen),
        Some(&titles(&["Dune", "Foundation"]))
    );
}

#[tokio::test]
async fn test_empty_scan_preserves_seen_set() {
    let shelf = StubSource::new("shelf", MediaKind::PhysicalBook, vec![]);
    let orchestrator = orchestrator(
        vec![shelf as Arc<dyn MediaSource>],
        StubEngine::new(EngineMode::Echo),
        RecordingReporter::new(),
    );

    let mut watermarks = Watermarks::new();
    watermarks.set(
        "shelf",
        Watermark::Seen {
            titles: titles(&["Dune", "Foundation"]),
        },
    );

    let outcome = orchestrator.run_cycle(watermarks).await;

    assert!(outcome.report().unwrap().is_empty());
    assert_eq!(
        outcome.watermarks.get("shelf").and_then(Watermark::seen),
        Some(&titles(&["Dune", "Foundation"]))
    );
}

#[tokio::test]
async fn test_seen_set_replacement_reports_returning_book() {
    let shelf = StubSource::new("shelf", MediaKind::PhysicalBook, vec![spine("Dune")]);
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(
        vec![shelf.clone() as Arc<dyn MediaSource>],
        StubEngine::new(EngineMode::Echo),
        reporter.clone(),
    );

    let mut watermarks = Watermarks::new();
    watermarks.set(
        "shelf",
        Watermark::Seen {
            titles: titles(&["Dune", "Foundation"]),
        },
    );

    let first = orchestrator.run_cycle(watermarks).await;
    assert!(first.report().unwrap().is_empty());
    assert_eq!(
        first.watermarks.get("shelf").and_then(Watermark::seen),
        Some(&titles(&["Dune"]))
    );

    shelf.set_items(vec![spine("Foundation")]);
    let second = orchestrator.run_cycle(first.watermarks).await;

    let report = second.report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.new_items()[0].title, "Foundation");
    assert_eq!(report.new_items()[0].creator, "Unknown");
    assert_eq!(report.new_items()[0].kind, MediaKind::PhysicalBook);
}

#[tokio::test]
async fn test_seen_set_committed_when_disambiguation_fails() {
    let shelf = StubSource::new(
        "shelf",
        MediaKind::PhysicalBook,
        vec![spine("Dune"), spine("Foundation")],
    );
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Book", "Author", hours_ago(1))],
    );
    let engine = StubEngine::new(EngineMode::Fail(502));
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(
        vec![shelf as Arc<dyn MediaSource>, books as Arc<dyn MediaSource>],
        engine.clone(),
        reporter.clone(),
    );

    let failed = orchestrator.run_cycle(Watermarks::new()).await;
    assert!(!failed.is_completed());

    // The shelf was observed; re-running the scan does not report it again
    engine.set_mode(EngineMode::Echo);
    let next = orchestrator.run_cycle(failed.watermarks).await;

    let report = next.report().unwrap();
    let reported: Vec<_> = report.new_items().iter().map(|i| i.title.as_str()).collect();
    assert_eq!(reported, vec!["Book"]);
}

#[tokio::test]
async fn test_malformed_item_dropped_without_aborting() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![
            audiobook("Good", "Author", hours_ago(1)),
            audiobook("   ", "Author", hours_ago(1)),
            audiobook("No Author", "", hours_ago(1)),
        ],
    );
    let engine = StubEngine::new(EngineMode::Echo);
    let orchestrator = orchestrator(
        vec![books as Arc<dyn MediaSource>],
        engine.clone(),
        RecordingReporter::new(),
    );
    let mut rx = orchestrator.event_bus().subscribe();

    let outcome = orchestrator.run_cycle(Watermarks::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(engine.calls()[0].len(), 1);
    assert_eq!(outcome.session.sources[0].new, 3);
    assert_eq!(outcome.session.sources[0].dropped, 2);

    let mut dropped = 0;
    while let Ok(event) = rx.try_recv() {
        if let CycleEvent::ItemDropped { source, .. } = event {
            assert_eq!(source, "audiobook");
            dropped += 1;
        }
    }
    assert_eq!(dropped, 2);
}

#[tokio::test]
async fn test_report_delivery_failure_still_commits() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Book", "Author", hours_ago(1))],
    );
    let reporter = RecordingReporter::failing();
    let orchestrator = orchestrator(
        vec![books as Arc<dyn MediaSource>],
        StubEngine::new(EngineMode::Echo),
        reporter.clone(),
    );

    let before = hours_ago(24);
    let mut watermarks = Watermarks::new();
    watermarks.set("audiobook", Watermark::Since { timestamp: before });

    let outcome = orchestrator.run_cycle(watermarks).await;

    match &outcome.status {
        CycleStatus::Completed { delivery, .. } => assert!(delivery.is_err()),
        CycleStatus::Failed { .. } => panic!("delivery failure must not fail the cycle"),
    }
    assert!(outcome.session.succeeded());
    assert_eq!(outcome.session.delivered, Some(false));
    assert_eq!(reporter.reports().len(), 1);

    let after = outcome
        .watermarks
        .get("audiobook")
        .and_then(Watermark::timestamp)
        .unwrap();
    assert!(after > before);
}

#[tokio::test]
async fn test_engine_resolves_cross_source_duplicates() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Dune", "Frank Herbert", hours_ago(1))],
    );
    let shelf = StubSource::new("shelf", MediaKind::PhysicalBook, vec![spine("DUNE")]);
    let engine = StubEngine::new(EngineMode::Dedup);
    let orchestrator = orchestrator(
        vec![books as Arc<dyn MediaSource>, shelf as Arc<dyn MediaSource>],
        engine.clone(),
        RecordingReporter::new(),
    );

    let outcome = orchestrator.run_cycle(Watermarks::new()).await;

    assert_eq!(engine.calls()[0].len(), 2);
    let report = outcome.report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.new_items()[0].creator, "Frank Herbert");
}

#[tokio::test]
async fn test_engine_called_with_empty_union() {
    let books = StubSource::new("audiobook", MediaKind::Audiobook, vec![]);
    let engine = StubEngine::new(EngineMode::Echo);
    let reporter = RecordingReporter::new();
    let orchestrator = orchestrator(vec![books as Arc<dyn MediaSource>], engine.clone(), reporter.clone());

    let outcome = orchestrator.run_cycle(Watermarks::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(engine.calls(), vec![Vec::new()]);
    assert_eq!(engine.instructions()[0], DISAMBIGUATION_INSTRUCTION);
    assert_eq!(reporter.reports().len(), 1);
    assert!(reporter.reports()[0].is_empty());
}

#[tokio::test]
async fn test_new_sources_get_initial_watermarks() {
    let orchestrator = orchestrator(
        vec![
            StubSource::new("audiobook", MediaKind::Audiobook, vec![]) as Arc<dyn MediaSource>,
            StubSource::new("shelf", MediaKind::PhysicalBook, vec![]) as Arc<dyn MediaSource>,
        ],
        StubEngine::new(EngineMode::Fail(500)),
        RecordingReporter::new(),
    );

    let outcome = orchestrator.run_cycle(Watermarks::new()).await;

    assert_eq!(
        outcome.watermarks.get("audiobook").map(Watermark::mode),
        Some(WatermarkMode::Scalar)
    );
    assert_eq!(
        outcome.watermarks.get("shelf").and_then(Watermark::seen),
        Some(&BTreeSet::new())
    );
}

#[tokio::test]
async fn test_future_dated_record_does_not_push_watermark_ahead() {
    let books = StubSource::new(
        "audiobook",
        MediaKind::Audiobook,
        vec![audiobook("Mystery", "", Utc::now() + Duration::days(365))],
    );
    let orchestrator = orchestrator(
        vec![books.clone() as Arc<dyn MediaSource>],
        StubEngine::new(EngineMode::Echo),
        RecordingReporter::new(),
    );

    let first = orchestrator.run_cycle(Watermarks::new()).await;
    assert!(first.is_completed());
    assert_eq!(first.session.sources[0].dropped, 1);

    let committed = first
        .watermarks
        .get("audiobook")
        .and_then(Watermark::timestamp)
        .unwrap();
    assert!(committed <= Utc::now());

    books.set_items(vec![audiobook("Arrived Today", "Author", Utc::now())]);
    let second = orchestrator.run_cycle(first.watermarks).await;

    let reported: Vec<_> = second
        .report()
        .unwrap()
        .new_items()
        .iter()
        .map(|i| i.title.clone())
        .collect();
    assert_eq!(reported, vec!["Arrived Today".to_string()]);
}
