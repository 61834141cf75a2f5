//! Shared test doubles for the reconciler pipeline
//!
//! Every double implements the production trait, so tests drive the real
//! orchestrator, runner and scheduler.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mtrack_common::events::EventBus;
use mtrack_rc::models::{
    CanonicalItem, CycleReport, MediaKind, RawAudiobook, RawItem, RawShelfLabel, RawTrack,
    WatermarkMode,
};
use mtrack_rc::services::{
    CycleOrchestrator, DisambiguationEngine, DisambiguationError, ReportError, Reporter,
};
use mtrack_rc::sources::{MediaSource, Snapshot, SourceCollector, SourceError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Records
// ============================================================================

pub fn audiobook(title: &str, author: &str, added: DateTime<Utc>) -> RawItem {
    RawItem::Audiobook(RawAudiobook {
        title: Some(title.to_string()),
        author: Some(author.to_string()),
        date_added: Some(added),
    })
}

pub fn track(name: &str, artist: &str, played: DateTime<Utc>) -> RawItem {
    RawItem::Track(RawTrack {
        track: Some(name.to_string()),
        artist: Some(artist.to_string()),
        played_at: Some(played),
    })
}

pub fn spine(title: &str) -> RawItem {
    RawItem::ShelfLabel(RawShelfLabel {
        title: title.to_string(),
        captured_at: Utc::now(),
    })
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

// ============================================================================
// Sources
// ============================================================================

/// Source whose snapshot and failure mode can change between cycles
pub struct StubSource {
    name: &'static str,
    kind: MediaKind,
    mode: WatermarkMode,
    items: Mutex<Vec<RawItem>>,
    failing: AtomicBool,
    pulls: AtomicUsize,
}

impl StubSource {
    pub fn new(name: &'static str, kind: MediaKind, items: Vec<RawItem>) -> Arc<Self> {
        let mode = match kind {
            MediaKind::PhysicalBook => WatermarkMode::SeenSet,
            _ => WatermarkMode::Scalar,
        };
        Arc::new(Self {
            name,
            kind,
            mode,
            items: Mutex::new(items),
            failing: AtomicBool::new(false),
            pulls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str, kind: MediaKind) -> Arc<Self> {
        let source = Self::new(name, kind, Vec::new());
        source.set_failing(true);
        source
    }

    pub fn set_items(&self, items: Vec<RawItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for StubSource {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn watermark_mode(&self) -> WatermarkMode {
        self.mode
    }

    async fn pull(&self) -> Result<Snapshot, SourceError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(match self.kind {
                MediaKind::PhysicalBook => SourceError::CaptureFailed("no frame decoded".to_string()),
                _ => SourceError::Network("connection refused".to_string()),
            });
        }
        Ok(Snapshot::new(self.items.lock().unwrap().clone(), Utc::now()))
    }
}

// ============================================================================
// Disambiguation engines
// ============================================================================

/// Engine behaviour for the next call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Return the input unchanged
    Echo,
    /// Fail with the given HTTP status
    Fail(u16),
    /// Keep only the first item with each title (case-insensitive)
    Dedup,
}

/// Engine recording every request it receives
pub struct StubEngine {
    mode: Mutex<EngineMode>,
    calls: Mutex<Vec<Vec<CanonicalItem>>>,
    instructions: Mutex<Vec<String>>,
}

impl StubEngine {
    pub fn new(mode: EngineMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(Vec::new()),
            instructions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: EngineMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> Vec<Vec<CanonicalItem>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisambiguationEngine for StubEngine {
    async fn disambiguate(
        &self,
        items: &[CanonicalItem],
        instruction: &str,
    ) -> Result<Vec<CanonicalItem>, DisambiguationError> {
        self.calls.lock().unwrap().push(items.to_vec());
        self.instructions.lock().unwrap().push(instruction.to_string());

        let mode = *self.mode.lock().unwrap();
        match mode {
            EngineMode::Echo => Ok(items.to_vec()),
            EngineMode::Fail(status) => Err(DisambiguationError::Status {
                status,
                body: "engine unavailable".to_string(),
            }),
            EngineMode::Dedup => {
                let mut seen = std::collections::HashSet::new();
                Ok(items
                    .iter()
                    .filter(|item| seen.insert(item.title.to_lowercase()))
                    .cloned()
                    .collect())
            }
        }
    }
}

/// Engine that waits for `release` before echoing
pub struct BlockingEngine {
    pub release: Arc<Notify>,
    pub entered: Arc<Notify>,
}

impl BlockingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            release: Arc::new(Notify::new()),
            entered: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl DisambiguationEngine for BlockingEngine {
    async fn disambiguate(
        &self,
        items: &[CanonicalItem],
        _instruction: &str,
    ) -> Result<Vec<CanonicalItem>, DisambiguationError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(items.to_vec())
    }
}

/// Engine that panics
pub struct PanickingEngine;

#[async_trait]
impl DisambiguationEngine for PanickingEngine {
    async fn disambiguate(
        &self,
        _items: &[CanonicalItem],
        _instruction: &str,
    ) -> Result<Vec<CanonicalItem>, DisambiguationError> {
        panic!("engine bug")
    }
}

// ============================================================================
// Reporters
// ============================================================================

/// Reporter recording every delivered report
pub struct RecordingReporter {
    reports: Mutex<Vec<CycleReport>>,
    failing: AtomicBool,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    /// Reporter that records the attempt and then reports a rejection
    pub fn failing() -> Arc<Self> {
        let reporter = Self::new();
        reporter.failing.store(true, Ordering::SeqCst);
        reporter
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn deliver(&self, report: &CycleReport) -> Result<(), ReportError> {
        self.reports.lock().unwrap().push(report.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReportError::Rejected {
                status: 503,
                body: "report endpoint down".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Assembly
// ============================================================================

pub fn orchestrator(
    sources: Vec<Arc<dyn MediaSource>>,
    engine: Arc<dyn DisambiguationEngine>,
    reporter: Arc<dyn Reporter>,
) -> Arc<CycleOrchestrator> {
    Arc::new(CycleOrchestrator::new(
        SourceCollector::new(sources),
        engine,
        reporter,
        EventBus::new(256),
    ))
}
