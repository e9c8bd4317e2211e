//! Spotdiff Match Archive
//!
//! This crate provides the finished-match summary record and the sink it
//! is flushed to.
//!
//! # Architecture
//!
//! - `MatchDraft`: accumulated across a session's life, stamped and
//!   finalized exactly once at teardown
//! - `MatchRecord`: the finalized, persistable summary
//! - `ArchiveSink`: the external store interface (persistence plus
//!   best-time rank queries)
//! - `MemoryArchive`: an in-process sink for tests and embedding
//!
//! Persistence internals (schema, retries) belong to sink
//! implementations; the session engine only hands over records and asks
//! for ranks.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotdiff_game::GameMode;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// Match Record
// ============================================================================

/// The summary of one finished session, flushed to the archive exactly
/// once at teardown. The record belongs to one seat: `is_player_one`
/// says which, and `has_abandoned` whether that seat left early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub game_title: String,
    pub started_at: DateTime<Utc>,
    /// Wall-clock seconds between session creation and teardown.
    pub playing_time_secs: u64,
    /// The session clock's value at teardown: elapsed seconds for
    /// classic, remaining seconds for timed.
    pub end_clock_secs: f64,
    pub mode: GameMode,
    pub player_one: String,
    pub player_two: Option<String>,
    pub is_player_one: bool,
    pub has_abandoned: bool,
}

impl MatchRecord {
    pub fn is_versus(&self) -> bool {
        self.player_two.is_some()
    }
}

// ============================================================================
// Match Draft
// ============================================================================

/// In-session accumulator for the eventual [`MatchRecord`].
///
/// Created when the session is built, mutated by abandons and wins, and
/// finalized by the teardown path. `finalize` is guarded: the first call
/// yields the record, every later call is a safe no-op.
#[derive(Debug)]
pub struct MatchDraft {
    game_title: String,
    mode: GameMode,
    started_at: DateTime<Utc>,
    started: Instant,
    player_one: String,
    player_two: Option<String>,
    is_player_one: bool,
    has_abandoned: bool,
    finalized: bool,
}

impl MatchDraft {
    pub fn new(
        game_title: impl Into<String>,
        mode: GameMode,
        player_one: impl Into<String>,
        player_two: Option<String>,
    ) -> Self {
        Self {
            game_title: game_title.into(),
            mode,
            started_at: Utc::now(),
            started: Instant::now(),
            player_one: player_one.into(),
            player_two,
            is_player_one: true,
            has_abandoned: false,
            finalized: false,
        }
    }

    pub fn title(&self) -> &str {
        &self.game_title
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Attribute the record to a seat (e.g. the winning player).
    pub fn attribute(&mut self, to_player_one: bool) {
        self.is_player_one = to_player_one;
    }

    /// Record that a seat abandoned the match. Attribution follows the
    /// abandoner.
    pub fn mark_abandoned(&mut self, by_player_one: bool) {
        self.has_abandoned = true;
        self.is_player_one = by_player_one;
    }

    pub fn has_abandoned(&self) -> bool {
        self.has_abandoned
    }

    /// Stamp playing time and the end-of-match clock, yielding the
    /// record. Returns `None` on every call after the first.
    pub fn finalize(&mut self, end_clock_secs: f64) -> Option<MatchRecord> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        Some(MatchRecord {
            game_title: self.game_title.clone(),
            started_at: self.started_at,
            playing_time_secs: self.started.elapsed().as_secs(),
            end_clock_secs,
            mode: self.mode,
            player_one: self.player_one.clone(),
            player_two: self.player_two.clone(),
            is_player_one: self.is_player_one,
            has_abandoned: self.has_abandoned,
        })
    }
}

// ============================================================================
// Archive Sink
// ============================================================================

/// Archive operation failure. Teardown is already complete when a flush
/// fails; callers log and move on, they never roll a session back.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArchiveError {
    #[error("archive rejected record: {0}")]
    Rejected(String),

    #[error("archive unavailable: {0}")]
    Unavailable(String),
}

/// Which leaderboard a classic best time competes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankScope {
    Solo,
    Versus,
}

/// How many best times a leaderboard tracks; ranks beyond this are not
/// reported.
pub const BEST_TIMES_TRACKED: usize = 10;

/// External store for finished matches.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Persist one finished-match record.
    async fn record_match(&self, record: MatchRecord) -> Result<(), ArchiveError>;

    /// 1-based rank `seconds` would take on the `title`/`scope` classic
    /// leaderboard, or `None` when it does not place among the tracked
    /// best times. Lower is better.
    async fn best_time_rank(
        &self,
        title: &str,
        scope: RankScope,
        seconds: u64,
    ) -> Result<Option<u32>, ArchiveError>;
}

// ============================================================================
// In-Memory Sink
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<MatchRecord>,
    /// Ascending best classic times per (title, scope), capped at
    /// [`BEST_TIMES_TRACKED`].
    best: HashMap<(String, RankScope), Vec<u64>>,
}

/// In-process archive. Classic records that ran to completion feed the
/// best-time tables; abandoned and timed records are stored but never
/// ranked.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    inner: Mutex<MemoryInner>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in arrival order.
    pub async fn records(&self) -> Vec<MatchRecord> {
        self.inner.lock().await.records.clone()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn record_match(&self, record: MatchRecord) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        if record.mode == GameMode::Classic && !record.has_abandoned {
            let scope = if record.is_versus() {
                RankScope::Versus
            } else {
                RankScope::Solo
            };
            let times = inner
                .best
                .entry((record.game_title.clone(), scope))
                .or_default();
            let secs = record.end_clock_secs as u64;
            let pos = times.partition_point(|&t| t <= secs);
            times.insert(pos, secs);
            times.truncate(BEST_TIMES_TRACKED);
        }
        inner.records.push(record);
        Ok(())
    }

    async fn best_time_rank(
        &self,
        title: &str,
        scope: RankScope,
        seconds: u64,
    ) -> Result<Option<u32>, ArchiveError> {
        let inner = self.inner.lock().await;
        let rank = match inner.best.get(&(title.to_string(), scope)) {
            Some(times) => times.partition_point(|&t| t <= seconds) + 1,
            None => 1,
        };
        if rank <= BEST_TIMES_TRACKED {
            Ok(Some(rank as u32))
        } else {
            Ok(None)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
