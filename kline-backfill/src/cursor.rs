//! Backfill progress for one (symbol, resolution) pair.

use crate::{config::Resolution, kline::Kline};
use derive_more::Display;
use smol_str::SmolStr;

/// Terminal (and running) states of a single resolution's pagination loop.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ResolutionState {
    #[display("RUNNING")]
    Running,
    /// The cursor reached or passed the horizon.
    #[display("EXHAUSTED")]
    Exhausted,
    /// An empty page (end of history, or a tolerated fetch failure) arrived before the horizon.
    #[display("STOPPED_NO_DATA")]
    StoppedNoData,
    /// A fetch failure that the strict fetch policy refused to tolerate.
    #[display("FAILED")]
    Failed,
    #[display("CANCELLED")]
    Cancelled,
}

/// In-memory pointer into the timeline being backfilled.
///
/// Created when a resolution's loop starts and dropped when it exits. `horizon` is sampled once
/// at creation and never moves, so the loop terminates even if upstream keeps producing fresh
/// buckets while it runs.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BackfillCursor {
    pub symbol: SmolStr,
    pub resolution: Resolution,
    pub next_start: i64,
    pub horizon: i64,
    pub total_count: u64,
    last_reported: i64,
}

impl BackfillCursor {
    pub fn new(symbol: SmolStr, resolution: Resolution, start: i64, horizon: i64) -> Self {
        Self {
            symbol,
            resolution,
            next_start: start,
            horizon,
            total_count: 0,
            last_reported: start,
        }
    }

    /// Resume from a previously persisted position.
    pub fn resumed(
        symbol: SmolStr,
        resolution: Resolution,
        next_start: i64,
        total_count: u64,
        horizon: i64,
    ) -> Self {
        Self {
            total_count,
            ..Self::new(symbol, resolution, next_start, horizon)
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_start >= self.horizon
    }

    /// Record a persisted, non-empty page and move past its last bucket.
    ///
    /// The cursor always moves strictly forward, even if upstream returns a page whose last
    /// `close_time` does not advance past the current position.
    pub fn advance(&mut self, page: &[Kline]) {
        let Some(last) = page.last() else {
            return;
        };

        self.total_count += page.len() as u64;

        let next_start = last.close_time.saturating_add(1);
        if next_start <= self.next_start {
            tracing::warn!(
                symbol = %self.symbol,
                resolution = %self.resolution,
                next_start = self.next_start,
                last_close_time = last.close_time,
                "upstream page did not advance the cursor, forcing progress"
            );
            self.next_start = self.next_start.saturating_add(1);
        } else {
            self.next_start = next_start;
        }
    }

    /// Returns `true` (and re-arms) once the cursor moved more than `threshold_ms` since the
    /// last report.
    pub fn take_progress(&mut self, threshold_ms: i64) -> bool {
        if self.next_start.saturating_sub(self.last_reported) > threshold_ms {
            self.last_reported = self.next_start;
            true
        } else {
            false
        }
    }
}
