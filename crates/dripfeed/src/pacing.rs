//! ⏱️ pacing.rs — the part of the loader that knows how to wait.
//!
//! 🎬 *[the driver loop, eager, leaning forward]* "can we write more?"
//! *[the governor, unhurried, sipping something]* "not yet."
//!
//! The remote store sells throughput by the second. Blow past the
//! provisioned quota and it starts throwing writes back at you, which
//! is slower than never having sent them. So the governor converts the
//! quota (and the operator's rate multiplier) into sleeps, and the
//! whole pipeline — reads included — suspends on them. Throttling only
//! the write path would just move the traffic jam upstream.
//!
//! 🧠 Knowledge graph:
//! - **Per-item pacing** (single-item mode): schedule-based. Item N is
//!   not due before `start + N * msec_per_item`. Bursts may catch up
//!   to the schedule; they never get ahead of it.
//! - **Per-batch pacing** (batch mode): one portion ≈ one second of
//!   quota, so after a portion lands we sleep out the rest of its
//!   window, stretched by a 1.1 safety factor to stay strictly under.
//! - **Zero quota is fatal** at budget construction. 1000 / 0 is not a
//!   pace, it's a standstill with extra steps.
//!
//! 🦆 (the duck paces too, but only back and forth on the pond)

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::{self, Instant};
use tracing::trace;

/// 💰 The resolved write-throughput budget. Built once at startup from
/// the store's table description plus the operator's rate knob, then
/// never touched again. Immutable, like a quota should be.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThroughputBudget {
    /// Provisioned write capacity units per second, per DescribeTable.
    pub quota: u64,
    /// Operator's rate multiplier in percent. 100 = exactly the quota,
    /// 50 = half throttle, 200 = living dangerously on shared capacity.
    pub rate_percent: f64,
}

impl ThroughputBudget {
    pub(crate) fn new(quota: u64, rate_percent: f64) -> Result<Self> {
        if quota == 0 {
            // 💀 1000ms / 0 units = a sleep that never ends. The table
            // has no provisioned write capacity; nothing we send will
            // ever land. Better to say so now than to hang forever.
            bail!(
                "💀 The table reports a write capacity quota of 0 units/sec. \
                 Pacing against a zero quota means waiting forever, and the \
                 loader declines to start a job it can never finish."
            );
        }
        if rate_percent <= 0.0 {
            bail!(
                "💀 Rate multiplier must be positive, got {}%. A non-positive \
                 rate is either a typo or a cry for help.",
                rate_percent
            );
        }
        Ok(Self { quota, rate_percent })
    }

    /// Effective items/sec in single-item mode: `quota * rate/100`.
    fn effective_per_sec(&self) -> f64 {
        self.quota as f64 * (self.rate_percent / 100.0)
    }
}

/// 🚦 The pacing strategy, selected by write mode. One governor, two
/// gaits. Both block the whole driver on purpose — no input is read
/// during a pacing window, which is the entire point of the window.
#[derive(Debug)]
pub(crate) enum Pacer {
    PerItem(ItemPacer),
    PerBatch(BatchPacer),
}

impl Pacer {
    pub(crate) fn per_item(budget: ThroughputBudget) -> Self {
        Pacer::PerItem(ItemPacer::new(budget))
    }

    pub(crate) fn per_batch() -> Self {
        Pacer::PerBatch(BatchPacer::default())
    }

    /// ⏱️ Apply post-dispatch pacing. `items_done` is the cumulative
    /// item count for this run; `batch_elapsed` is how long the portion
    /// just dispatched spent in flight. Each strategy reads the one it
    /// cares about and politely ignores the other.
    pub(crate) async fn pace(&self, items_done: u64, batch_elapsed: Duration) {
        match self {
            Pacer::PerItem(p) => p.pace(items_done).await,
            Pacer::PerBatch(p) => p.pace(batch_elapsed).await,
        }
    }
}

/// 📐 Schedule-based per-item pacing.
///
/// `msec_per_item = 1000 / quota / (rate / 100)`. Item N is due at
/// `start + N * msec_per_item`; if we're ahead of that, sleep the
/// deficit. The long-run rate can never exceed `quota * rate/100`
/// items/sec, but a slow patch (network hiccup, big item) lets the
/// following writes run flat out until the schedule is caught.
#[derive(Debug)]
pub(crate) struct ItemPacer {
    started: Instant,
    msec_per_item: f64,
}

impl ItemPacer {
    fn new(budget: ThroughputBudget) -> Self {
        Self {
            started: Instant::now(),
            // budget.quota > 0 and rate > 0, enforced at construction,
            // so this division is safe and finite.
            msec_per_item: 1000.0 / budget.effective_per_sec(),
        }
    }

    async fn pace(&self, items_done: u64) {
        let due = self.started
            + Duration::from_secs_f64(self.msec_per_item * items_done as f64 / 1000.0);
        let now = Instant::now();
        if due > now {
            trace!("⏱️ ahead of schedule by {:?} — napping it off", due - now);
            time::sleep_until(due).await;
        }
        // Behind schedule: no sleep. Run flat out and catch up.
    }
}

/// 🛌 Per-batch pacing: one closed portion represents roughly one
/// second of quota, so after dispatch we sleep out the remainder of
/// that second. The 1.1 safety factor keeps sustained volume strictly
/// under quota even when our unit estimates flatter the payload.
#[derive(Debug)]
pub(crate) struct BatchPacer {
    window: Duration,
    safety: f64,
}

impl Default for BatchPacer {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            safety: 1.1,
        }
    }
}

impl BatchPacer {
    async fn pace(&self, elapsed: Duration) {
        if elapsed >= self.window {
            // The portion took its whole second (or more) on its own.
            // The quota already got its rest. Drive on.
            return;
        }
        let nap = (self.window - elapsed).mul_f64(self.safety);
        trace!("🛌 portion landed in {:?} — sleeping {:?} to honor the quota", elapsed, nap);
        time::sleep(nap).await;
    }
}
