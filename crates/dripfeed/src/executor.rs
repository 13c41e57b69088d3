//! 🚚 executor.rs — the part that actually ships the records.
//!
//! 🎬 *[a portion of 25 records stands at the loading dock. the
//! executor checks the manifest. somewhere, a quota ticks.]*
//!
//! Two strategies, selected once at startup:
//!
//! - **Single-item**: one PutItem per record, fired concurrently with
//!   fan-out equal to the portion size. PutItem is atomic per item, so
//!   there is no partial-success bookkeeping — every item lands or the
//!   first error aborts the run.
//! - **Batched**: the portion is split into chunks of ≤ 25 and each
//!   chunk goes out as one BatchWriteItem. Chunks fly concurrently;
//!   within one chunk, unprocessed-item resubmissions are strictly
//!   sequential, because each retry is built from the previous reply.
//!
//! 🧠 Knowledge graph:
//! - **Partial failure is not an error.** The store bouncing items for
//!   throughput reasons is weather, not fault. We resubmit only the
//!   bounced subset, with exponential backoff between attempts.
//! - **But the weather can't last forever.** Resubmissions are capped
//!   at [`MAX_UNPROCESSED_RETRIES`]; past that, the partial failure is
//!   promoted to a hard error and the run stops. An unbounded retry
//!   loop against a throttling store is just a heater.
//! - **Hard errors propagate immediately.** No retry, no softening.
//!   The driver halts, the process exits non-zero, the operator reads
//!   the chain.
//!
//! 🦆 (the duck signed for the delivery. the duck signs for everything.)

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::future::try_join_all;
use tokio::time;
use tracing::debug;

use crate::portion::{BATCH_MAX_ITEMS, Portion};
use crate::record::Record;
use crate::stores::{Store, StoreBackend};

/// 🔁 How many times one chunk's unprocessed subset may be resubmitted
/// before the partial failure is promoted to a hard error.
pub(crate) const MAX_UNPROCESSED_RETRIES: u32 = 5;

/// 🛌 First backoff before a resubmission; doubles per attempt.
/// 100, 200, 400, 800, 1600 ms — about 3 seconds of patience total,
/// which is plenty for a throughput blip and pointless for an outage.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// ✍️ Which write API carries the portions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    SingleItem,
    Batched,
}

/// 🚚 Dispatches portions against the store. Owns the store handle and
/// the table name; owns no other state — the executor remembers
/// nothing between portions, by design. Counting is the progress
/// tracker's job.
#[derive(Debug)]
pub(crate) struct WriteExecutor {
    store: StoreBackend,
    table: String,
    mode: WriteMode,
}

impl WriteExecutor {
    pub(crate) fn new(store: StoreBackend, table: String, mode: WriteMode) -> Self {
        Self { store, table, mode }
    }

    /// 📦 Write one portion, whole. Returns only when every record in
    /// the portion has landed, or with the error that stopped the run.
    pub(crate) async fn dispatch(&self, portion: &Portion) -> Result<()> {
        match self.mode {
            WriteMode::SingleItem => self.put_each(portion).await,
            WriteMode::Batched => self.batch_chunks(portion).await,
        }
    }

    /// 📥 Single-item strategy: every record gets its own PutItem, all
    /// in flight at once, fan-out bounded by the portion size (≤ 25 by
    /// construction). The driver awaits the whole portion before
    /// reading further input, so at most one portion's worth of writes
    /// exists at any moment.
    async fn put_each(&self, portion: &Portion) -> Result<()> {
        try_join_all(
            portion
                .records
                .iter()
                .map(|record| self.store.put_item(&self.table, record)),
        )
        .await
        .context("💀 A PutItem in this portion failed. PutItem is atomic per record, so the others either landed or were cancelled mid-flight — but the run is over either way. The error below names the reason.")?;
        Ok(())
    }

    /// 📦 Batched strategy: chunk to the API limit, fire the chunks
    /// concurrently, and let each chunk run its own resubmission loop.
    async fn batch_chunks(&self, portion: &Portion) -> Result<()> {
        try_join_all(
            portion
                .records
                .chunks(BATCH_MAX_ITEMS)
                .map(|chunk| self.write_chunk(chunk)),
        )
        .await?;
        Ok(())
    }

    /// 🔁 One chunk, to completion: batch-write, resubmit whatever the
    /// store bounced, repeat — sequentially, since every retry is the
    /// previous reply's leftovers — until the bounce list is empty or
    /// the attempt cap promotes the throttling to a hard error.
    async fn write_chunk(&self, chunk: &[Record]) -> Result<()> {
        let mut pending = chunk.to_vec();
        let mut resubmissions = 0u32;

        loop {
            let bounced = self
                .store
                .batch_write(&self.table, &pending)
                .await
                .context("💀 BatchWriteItem returned a hard error. Not throttling, not unprocessed items — a real failure. The run stops; the resubmission loop does not outlive a hard error.")?;

            if bounced.is_empty() {
                return Ok(());
            }

            resubmissions += 1;
            if resubmissions > MAX_UNPROCESSED_RETRIES {
                // 💀 Still bouncing after every allowance. The store is
                // not merely busy; something is structurally wrong
                // (quota slashed mid-run, hot partition, table on fire).
                bail!(
                    "💀 {} items were still unprocessed after {} resubmissions with \
                     backoff. The store has been throttling this chunk for the whole \
                     retry budget — resubmitting harder will not help. Check the \
                     table's capacity, then resume with --skip.",
                    bounced.len(),
                    MAX_UNPROCESSED_RETRIES
                );
            }

            let backoff = RETRY_BACKOFF_BASE * 2u32.pow(resubmissions - 1);
            debug!(
                "🔁 resubmission {}/{}: {} items bounced, backing off {:?}",
                resubmissions,
                MAX_UNPROCESSED_RETRIES,
                bounced.len(),
                backoff
            );
            time::sleep(backoff).await;
            pending = bounced;
        }
    }
}
