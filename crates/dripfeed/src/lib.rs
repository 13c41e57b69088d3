//! 💧 dripfeed — replays a table export into a capacity-constrained
//! key-value store without blowing the throughput budget.
//!
//! 🎬 *[40 million lines of NDJSON stare at a table with 25 write
//! units per second. somebody has to negotiate.]*
//!
//! The pipeline, end to end: read the export a line at a time, decode
//! each line into a tagged record, group records into quota-sized
//! portions, write each portion (per-item puts or the 25-item batch
//! API), then sleep exactly long enough that the store never sees more
//! than its provisioned write capacity. Crash mid-run? The skip knob
//! resumes from any line count. That's the whole product. It is a
//! faucet with opinions.
//!
//! The public surface is deliberately tiny: [`AppConfig`] in,
//! [`run`] does the thing, [`RunSummary`] out. Everything between is
//! crate-private plumbing and intends to stay that way.

pub mod app_config;
pub mod record;

mod driver;
mod executor;
mod pacing;
mod portion;
mod progress;
mod stores;

use anyhow::{Context, Result};
use tracing::info;

pub use app_config::{AppConfig, StoreConfig, load_config};
pub use progress::RunSummary;

use stores::{DynamoStore, StoreBackend};

/// 🚀 Run one restore against the configured endpoint, start to finish.
///
/// Validates the config, builds the wire client, replays the file, and
/// returns the final tally. Any error — bad config, missing table,
/// malformed line, store failure past the retry budget — ends the run
/// right there and comes back up this chain with its context attached.
pub async fn run(config: AppConfig) -> Result<RunSummary> {
    config
        .validate()
        .context("💀 The configuration did not survive validation. Nothing was written; nothing was even attempted.")?;

    let store = StoreBackend::Dynamo(DynamoStore::new(&config.store)?);
    let summary = driver::restore(config, store).await?;

    info!(
        "✅ Restore complete. Items written: {}. Portions: {}. Lines skipped: {}.",
        summary.items_written, summary.portions_done, summary.skipped
    );
    Ok(summary)
}
