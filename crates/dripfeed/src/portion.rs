//! 🧺 portion.rs — where records wait for the bus together.
//!
//! 🎬 *[a record arrives at the stop. the builder checks its ticket,
//! weighs its luggage, and points at the bench.]*
//!
//! The portion builder groups decoded records into write units bounded
//! two ways: by accumulated write-capacity units (the quota) and by a
//! hard item count (the store's batch API refuses more than 25 items
//! per request, and it will tell you so in its least helpful voice).
//!
//! 🧠 Knowledge graph:
//! - **Close conditions**: units ≥ quota, OR item count = 25. Whichever
//!   fires first. It's a race between two integers. Riveting.
//! - **Oversize ceiling**: in batch mode, any single attribute ≥ 400
//!   units (400 KiB) fails the RUN, immediately, before any write for
//!   that portion. The batch API caps items at 400 KB; discovering that
//!   mid-flight costs you a half-written portion. We discover it here.
//! - **Final flush**: end-of-input hands over whatever's pending, even
//!   under quota. The last bus of the night takes everyone.
//!
//! 🦆 (the duck is also waiting for the bus. the duck has exact change.)

use anyhow::{Result, bail};

use crate::record::Record;

/// 📏 The batch-write API's hard ceiling on items per request.
pub(crate) const BATCH_MAX_ITEMS: usize = 25;

/// ⚠️ Per-attribute size ceiling for batch mode, in write units.
/// 400 units × 1 KiB = the store's 400 KB item limit. An attribute at
/// or past this line cannot ride the batch API at all.
pub(crate) const OVERSIZE_CEILING_UNITS: usize = 400;

/// 🧺 A closed portion: an ordered group of records dispatched together
/// to approximate quota-paced writing. Never empty. The builder makes
/// sure of that, and the tests make sure of the builder.
#[derive(Debug, Clone)]
pub(crate) struct Portion {
    pub records: Vec<Record>,
    /// 📊 Total write units in this portion — what this batch will
    /// drain from the second's quota when it lands.
    pub units: usize,
}

impl Portion {
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

/// 🏗️ Accumulates records into the pending portion and closes it when
/// a bound is hit. One builder, one pending portion at a time — the
/// driver never assembles portion N+1 while N is in flight, which is
/// exactly why the quota math stays simple enough to trust.
#[derive(Debug)]
pub(crate) struct PortionBuilder {
    /// Write-capacity quota: the unit budget that closes a portion.
    quota: u64,
    /// Batch mode enables the per-item oversize ceiling.
    batch_mode: bool,
    pending: Vec<Record>,
    units: usize,
}

impl PortionBuilder {
    pub(crate) fn new(quota: u64, batch_mode: bool) -> Self {
        Self {
            quota,
            batch_mode,
            pending: Vec::new(),
            units: 0,
        }
    }

    /// 📥 Add one record to the pending portion.
    ///
    /// Returns `Ok(Some(portion))` when this record closed the portion
    /// (units reached quota, or the item cap was hit), `Ok(None)` when
    /// the portion is still filling, and `Err` when batch mode meets an
    /// attribute too large for the batch API — in which case nothing is
    /// flushed and the run is over. No partial flush. No "we'll deal
    /// with it later". Later is where data loss lives.
    pub(crate) fn push(&mut self, record: Record) -> Result<Option<Portion>> {
        if self.batch_mode && record.largest_attr_units >= OVERSIZE_CEILING_UNITS {
            // 💀 This item cannot use the batch API. Found out now, at
            // assembly time, before a single write call — not 12
            // portions deep with half a batch already landed.
            bail!(
                "💀 Oversized item: an attribute weighs {} KB and the batch API caps \
                 items at {} KB. Batch processing cannot carry this record. Re-run \
                 without batch mode, or slim the item down.",
                record.largest_attr_units,
                OVERSIZE_CEILING_UNITS
            );
        }

        self.units += record.units;
        self.pending.push(record);

        if self.units as u64 >= self.quota || self.pending.len() >= BATCH_MAX_ITEMS {
            return Ok(Some(self.close()));
        }
        Ok(None)
    }

    /// 🧹 End-of-input flush: hand over the final, possibly under-quota
    /// portion. `None` if the pending portion is empty — an empty
    /// portion is never emitted, not even as a farewell.
    pub(crate) fn take_final(&mut self) -> Option<Portion> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.close())
    }

    fn close(&mut self) -> Portion {
        let portion = Portion {
            records: std::mem::take(&mut self.pending),
            units: self.units,
        };
        // 🗑️ Zero the running total. Fresh portion, fresh budget.
        self.units = 0;
        portion
    }
}
