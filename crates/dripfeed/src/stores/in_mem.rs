//! # Previously, on Dripfeed...
//!
//! 🎬 The records needed somewhere to go. Somewhere without a network.
//! Somewhere without a region. Somewhere a test could look them in the
//! eye afterwards and ask: "did you really get written?"
//!
//! That somewhere is this module.
//!
//! `InMemoryStore` is a [`Store`] that keeps everything in a Vec behind
//! an `Arc<Mutex<...>>` and can be scripted to misbehave on command:
//! bounce N items as "unprocessed" on a given batch call, or throw a
//! hard error on the next write. Great for assertions, great for trust
//! issues, great for both.
//!
//! ⚠️ This is NOT for production. This is for tests and local dev. If
//! you restore a production table into a Vec, the Vec will not page
//! you when it drops. Nothing will. That's the problem.
//!
//! 🦆 (no network calls, no disk I/O, just vibes and heap memory)

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::record::Record;
use crate::stores::{Store, TableInfo};

/// 📦 A store that never forgets, because forgetting would fail the
/// assertion on line 40 of somebody's test.
///
/// Clone-able: every clone shares the same Vec, the same script, the
/// same counters. Hand one to the pipeline, keep one for yourself, and
/// interrogate it afterwards.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryStore {
    /// What DescribeTable will claim the write quota is.
    write_capacity_units: u64,
    /// 🔒 The vault. Everything successfully "written" lands here.
    pub(crate) items: Arc<Mutex<Vec<Record>>>,
    /// 🎭 The misbehavior script: for each upcoming batch_write call,
    /// how many trailing items to bounce as unprocessed. Runs out →
    /// everything lands. Scripted chaos is the only honest chaos.
    pub(crate) bounce_script: Arc<Mutex<VecDeque<usize>>>,
    /// 💀 When set, the next write (put or batch) fails hard with this
    /// message. Describes the table just fine though — even a broken
    /// store knows its own name.
    pub(crate) hard_error: Arc<Mutex<Option<String>>>,
    /// 📊 Call counters, for tests that count calls. Which is most of them.
    pub(crate) put_calls: Arc<AtomicU64>,
    pub(crate) batch_calls: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub(crate) fn with_quota(write_capacity_units: u64) -> Self {
        Self {
            write_capacity_units,
            items: Arc::new(Mutex::new(Vec::new())),
            bounce_script: Arc::new(Mutex::new(VecDeque::new())),
            hard_error: Arc::new(Mutex::new(None)),
            put_calls: Arc::new(AtomicU64::new(0)),
            batch_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 🎭 Script the next batch_write calls: entry N = how many items
    /// to bounce on call N. Consumed front to back.
    pub(crate) async fn script_bounces(&self, plan: impl IntoIterator<Item = usize>) {
        self.bounce_script.lock().await.extend(plan);
    }

    /// 💀 Arm the hard-error tripwire for the next write.
    pub(crate) async fn fail_next_write(&self, message: &str) {
        *self.hard_error.lock().await = Some(message.to_string());
    }

    async fn trip_hard_error(&self) -> Result<()> {
        if let Some(message) = self.hard_error.lock().await.take() {
            bail!("💀 in-memory store hard failure (scripted): {}", message);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn describe_table(&self, _table: &str) -> Result<TableInfo> {
        Ok(TableInfo { write_capacity_units: self.write_capacity_units })
    }

    async fn put_item(&self, _table: &str, record: &Record) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.trip_hard_error().await?;
        self.items.lock().await.push(record.clone());
        Ok(())
    }

    async fn batch_write(&self, _table: &str, records: &[Record]) -> Result<Vec<Record>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.trip_hard_error().await?;

        // 🎭 Consult the script: bounce the last N items of this call,
        // accept the rest. The real store picks victims less predictably,
        // but predictable victims make for provable tests.
        let bounce = self.bounce_script.lock().await.pop_front().unwrap_or(0);
        let bounce = bounce.min(records.len());
        let accepted = records.len() - bounce;

        self.items.lock().await.extend_from_slice(&records[..accepted]);
        Ok(records[accepted..].to_vec())
    }
}
