//! 🔌 stores.rs — where the real I/O happens.
//!
//! 🎭 This module is the casting agency for remote key-value stores.
//! Need to write to a DynamoDB-compatible endpoint? We've got a store
//! for that. Need a store that lives entirely in RAM and exists to be
//! interrogated by tests? We've got that too, and it has opinions.
//!
//! # Contract
//! The loader needs exactly three things from a store, and not one
//! thing more:
//! - `describe_table` — what's the write quota? (asked once, at startup)
//! - `put_item` — write one record, atomically. ok or error.
//! - `batch_write` — write up to 25 records; hand back the ones the
//!   store couldn't stomach this second (the "unprocessed" subset),
//!   which is a partial failure, not an error. Errors are errors.
//!
//! Table administration (creation, capacity changes) is explicitly not
//! here. We fill tables. We do not build them.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::record::Record;

pub(crate) mod dynamo;
pub(crate) mod in_mem;

pub(crate) use dynamo::DynamoStore;
pub(crate) use in_mem::InMemoryStore;

/// 📋 What DescribeTable tells us and all we care to hear: the
/// provisioned write throughput. The rest of the table description can
/// keep its secrets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TableInfo {
    pub write_capacity_units: u64,
}

/// 🚰 The remote store, as seen by the loader.
///
/// `&self` everywhere: the client handle is one long-lived, stateless
/// thing shared across every concurrent write in a portion. No locks,
/// no interior mutability gymnastics — the only mutable state in this
/// program belongs to the driver, and the driver shares with no one.
#[async_trait]
pub(crate) trait Store: std::fmt::Debug {
    /// 📏 Fetch the table's provisioned write capacity. Missing table
    /// is a hard error — there is nothing to restore into.
    async fn describe_table(&self, table: &str) -> Result<TableInfo>;

    /// 📥 Write one record. Atomic per item: it lands or it errors.
    async fn put_item(&self, table: &str, record: &Record) -> Result<()>;

    /// 📦 Write up to 25 records in one call. Returns the unprocessed
    /// subset — records the store bounced for throughput reasons and
    /// expects us to resubmit. Empty vec = everything landed.
    async fn batch_write(&self, table: &str, records: &[Record]) -> Result<Vec<Record>>;
}

/// 🎭 The many faces of a Store. Enum dispatch so the executor never
/// needs to know (or care) whether it's talking to a real endpoint or
/// a Vec in a trench coat.
#[derive(Debug)]
pub(crate) enum StoreBackend {
    Dynamo(DynamoStore),
    InMemory(InMemoryStore),
}

#[async_trait]
impl Store for StoreBackend {
    async fn describe_table(&self, table: &str) -> Result<TableInfo> {
        match self {
            StoreBackend::Dynamo(s) => s.describe_table(table).await,
            StoreBackend::InMemory(s) => s.describe_table(table).await,
        }
    }

    async fn put_item(&self, table: &str, record: &Record) -> Result<()> {
        match self {
            StoreBackend::Dynamo(s) => s.put_item(table, record).await,
            StoreBackend::InMemory(s) => s.put_item(table, record).await,
        }
    }

    async fn batch_write(&self, table: &str, records: &[Record]) -> Result<Vec<Record>> {
        match self {
            StoreBackend::Dynamo(s) => s.batch_write(table, records).await,
            StoreBackend::InMemory(s) => s.batch_write(table, records).await,
        }
    }
}
