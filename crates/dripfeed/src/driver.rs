//! 🎬 driver.rs — the one loop to rule them all.
//!
//! *[INT. THE PIPELINE — line 1 of 40,000,000]*
//!
//! The driver reads the export one line at a time and walks each line
//! through the stations: skip check → decoder → portion builder →
//! executor → progress → governor. Strictly sequential, on purpose:
//! exactly one portion is ever being assembled or dispatched, which is
//! what keeps the quota arithmetic honest enough to bet a production
//! table on. The only concurrency in the whole program is the fan-out
//! *inside* one portion's dispatch, and the driver waits for all of it
//! before reading another byte.
//!
//! 🧠 Knowledge graph:
//! - **Pacing suspends everything.** The governor's sleep happens on
//!   this task, so no input is consumed during a pacing window. That's
//!   not an accident, that's the feature.
//! - **Skip is cheap.** Skipped lines are counted, not decoded. A
//!   resume with skip=2,000,000 costs line iteration, not JSON parsing.
//! - **First fatal error ends the run.** No cooperative cancellation
//!   ceremony — in-flight writes finish or fail on their own, the
//!   error propagates, the process exits non-zero.
//!
//! 🦆 (the duck rides shotgun. the duck does not touch the wheel.)

use std::io::Read as _;
use std::pin::Pin;
use std::task::Poll;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::executor::{WriteExecutor, WriteMode};
use crate::pacing::{Pacer, ThroughputBudget};
use crate::portion::{Portion, PortionBuilder};
use crate::progress::{RunProgress, RunSummary};
use crate::record::decode_line;
use crate::stores::{Store, StoreBackend};

/// 📂 The export file, opened for line-by-line consumption. A `.gz`
/// suffix gets transparent decompression — exports are large and
/// bytes are squishy.
struct InputSource {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    /// Bytes we expect to read, for the progress bar: the file size for
    /// plain input, 0 ("unknown") for gzip, whose inflated size nobody
    /// knows until it's over.
    size_bytes: u64,
}

impl InputSource {
    async fn open(path: &str) -> Result<Self> {
        if path.ends_with(".gz") {
            // Fail here, with a name, rather than as a bare io::Error
            // bubbling out of the decompression thread's first read.
            tokio::fs::metadata(path).await.with_context(|| {
                format!("💀 Could not open '{}'. We knocked. We pleaded. The file remained unopened.", path)
            })?;

            // 🫁 Decompression streams through a bounded channel from a
            // blocking thread — a few chunks in flight, never the whole
            // inflated export. A 40-million-line dump does not fit in
            // anyone's RAM budget, compressed or otherwise.
            //
            // The inflated size is unknowable up front, so the bar
            // flies blind (0 = "no idea"). It copes.
            return Ok(Self {
                reader: BufReader::new(Box::new(GzChunkReader::spawn(path.to_string()))),
                size_bytes: 0,
            });
        }

        let file = File::open(path).await.with_context(|| {
            format!(
                "💀 The export file '{}' would not open. We checked if it existed \
                 (it might not). We checked permissions (they might be wrong). \
                 The restore cannot start without its input.",
                path
            )
        })?;
        // If metadata fails we fly blind (0 = unknown). The bar copes.
        let size_bytes = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            reader: BufReader::new(Box::new(file)),
            size_bytes,
        })
    }

    /// 📖 Append the next line into `buf`. Returns bytes read; 0 = EOF,
    /// the file has been consumed, like a bag of chips at midnight.
    async fn next_line(&mut self, buf: &mut String) -> Result<usize> {
        self.reader
            .read_line(buf)
            .await
            .context("💀 Reading the export mid-file failed. The disk blinked, the gzip stream is corrupt, or the line is not valid UTF-8. Either way the input can no longer be trusted.")
    }
}

/// 📏 Chunk size for the decompression channel. Big enough to amortize
/// the channel hop, small enough that DEPTH of them in flight is
/// pocket change.
const GZ_CHUNK_BYTES: usize = 64 * 1024;
const GZ_CHANNEL_DEPTH: usize = 4;

/// 🫁 An [`AsyncRead`] over a gzip file, inflated chunk by chunk on a
/// blocking thread and handed across a bounded channel. Backpressure
/// comes free: when the driver is parked in a pacing sleep, the channel
/// fills and the decompressor thread blocks on send. Peak memory is
/// `GZ_CHUNK_BYTES * (GZ_CHANNEL_DEPTH + 1)` no matter how large the
/// export is.
struct GzChunkReader {
    chunks: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
}

impl GzChunkReader {
    fn spawn(path: String) -> Self {
        let (tx, rx) = mpsc::channel(GZ_CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || {
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    return;
                }
            };
            // MultiGzDecoder: concatenated gzip members are one stream,
            // the way gzip-appended exports actually arrive.
            let mut decoder =
                flate2::bufread::MultiGzDecoder::new(std::io::BufReader::new(file));
            loop {
                let mut chunk = vec![0u8; GZ_CHUNK_BYTES];
                match decoder.read(&mut chunk) {
                    // EOF. Dropping tx closes the channel, which the
                    // reader reads as end-of-file. Clean exit.
                    Ok(0) => return,
                    Ok(n) => {
                        chunk.truncate(n);
                        if tx.blocking_send(Ok(chunk)).is_err() {
                            // Reader hung up (run aborted). Stop inflating.
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.blocking_send(Err(err));
                        return;
                    }
                }
            }
        });
        Self { chunks: rx, current: Vec::new(), offset: 0 }
    }
}

impl AsyncRead for GzChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.offset < this.current.len() {
                let take = (this.current.len() - this.offset).min(buf.remaining());
                buf.put_slice(&this.current[this.offset..this.offset + take]);
                this.offset += take;
                return Poll::Ready(Ok(()));
            }
            match this.chunks.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.current = chunk;
                    this.offset = 0;
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                // Channel closed = decompressor finished = EOF.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// 🚀 Run one restore: resolve the quota, replay the file, flush the
/// stragglers, return the tally.
///
/// Takes the store by value so tests can hand in the in-memory double
/// and production can hand in the wire client; the driver can't tell
/// the difference and has no desire to learn.
pub(crate) async fn restore(config: AppConfig, store: StoreBackend) -> Result<RunSummary> {
    // 📏 Quota first: the whole pacing scheme hangs off this number,
    // and a missing table should fail before we touch the input file.
    let table_info = store.describe_table(&config.table).await?;
    let budget = ThroughputBudget::new(table_info.write_capacity_units, config.rate)?;

    let mut input = InputSource::open(&config.filename).await?;

    info!(
        "🚀 Restoring table {} from file {}. Write capacity quota: {}",
        config.table, config.filename, budget.quota
    );
    if config.skip > 0 {
        info!("⏭️ Skipping {} rows...", config.skip);
    }

    let mode = if config.batch { WriteMode::Batched } else { WriteMode::SingleItem };
    let pacer = match mode {
        // Per-item scheduling for puts; per-batch window sleeps for the
        // batch API. One governor, picked once, never second-guessed.
        WriteMode::SingleItem => Pacer::per_item(budget),
        WriteMode::Batched => Pacer::per_batch(),
    };
    let executor = WriteExecutor::new(store, config.table.clone(), mode);
    let mut builder = PortionBuilder::new(budget.quota, config.batch);
    let mut progress = RunProgress::new(budget.quota, config.report_every, input.size_bytes);

    let mut line = String::with_capacity(4 * 1024);
    let mut line_number = 0u64;
    let mut portion_bytes = 0u64;

    loop {
        line.clear();
        let bytes_read = input.next_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }
        line_number += 1;

        // ⏭️ Resume fast path: count, don't decode. The lines were
        // written by a previous run; their JSON is not our problem.
        // Their bytes still count toward the bar, though — a resumed
        // run starts the bar where the crashed run left off.
        if progress.skipped() < config.skip {
            progress.skip_line(bytes_read as u64);
            continue;
        }

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            // Exports end with a trailing newline; a blank line is not
            // a record and not worth dying over.
            continue;
        }

        portion_bytes += bytes_read as u64;
        let record = decode_line(trimmed)
            .with_context(|| format!("💀 Line {} of '{}' would not decode. The run stops here — a malformed export line means the file is not what anyone thought it was.", line_number, config.filename))?;

        if let Some(portion) = builder.push(record)? {
            dispatch_portion(&executor, &pacer, &mut progress, &portion, portion_bytes).await?;
            portion_bytes = 0;
        }
    }

    // 🧹 The last bus of the night: whatever's pending ships now, even
    // under quota.
    if let Some(portion) = builder.take_final() {
        debug!("🧹 flushing final portion of {} items ({} units)", portion.len(), portion.units);
        dispatch_portion(&executor, &pacer, &mut progress, &portion, portion_bytes).await?;
    }

    Ok(progress.finish())
}

/// 🚚 One portion, start to finish: dispatch, account, pace. The pacer
/// runs LAST, after the counters, so the schedule is computed against
/// work that actually happened.
async fn dispatch_portion(
    executor: &WriteExecutor,
    pacer: &Pacer,
    progress: &mut RunProgress,
    portion: &Portion,
    input_bytes: u64,
) -> Result<()> {
    let started = Instant::now();
    executor.dispatch(portion).await?;
    let elapsed = started.elapsed();

    progress.portion_done(portion.len() as u64, portion.units as u64, input_bytes);
    pacer.pace(progress.items_written(), elapsed).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStore;
    use std::io::Write as _;
    use std::sync::atomic::Ordering;

    fn config_for(filename: &str) -> AppConfig {
        AppConfig {
            table: "saves".into(),
            filename: filename.into(),
            rate: 100.0,
            skip: 0,
            batch: false,
            report_every: 1,
            store: Default::default(),
        }
    }

    /// 🧪 Write an export of `n` records to a temp file. One attribute
    /// each, so every record costs exactly one write unit and the
    /// portion arithmetic in the assertions stays mental-math-able.
    fn export_of(n: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for i in 0..n {
            writeln!(file, r#"{{"id":{{"N":"{i}"}}}}"#).expect("write line");
        }
        file
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_whole_file_gets_restored_single_item() -> Result<()> {
        // 🧪 60 records, quota 25: two full portions + a final flush.
        let export = export_of(60);
        let store = InMemoryStore::with_quota(25);
        let config = config_for(export.path().to_str().unwrap());

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;

        assert_eq!(summary.items_written, 60, "Every row landed");
        assert_eq!(summary.portions_done, 3, "25 + 25 + 10");
        assert_eq!(summary.skipped, 0);
        assert_eq!(store.items.lock().await.len(), 60);
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 60, "Single-item mode puts one by one");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_batch_mode_rides_the_batch_api() -> Result<()> {
        let export = export_of(60);
        let store = InMemoryStore::with_quota(25);
        let mut config = config_for(export.path().to_str().unwrap());
        config.batch = true;

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;

        assert_eq!(summary.items_written, 60);
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 0, "No per-item puts in batch mode");
        assert_eq!(store.batch_calls.load(Ordering::SeqCst), 3, "One call per 25-item portion");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_resume_skips_and_the_numbers_line_up() -> Result<()> {
        // 🧪 skip=50, quota=25: resume starts at portion #2, writes
        // only the last 10 rows, and portion numbering carries on.
        let export = export_of(60);
        let store = InMemoryStore::with_quota(25);
        let mut config = config_for(export.path().to_str().unwrap());
        config.skip = 50;

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;

        assert_eq!(summary.skipped, 50);
        assert_eq!(summary.items_written, 10, "Only the unskipped tail is written");
        assert_eq!(summary.portions_done, 3, "2 portions credited to the past + 1 written now");
        assert_eq!(store.items.lock().await.len(), 10);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_unprocessed_items_get_settled_mid_run() -> Result<()> {
        // 🧪 End-to-end partial failure: the store bounces twice, the
        // run still finishes with every row accounted for.
        let export = export_of(25);
        let store = InMemoryStore::with_quota(25);
        store.script_bounces([3, 1]).await;
        let mut config = config_for(export.path().to_str().unwrap());
        config.batch = true;

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;

        assert_eq!(summary.items_written, 25);
        assert_eq!(store.items.lock().await.len(), 25);
        assert_eq!(store.batch_calls.load(Ordering::SeqCst), 3, "Initial + two resubmissions");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_oversized_item_stops_the_show_before_any_write() {
        // 🧪 Batch mode + a 410 KB attribute: fatal at assembly, zero
        // write calls issued for that portion. Or any portion.
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let chonk = "x".repeat(410 * 1024);
        writeln!(file, r#"{{"id":{{"S":"chonk"}},"blob":{{"S":"{chonk}"}}}}"#).expect("write line");

        let store = InMemoryStore::with_quota(1000);
        let mut config = config_for(file.path().to_str().unwrap());
        config.batch = true;

        let err = restore(config, StoreBackend::InMemory(store.clone()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Oversized item"), "Names the crime: {err}");
        assert_eq!(store.batch_calls.load(Ordering::SeqCst), 0, "Failed before any write call");
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_malformed_line_names_its_line_number() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, r#"{{"id":{{"N":"1"}}}}"#).expect("write line");
        writeln!(file, "this is not json, this is a cry for help").expect("write line");

        let store = InMemoryStore::with_quota(25);
        let config = config_for(file.path().to_str().unwrap());

        let err = restore(config, StoreBackend::InMemory(store)).await.unwrap_err();
        assert!(
            format!("{:#}", err).contains("Line 2"),
            "The operator deserves a line number: {:#}",
            err
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_gzip_exports_are_welcome_too() -> Result<()> {
        // 🧪 Same pipeline, compressed input. The `.gz` suffix is the
        // only hint the driver needs.
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("export.ndjson.gz");
        let file = std::fs::File::create(&path).expect("create gz");
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        for i in 0..10 {
            writeln!(encoder, r#"{{"id":{{"N":"{i}"}}}}"#).expect("write line");
        }
        encoder.finish().expect("finish gz");

        let store = InMemoryStore::with_quota(25);
        let config = config_for(path.to_str().unwrap());

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;
        assert_eq!(summary.items_written, 10);
        assert_eq!(store.items.lock().await.len(), 10);
        Ok(())
    }

    // Real clock here: under a paused clock, auto-advance is inhibited
    // while the decompressor's spawn_blocking task is in flight, so the
    // pacer's sleep never fires, the channel stays full, and the test
    // deadlocks. Backpressure needs real time to drain.
    #[tokio::test]
    async fn the_one_where_a_big_gz_export_streams_through_in_chunks() -> Result<()> {
        // 🧪 Enough inflated bytes to span several decompression chunks,
        // so the channel reader's chunk-boundary stitching (and a line
        // straddling two chunks) actually gets exercised.
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("big-export.ndjson.gz");
        let file = std::fs::File::create(&path).expect("create gz");
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        for i in 0..20_000 {
            writeln!(encoder, r#"{{"id":{{"N":"{i}"}}}}"#).expect("write line");
        }
        encoder.finish().expect("finish gz");

        let store = InMemoryStore::with_quota(10_000);
        let mut config = config_for(path.to_str().unwrap());
        config.report_every = 1_000;

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;
        assert_eq!(summary.items_written, 20_000, "Every line survived the chunk boundaries");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_fake_gz_fails_instead_of_hanging() {
        // 🧪 A .gz suffix on a file that is not gzip: the decompressor's
        // error must surface through the read path as a fatal error.
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("liar.ndjson.gz");
        std::fs::write(&path, b"this is not gzip and never was").expect("write file");

        let store = InMemoryStore::with_quota(25);
        let config = config_for(path.to_str().unwrap());

        let err = restore(config, StoreBackend::InMemory(store)).await.unwrap_err();
        assert!(
            format!("{:#}", err).contains("no longer be trusted"),
            "The corrupt stream is a hard stop: {:#}",
            err
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_zero_quota_table_fails_before_the_file_opens() {
        let store = InMemoryStore::with_quota(0);
        let config = config_for("/definitely/does/not/exist.ndjson");

        let err = restore(config, StoreBackend::InMemory(store)).await.unwrap_err();
        assert!(
            err.to_string().contains("quota of 0"),
            "Zero quota is the reported failure, not the missing file: {err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_missing_file_gets_a_proper_eulogy() {
        let store = InMemoryStore::with_quota(25);
        let config = config_for("/definitely/does/not/exist.ndjson");

        let err = restore(config, StoreBackend::InMemory(store)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("exist.ndjson"), "Error names the file");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_empty_export_is_a_quiet_success() -> Result<()> {
        // 🧪 Zero lines: no portions, no writes, exit clean.
        let export = export_of(0);
        let store = InMemoryStore::with_quota(25);
        let config = config_for(export.path().to_str().unwrap());

        let summary = restore(config, StoreBackend::InMemory(store.clone())).await?;
        assert_eq!(summary, RunSummary { skipped: 0, portions_done: 0, items_written: 0 });
        assert_eq!(store.batch_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_hard_store_error_ends_the_run() {
        let export = export_of(30);
        let store = InMemoryStore::with_quota(25);
        store.fail_next_write("region fell into the sea").await;
        let config = config_for(export.path().to_str().unwrap());

        let err = restore(config, StoreBackend::InMemory(store.clone()))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("region fell into the sea"));
        // The tail of the file was never dispatched.
        assert!(store.items.lock().await.len() < 30);
    }
}
