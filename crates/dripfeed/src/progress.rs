//! 📊 progress.rs — "Are we there yet?" — every restore, every time, forever.
//!
//! 🚀 Two jobs live here:
//!
//! 1. **The ledger.** [`RunProgress`] owns the three counters that
//!    describe a run — `skipped`, `portions_done`, `items_written` —
//!    and they only ever go up. One instance, owned by the driver,
//!    passed by `&mut`. No globals, no ambient state, no "who
//!    incremented this" archaeology.
//! 2. **The dashboard.** An indicatif bar over the input bytes plus a
//!    comfy-table panel with throughput rates, so the human knows the
//!    loader isn't dead. Watching it will not make it go faster.
//!    We've tried. Science says no.
//!
//! 🧠 Knowledge graph:
//! - **Skip accounting**: while resuming, every `quota` skipped lines
//!   count as one already-done portion, so portion numbers line up
//!   across a crash and a resume. skip=50, quota=25 → you restart at
//!   portion #2, exactly where the obituary said.
//! - **Report period**: the per-portion log line honors `report_every`
//!   (log every Nth portion). The counters do not — counters never
//!   take a portion off.
//! - Timestamps on the portion lines come from the tracing subscriber;
//!   we don't format our own clocks here.
//!
//! 🦆 (the duck has nothing to do with this module. it's just vibing.)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// 🔢 Commas for the 3 people in the audience who like readability.
/// "1000000 items" → "1,000,000 items" — you're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the restores you tell your grandchildren about.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📈 Final summary of one run, returned by the driver so callers (and
/// tests) don't have to scrape logs to learn what happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub skipped: u64,
    pub portions_done: u64,
    pub items_written: u64,
}

/// 📊 The run's counters plus the terminal dashboard.
///
/// Counters are monotonically non-decreasing for the life of the run.
/// Nothing is persisted — resumption is the operator's skip count, not
/// a checkpoint file. (There is no checkpoint file. Stop looking.)
pub(crate) struct RunProgress {
    skipped: u64,
    portions_done: u64,
    items_written: u64,
    /// Write quota, used as the lines-per-portion yardstick while skipping.
    quota: u64,
    /// Log every Nth portion. Clamped to ≥ 1 because modulo-by-zero is
    /// nobody's idea of a report period.
    report_every: u64,
    /// 🎨 the actual terminal progress bar (indicatif does the heavy lifting)
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, items, units) for rate calculation
    rate_samples: VecDeque<(Instant, u64, u64)>,
    units_written: u64,
    bytes_consumed: u64,
    total_input_bytes: u64,
    start_time: Instant,
}

impl std::fmt::Debug for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ProgressBar is a diva and doesn't derive Debug. The counters
        // are the part anyone debugging actually wants anyway.
        f.debug_struct("RunProgress")
            .field("skipped", &self.skipped)
            .field("portions_done", &self.portions_done)
            .field("items_written", &self.items_written)
            .field("quota", &self.quota)
            .finish()
    }
}

impl RunProgress {
    /// 🚀 Fresh counters, zeroed dashboard. `total_input_bytes` sizes
    /// the bar; pass 0 for "no idea" and the bar flies blind with dignity.
    pub(crate) fn new(quota: u64, report_every: u64, total_input_bytes: u64) -> Self {
        let progress_bar = ProgressBar::new(total_input_bytes);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")
                // template string is hardcoded and valid, checked twice
                .unwrap()
                .progress_chars("=>-"),
        );

        let start_time = Instant::now();
        // seed the rate window with t=0 so we don't divide by zero like animals
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            skipped: 0,
            portions_done: 0,
            items_written: 0,
            quota: quota.max(1),
            report_every: report_every.max(1),
            progress_bar,
            rate_samples,
            units_written: 0,
            bytes_consumed: 0,
            total_input_bytes,
            start_time,
        }
    }

    /// ⏭️ Account one skipped input line. Every `quota` skipped lines
    /// is one portion a previous run already wrote, so the portion
    /// numbering stays consistent across a resume. The line's bytes
    /// still advance the bar — skipped input is consumed input, and a
    /// resumed run's bar should start where the last run died, not
    /// pretend the first half of the file doesn't exist.
    pub(crate) fn skip_line(&mut self, input_bytes: u64) {
        self.skipped += 1;
        if self.skipped % self.quota == 0 {
            self.portions_done += 1;
        }
        self.bytes_consumed += input_bytes;
        self.progress_bar.set_position(self.bytes_consumed);
    }

    pub(crate) fn skipped(&self) -> u64 {
        self.skipped
    }

    pub(crate) fn portions_done(&self) -> u64 {
        self.portions_done
    }

    pub(crate) fn items_written(&self) -> u64 {
        self.items_written
    }

    pub(crate) fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// ✅ Account one dispatched portion: bump the counters, emit the
    /// portion line (honoring the report period), feed the dashboard.
    pub(crate) fn portion_done(&mut self, items: u64, units: u64, input_bytes: u64) {
        self.portions_done += 1;
        self.items_written += items;
        self.units_written += units;
        self.bytes_consumed += input_bytes;

        if self.portions_done % self.report_every == 0 {
            info!(
                "📦 Portion #{} is done. Items written: {}. Items written overall: {}",
                self.portions_done, items, self.items_written
            );
        }

        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.bytes_consumed);
    }

    /// 🏁 Park the bar and hand back the final numbers.
    pub(crate) fn finish(self) -> RunSummary {
        self.progress_bar.finish();
        RunSummary {
            skipped: self.skipped,
            portions_done: self.portions_done,
            items_written: self.items_written,
        }
    }

    /// 📈 Throughput over a 5-second sliding window, so a single slow
    /// portion doesn't turn the dashboard into a seismograph.
    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.items_written, self.units_written));

        if let Some(&(oldest_time, oldest_items, oldest_units)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return Rates {
                    items_per_sec: self.items_written.saturating_sub(oldest_items) as f64 / elapsed,
                    units_per_sec: self.units_written.saturating_sub(oldest_units) as f64 / elapsed,
                };
            }
        }
        Rates { items_per_sec: 0.0, units_per_sec: 0.0 }
    }

    /// 🎨 Render the throughput panel onto the bar's message area.
    fn render(&self, rates: Rates) {
        let percent = if self.total_input_bytes > 0 {
            (self.bytes_consumed as f64 / self.total_input_bytes as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // 🔮 linear extrapolation — assumes the future looks like
            // the past, which for a paced loader is actually true.
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} items/s", format_number(rates.items_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} items", format_number(self.items_written)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!(
                "{} units/s (quota {})",
                format_number(rates.units_per_sec as u64),
                format_number(self.quota)
            ))
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} portions", format_number(self.portions_done)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("restoring ({:.2}%)\n{}", percent, table));
    }
}

/// 📡 A snapshot of throughput at one moment. A speedometer for items,
/// and a second one for the thing the store actually bills: units.
struct Rates {
    items_per_sec: f64,
    units_per_sec: f64,
}
