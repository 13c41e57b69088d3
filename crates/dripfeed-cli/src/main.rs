//! 🚀 dripfeed-cli — the front door, the bouncer, the maitre d'.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that parses flags, sets
//! up logging, loads config, and then lets the real code do the heavy
//! lifting. Like a manager. 🦆
//!
//! Layering order, lowest to highest: env vars (`DRIPFEED_*`) →
//! config file (TOML) → command-line flags. The flag you typed with
//! your own hands wins. Democracy ends at the shell prompt.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Replay a newline-delimited JSON table export into a
/// DynamoDB-compatible store at a pace its write quota can survive.
#[derive(Debug, Parser)]
#[command(name = "dripfeed", version, about)]
struct Cli {
    /// The export file to replay (NDJSON; `.gz` accepted)
    filename: Option<String>,

    /// Table to restore into
    #[arg(short, long)]
    table: Option<String>,

    /// Rate multiplier, percent of the provisioned write quota
    #[arg(short, long)]
    rate: Option<f64>,

    /// Input lines to skip before writing (resume knob)
    #[arg(short, long)]
    skip: Option<u64>,

    /// Use the batch-write API instead of per-item puts
    #[arg(short, long)]
    batch: bool,

    /// Log every Nth portion instead of every portion
    #[arg(long, value_name = "N")]
    report: Option<u64>,

    /// TOML config file (env vars DRIPFEED_* are read either way)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
/// The "I pressed Enter and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse flags (clap does the yelling about typos)
/// 3. Load config, layer the flags on top (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry, with context)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // 🔒 If a config file was named, it had better exist — failing fast
    // here beats silently restoring with defaults and wondering why the
    // endpoint is localhost.
    if let Some(path) = &cli.config {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Could not even check whether config file '{}' exists. \
                 Permissions? A haunted mount? Use an absolute path to be \
                 absolutely certain.",
                path.display()
            )
        })?;
        if !exists {
            error!("💀 Config file '{}' does not exist.", path.display());
            std::process::exit(1);
        }
    }

    // 🔧 Env + file first, then the flags stomp on top. The flag you
    // typed five seconds ago outranks the file you wrote last month.
    let mut config = dripfeed::load_config(cli.config.as_deref())
        .context("💀 Couldn't load the config. Take a look at the file and the DRIPFEED_* environment, make sure you didn't forget something obvious.")?;

    if let Some(table) = cli.table {
        config.table = table;
    }
    if let Some(filename) = cli.filename {
        config.filename = filename;
    }
    if let Some(rate) = cli.rate {
        config.rate = rate;
    }
    if let Some(skip) = cli.skip {
        config.skip = skip;
    }
    if cli.batch {
        config.batch = true;
    }
    if let Some(report) = cli.report {
        config.report_every = report;
    }

    // 🚀 SEND IT. No take-backs. The table is about to receive visitors.
    let result = dripfeed::run(config).await;

    // 💀 Error handling: the part where we find out what went wrong
    // and print it in a way that's helpful at 3am
    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        // -- 📡 if it smells like a connection problem, it's probably a connection problem
        // -- like when your wifi icon has full bars but nothing loads
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the store endpoint isn't reachable. \
                Double-check that it's actually running and that `store.endpoint` \
                points at it. If you're using Docker, try: `docker ps` to see \
                what's up, or `docker compose up -d` to resurrect it. \
                Even databases need a nudge sometimes. ☕"
            );
        }

        // 🗑️ Exit with prejudice. A failed restore is resumable: the log
        // above says how many portions landed; multiply by the quota and
        // hand it to --skip.
        std::process::exit(1);
    }

    // ✅ If we got here, everything worked. Pop the champagne. 🍾
    // (or at least close the terminal tab with a sense of accomplishment)
    Ok(())
}
