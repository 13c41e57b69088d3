//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! The loader core consumes this as a *resolved* struct: table name,
//! file name, rate knob, skip offset, batch flag, report period, and
//! the store connection parameters. Flag parsing, env merging, and
//! credential plumbing all live out here at the edge — the pipeline
//! never sees a raw argv.

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// 📦 Everything one restore run needs to know about itself, which is
/// more self-awareness than most processes achieve in their lifetime.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🎯 The table to restore into. Required; there is no default
    /// table, and guessing one would be a career-limiting feature.
    #[serde(default)]
    pub table: String,
    /// 📂 The export file to replay. Required. `.gz` is welcome.
    #[serde(default)]
    pub filename: String,
    /// 🎚️ Rate multiplier in percent of the provisioned quota.
    /// 100 = write exactly at quota. Must be positive.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// ⏭️ Input lines to skip before writing — the resume knob.
    #[serde(default)]
    pub skip: u64,
    /// 📦 Use the batch-write API instead of per-item puts.
    #[serde(default)]
    pub batch: bool,
    /// 🔔 Log every Nth portion. 1 = every portion gets its moment.
    #[serde(default = "default_report_every", alias = "report")]
    pub report_every: u64,
    /// 📡 Where the store lives and how to knock on its door.
    #[serde(default)]
    pub store: StoreConfig,
}

/// 📡 Store connection parameters. The core only reads these once, to
/// build the client handle; after that they're furniture.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// The DynamoDB-wire endpoint URL.
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // 🏠 DynamoDB Local's front porch. The address everyone
            // means when they don't say one.
            endpoint: "http://localhost:8000".to_string(),
            region: default_region(),
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_rate() -> f64 {
    100.0
}

fn default_report_every() -> u64 {
    1
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl AppConfig {
    /// 🔒 Reject configurations that would fail weirdly later, now,
    /// with words. Called by `run()` after all merging and CLI
    /// overrides have had their say.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            bail!("💀 No table name configured. The --table flag (or `table` in the config) is required — a restore needs somewhere to restore TO.");
        }
        if self.filename.is_empty() {
            bail!("💀 No input filename configured. The last argument is the export file, and it's required — a restore needs something to restore FROM.");
        }
        if self.rate <= 0.0 {
            bail!(
                "💀 Rate multiplier must be positive, got {}%. Zero would mean 'never write' and negative would mean... honestly we don't want to know.",
                self.rate
            );
        }
        Ok(())
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer
/// power of hoping.
///
/// 📐 DESIGN NOTE (tribal knowledge, now written down):
///   - `config_file_name` is None  → env vars only (`DRIPFEED_*`).
///   - `config_file_name` is Some  → env vars + TOML file, merged.
///     TOML wins on conflicts.
///
/// Validation does NOT happen here — the CLI gets to layer its flag
/// overrides on top first, and validating half-assembled config is how
/// you reject perfectly good command lines.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ Env vars are the base layer — like a good sourdough starter.
    // ALL DRIPFEED_* vars accepted. No ID required. Everyone's invited.
    let config = Figment::new().merge(Env::prefixed("DRIPFEED_"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DRIPFEED_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DRIPFEED_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
