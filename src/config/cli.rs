use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::CacheContext;

/// Command-line arguments for the kiosk-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "kiosk-cache",
    version,
    about = "Inspect and maintain a kiosk cache store"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "KIOSK_CACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the durable store file.
    #[arg(
        long = "storage-path",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub storage_path: Option<PathBuf>,

    /// Override the durable store quota in bytes.
    #[arg(long = "storage-quota-bytes", value_name = "BYTES", global = true)]
    pub storage_quota_bytes: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Report cache health: size, staleness, redundancy and memory pressure.
    Health,
    /// Run a smart optimization pass, or a full one with --full.
    Optimize(OptimizeArgs),
    /// Raise an invalidation event for one restaurant.
    Invalidate(InvalidateArgs),
    /// Remove a restaurant's cached entries, or a single key.
    Clear(ClearArgs),
    /// Read one cached value.
    Get(GetArgs),
    /// Write one value through the coordinator.
    Set(SetArgs),
    /// Preload a kiosk's restaurant, menu and toppings from a fixture file.
    Preload(PreloadArgs),
}

#[derive(Debug, Args, Clone)]
pub struct OptimizeArgs {
    /// Restaurant whose data is kept during emergency cleanup.
    #[arg(long, value_name = "ID")]
    pub restaurant: Option<String>,

    /// Reload the restaurant from source first and ignore the cooldown.
    #[arg(long, action = clap::ArgAction::SetTrue, requires_all = ["restaurant", "fixtures"])]
    pub full: bool,

    /// Fixture file used as the data source for --full.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub fixtures: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    /// Event name, e.g. menu_update or logout.
    #[arg(value_name = "EVENT")]
    pub event: String,

    #[arg(long, value_name = "ID")]
    pub restaurant: String,

    /// Also remove the cached menu item with this id.
    #[arg(long = "item-id", value_name = "ID")]
    pub item_id: Option<String>,

    /// Also remove the cached category with this id.
    #[arg(long = "category-id", value_name = "ID")]
    pub category_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ClearArgs {
    #[arg(long, value_name = "ID")]
    pub restaurant: String,

    /// Remove only this key.
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    #[arg(long, value_name = "ID")]
    pub restaurant: String,

    #[arg(long, value_name = "KEY")]
    pub key: String,

    /// Context the read is made from (kiosk|admin|owner).
    #[arg(long, value_name = "CONTEXT", default_value = "kiosk")]
    pub context: CacheContext,
}

#[derive(Debug, Args, Clone)]
pub struct SetArgs {
    #[arg(long, value_name = "ID")]
    pub restaurant: String,

    #[arg(long, value_name = "KEY")]
    pub key: String,

    /// JSON value to store.
    #[arg(long, value_name = "JSON")]
    pub value: String,

    /// Context the write is made from (kiosk|admin|owner).
    #[arg(long, value_name = "CONTEXT", default_value = "kiosk")]
    pub context: CacheContext,
}

#[derive(Debug, Args, Clone)]
pub struct PreloadArgs {
    /// Restaurant slug shown on the kiosk.
    #[arg(long, value_name = "SLUG")]
    pub slug: String,

    /// Fixture file used as the data source.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub fixtures: PathBuf,
}
