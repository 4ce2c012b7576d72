//! CLI argument definitions.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Serve metrics for one entity, refreshing what is due |
//! | `warm` | Refresh every tracked entity |
//! | `cache status` | Fresh/stale/expired counts |
//! | `cache clear` | Delete cache entries |
//! | `log` | Recent upstream call attempts |
//! | `timeframe` | Show how a timeframe is normalized |
//!
//! # Examples
//!
//! ```bash
//! trendwatch fetch malaria --kind interest-over-time --geo GH --pretty
//! trendwatch fetch cholera --kind related-queries --timeframe "now 30-d" --fallback
//! trendwatch cache clear --entity malaria
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use trendwatch_core::MetricKind;

#[derive(Debug, Parser)]
#[command(
    name = "trendwatch",
    author,
    version,
    about = "Cached, rate-limited search-interest metrics for tracked diseases"
)]
pub struct Cli {
    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Keep the cache and request log in memory instead of DuckDB.
    #[arg(long, global = true, default_value_t = false)]
    pub memory: bool,

    /// Never call upstream; serve whatever is cached.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Overall deadline for fetch and warm commands.
    #[arg(long, global = true, default_value_t = 120_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve metrics for one entity.
    Fetch(FetchArgs),
    /// Refresh every tracked entity (TRENDWATCH_ENTITIES).
    Warm(WarmArgs),
    /// Inspect or clear the cache.
    Cache(CacheArgs),
    /// Show recent upstream call attempts, newest first.
    Log(LogArgs),
    /// Show how a timeframe token is normalized.
    Timeframe(TimeframeArgs),
}

/// CLI spelling of [`MetricKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    InterestOverTime,
    RelatedQueries,
    RelatedTopics,
    InterestByRegion,
}

impl From<KindArg> for MetricKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::InterestOverTime => Self::InterestOverTime,
            KindArg::RelatedQueries => Self::RelatedQueries,
            KindArg::RelatedTopics => Self::RelatedTopics,
            KindArg::InterestByRegion => Self::InterestByRegion,
        }
    }
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    pub entity: String,

    /// Metric kinds to serve; all kinds when omitted.
    #[arg(long = "kind", value_enum)]
    pub kinds: Vec<KindArg>,

    #[arg(long, default_value = "today 3-m")]
    pub timeframe: String,

    /// Empty for worldwide, otherwise e.g. GH or GH-AA.
    #[arg(long, default_value = "")]
    pub geo: String,

    /// Retry empty related/regional data with a denser timeframe.
    #[arg(long, default_value_t = false)]
    pub fallback: bool,

    /// Ignore freshness, retry ceiling and cool-down.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct WarmArgs {
    #[arg(long = "kind", value_enum)]
    pub kinds: Vec<KindArg>,

    #[arg(long, default_value = "today 3-m")]
    pub timeframe: String,

    #[arg(long, default_value = "")]
    pub geo: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Fresh/stale/expired counts overall and per entity.
    Status,
    /// Delete entries; no filter clears everything.
    Clear(ClearArgs),
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    #[arg(long)]
    pub entity: Option<String>,

    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
}

#[derive(Debug, Args)]
pub struct LogArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct TimeframeArgs {
    pub value: String,
}
