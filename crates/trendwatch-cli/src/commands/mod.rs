mod cache;
mod fetch;
mod log;
mod timeframe;
mod warm;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use trendwatch_core::{
    FetchOrchestrator, GoogleTrendsAdapter, MemoryCacheStore, MemoryRequestLog, MetricKind,
    TrendsConfig, Warehouse, WarehouseCacheStore, WarehouseRequestLog,
};

use crate::cli::{CacheCommand, Cli, Command, KindArg};
use crate::error::CliError;

/// JSON to print plus whether the command served degraded results.
pub struct CommandOutcome {
    pub data: Value,
    pub degraded: bool,
}

impl CommandOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            degraded: false,
        }
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutcome, CliError> {
    if let Command::Timeframe(args) = &cli.command {
        return timeframe::run(args);
    }

    let orchestrator = Arc::new(build_orchestrator(cli)?);
    match &cli.command {
        Command::Fetch(args) => fetch::run(args, &orchestrator, cli.timeout_ms).await,
        Command::Warm(args) => warm::run(args, &orchestrator, cli.timeout_ms).await,
        Command::Cache(args) => match &args.command {
            CacheCommand::Status => cache::status(&orchestrator).await,
            CacheCommand::Clear(clear) => cache::clear(clear, &orchestrator).await,
        },
        Command::Log(args) => log::run(args, &orchestrator).await,
        Command::Timeframe(args) => timeframe::run(args),
    }
}

fn build_orchestrator(cli: &Cli) -> Result<FetchOrchestrator, CliError> {
    let config = TrendsConfig::from_env()?;
    let mut builder = FetchOrchestrator::builder(config.clone());

    if cli.memory {
        debug!("using in-memory cache and request log");
        builder = builder
            .cache(Arc::new(MemoryCacheStore::new()))
            .request_log(Arc::new(MemoryRequestLog::default()));
    } else {
        let warehouse = Warehouse::open_default()?;
        debug!(db_path = %warehouse.db_path().display(), "opened warehouse");
        builder = builder
            .cache(Arc::new(WarehouseCacheStore::new(warehouse.clone())))
            .request_log(Arc::new(WarehouseRequestLog::new(warehouse)));
    }

    if !cli.offline {
        builder = builder.source(Arc::new(GoogleTrendsAdapter::new(&config)));
    }
    Ok(builder.build())
}

pub(crate) fn metric_kinds(kinds: &[KindArg]) -> Vec<MetricKind> {
    if kinds.is_empty() {
        return MetricKind::ALL.to_vec();
    }
    kinds.iter().copied().map(MetricKind::from).collect()
}
