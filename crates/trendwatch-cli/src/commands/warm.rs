use std::sync::Arc;
use std::time::Duration;

use trendwatch_core::{CoreError, FetchOrchestrator, Geo};

use super::{metric_kinds, CommandOutcome};
use crate::cli::WarmArgs;
use crate::error::CliError;

pub async fn run(
    args: &WarmArgs,
    orchestrator: &Arc<FetchOrchestrator>,
    timeout_ms: u64,
) -> Result<CommandOutcome, CliError> {
    let geo = Geo::parse(&args.geo)?;
    let kinds = metric_kinds(&args.kinds);
    let warm = orchestrator.warm_cache(&args.timeframe, &geo, &kinds, args.force);

    let report = tokio::time::timeout(Duration::from_millis(timeout_ms), warm)
        .await
        .map_err(|_| CoreError::Timeout { timeout_ms })??;
    let degraded = report.failures() > 0;
    Ok(CommandOutcome::ok(serde_json::to_value(&report)?).degraded(degraded))
}
