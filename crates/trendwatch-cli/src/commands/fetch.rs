use std::time::Duration;

use trendwatch_core::{Entity, FetchOrchestrator, Geo, MetricsRequest, ResponseStatus};

use super::{metric_kinds, CommandOutcome};
use crate::cli::FetchArgs;
use crate::error::CliError;

pub async fn run(
    args: &FetchArgs,
    orchestrator: &FetchOrchestrator,
    timeout_ms: u64,
) -> Result<CommandOutcome, CliError> {
    let request = MetricsRequest::new(
        Entity::parse(&args.entity)?,
        metric_kinds(&args.kinds),
        &args.timeframe,
        Geo::parse(&args.geo)?,
    )?
    .with_force_refresh(args.force);
    let request = if args.fallback {
        request.with_fallback(true)
    } else {
        request
    };

    let response = orchestrator
        .get_metrics_with_timeout(&request, Duration::from_millis(timeout_ms))
        .await?;
    let degraded = response.cache_status >= ResponseStatus::NoCache;
    Ok(CommandOutcome::ok(response.to_json()?).degraded(degraded))
}
