use serde_json::json;
use trendwatch_core::{CacheFilter, Entity, FetchOrchestrator, MetricKind};

use super::CommandOutcome;
use crate::cli::ClearArgs;
use crate::error::CliError;

pub async fn status(orchestrator: &FetchOrchestrator) -> Result<CommandOutcome, CliError> {
    let summary = orchestrator.cache_status_summary().await?;
    Ok(CommandOutcome::ok(serde_json::to_value(&summary)?))
}

pub async fn clear(
    args: &ClearArgs,
    orchestrator: &FetchOrchestrator,
) -> Result<CommandOutcome, CliError> {
    let filter = CacheFilter {
        entity: args.entity.as_deref().map(Entity::parse).transpose()?,
        metric_kind: args.kind.map(MetricKind::from),
    };
    let removed = orchestrator.clear_cache(filter.clone()).await?;
    Ok(CommandOutcome::ok(json!({
        "removed": removed,
        "entity": filter.entity,
        "metric_kind": filter.metric_kind,
    })))
}
