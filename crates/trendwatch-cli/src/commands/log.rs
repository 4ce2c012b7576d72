use trendwatch_core::FetchOrchestrator;

use super::CommandOutcome;
use crate::cli::LogArgs;
use crate::error::CliError;

pub async fn run(args: &LogArgs, orchestrator: &FetchOrchestrator) -> Result<CommandOutcome, CliError> {
    let entries = orchestrator.recent_requests(args.limit).await?;
    Ok(CommandOutcome::ok(serde_json::to_value(&entries)?))
}
