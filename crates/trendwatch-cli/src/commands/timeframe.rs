use serde_json::json;
use trendwatch_core::Timeframe;

use super::CommandOutcome;
use crate::cli::TimeframeArgs;
use crate::error::CliError;

pub fn run(args: &TimeframeArgs) -> Result<CommandOutcome, CliError> {
    let normalized = Timeframe::normalize(&args.value)?;
    Ok(CommandOutcome::ok(json!({
        "input": normalized.original,
        "timeframe": normalized.timeframe.token(),
        "description": normalized.timeframe.description(),
        "converted": normalized.was_converted(),
        "conversion_note": normalized.conversion_note,
    })))
}
