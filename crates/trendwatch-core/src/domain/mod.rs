mod entity;
mod metric_kind;
mod timeframe;
mod timestamp;

pub use entity::{Entity, Geo};
pub use metric_kind::MetricKind;
pub use timeframe::{NormalizedTimeframe, Timeframe, TimeframePreset};
pub use timestamp::UtcDateTime;
