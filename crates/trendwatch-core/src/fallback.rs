use crate::domain::{MetricKind, Timeframe, TimeframePreset};

/// Picks a denser timeframe for sparse metric kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSelector;

impl FallbackSelector {
    pub const fn alternate(kind: MetricKind) -> Option<TimeframePreset> {
        match kind {
            MetricKind::RelatedQueries | MetricKind::RelatedTopics => {
                Some(TimeframePreset::PastQuarter)
            }
            MetricKind::InterestByRegion => Some(TimeframePreset::PastHalfYear),
            MetricKind::InterestOverTime => None,
        }
    }

    /// Alternate for `kind` unless `current` already is that timeframe.
    pub fn retry_timeframe(kind: MetricKind, current: &Timeframe) -> Option<Timeframe> {
        let alternate = Timeframe::Preset(Self::alternate(kind)?);
        (alternate != *current).then_some(alternate)
    }
}
