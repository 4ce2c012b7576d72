use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::cache::FreshnessPolicy;
use crate::domain::MetricKind;
use crate::ValidationError;

/// Diseases refreshed by `warm_cache` when `TRENDWATCH_ENTITIES` is unset.
pub const DEFAULT_TRACKED_ENTITIES: [&str; 10] = [
    "malaria",
    "cholera",
    "typhoid",
    "tuberculosis",
    "measles",
    "meningitis",
    "yellow fever",
    "hepatitis b",
    "HIV",
    "COVID-19",
];

/// Runtime tuning for caching, pacing and the upstream locale.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendsConfig {
    pub base_delay: Duration,
    pub inter_kind_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub cache_ttl: Duration,
    /// Fraction of an entry's TTL before expiry during which it reads as stale.
    pub stale_margin: f64,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub fallback_enabled: bool,
    pub host_language: String,
    /// Upstream `tz` parameter: minutes west of UTC.
    pub tz_offset_minutes: i32,
    pub tracked_entities: Vec<String>,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5_000),
            inter_kind_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
            max_retries: 3,
            cache_ttl: Duration::from_secs(86_400),
            stale_margin: 0.1,
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
            fallback_enabled: false,
            host_language: String::from("en-US"),
            tz_offset_minutes: 0,
            tracked_entities: DEFAULT_TRACKED_ENTITIES
                .iter()
                .map(|entity| (*entity).to_owned())
                .collect(),
        }
    }
}

impl TrendsConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from defaults overridden by `lookup(TRENDWATCH_*)`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "TRENDWATCH_BASE_DELAY_MS")? {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TRENDWATCH_INTER_KIND_DELAY_MS")? {
            config.inter_kind_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TRENDWATCH_MAX_DELAY_MS")? {
            config.max_delay = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, "TRENDWATCH_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TRENDWATCH_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(margin) = parse_var::<f64, _>(&lookup, "TRENDWATCH_STALE_MARGIN")? {
            if !(0.0..1.0).contains(&margin) {
                return Err(ValidationError::InvalidConfig {
                    name: "TRENDWATCH_STALE_MARGIN",
                    value: margin.to_string(),
                });
            }
            config.stale_margin = margin;
        }
        if let Some(limit) = parse_var(&lookup, "TRENDWATCH_QUOTA_LIMIT")? {
            config.quota_limit = limit;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TRENDWATCH_QUOTA_WINDOW_SECS")? {
            config.quota_window = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("TRENDWATCH_FALLBACK") {
            config.fallback_enabled = parse_flag("TRENDWATCH_FALLBACK", &raw)?;
        }
        if let Some(language) = lookup("TRENDWATCH_HL").filter(|value| !value.trim().is_empty()) {
            config.host_language = language.trim().to_owned();
        }
        if let Some(offset) = parse_var(&lookup, "TRENDWATCH_TZ")? {
            config.tz_offset_minutes = offset;
        }
        if let Some(raw) = lookup("TRENDWATCH_ENTITIES") {
            let entities = raw
                .split(',')
                .map(str::trim)
                .filter(|entity| !entity.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>();
            if !entities.is_empty() {
                config.tracked_entities = entities;
            }
        }

        Ok(config)
    }

    /// Region and related data change slowly and keep twice the base TTL.
    pub fn ttl_for(&self, kind: MetricKind) -> Duration {
        if kind.is_sparse() {
            self.cache_ttl.saturating_mul(2)
        } else {
            self.cache_ttl
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }

    pub fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.stale_margin)
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ValidationError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ValidationError::InvalidConfig { name, value: raw })
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ValidationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ValidationError::InvalidConfig {
            name,
            value: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (*key, (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name: &'static str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = TrendsConfig::from_lookup(lookup(&[])).expect("defaults must load");

        assert_eq!(config.base_delay, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.quota_limit, 30);
        assert_eq!(config.tracked_entities.len(), 10);
        assert!(!config.fallback_enabled);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = TrendsConfig::from_lookup(lookup(&[
            ("TRENDWATCH_BASE_DELAY_MS", "250"),
            ("TRENDWATCH_FALLBACK", "yes"),
            ("TRENDWATCH_ENTITIES", "malaria, ebola ,"),
            ("TRENDWATCH_TZ", "-60"),
        ]))
        .expect("overrides must load");

        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert!(config.fallback_enabled);
        assert_eq!(config.tracked_entities, vec!["malaria", "ebola"]);
        assert_eq!(config.tz_offset_minutes, -60);
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = TrendsConfig::from_lookup(lookup(&[("TRENDWATCH_MAX_RETRIES", "many")]))
            .expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::InvalidConfig {
                name: "TRENDWATCH_MAX_RETRIES",
                ..
            }
        ));
    }

    #[test]
    fn sparse_kinds_keep_double_ttl() {
        let config = TrendsConfig::default();
        assert_eq!(config.ttl_for(MetricKind::InterestOverTime), config.cache_ttl);
        assert_eq!(
            config.ttl_for(MetricKind::InterestByRegion),
            config.cache_ttl * 2
        );
    }
}
