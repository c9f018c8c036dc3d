use crate::normalize::parse_numeric;
use crate::stats::{self, format_number};
use serde::Serialize;

/// Sensor id that times the test instead of sampling a platform sensor.
pub const ELAPSED_TIME_SENSOR: &str = "sys.time";

/// A platform sensor, identified by its `category.metric` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorId {
    pub category: String,
    pub metric: String,
}

impl SensorId {
    pub fn new(category: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            metric: metric.into(),
        }
    }

    /// Parse `category.metric`. Anything other than exactly two non-empty
    /// parts is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.');
        let category = parts.next().filter(|p| !p.is_empty())?;
        let metric = parts.next().filter(|p| !p.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(category, metric))
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.category, self.metric)
    }
}

/// Platform sensor readout and capability catalog, supplied by the host.
pub trait SensorSource: Send + Sync {
    /// Sensors this platform can read. Queried at most once per supervisor.
    fn supported_sensors(&self) -> Vec<SensorId>;

    /// Current reading, or `None` if the sensor could not be read this time.
    fn read(&self, sensor: &SensorId) -> Option<f64>;
}

/// How a sensor's samples are folded into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    All,
    Min,
    Max,
    Avg,
}

impl ReportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "ALL" => Some(ReportMode::All),
            "MIN" => Some(ReportMode::Min),
            "MAX" => Some(ReportMode::Max),
            "AVG" => Some(ReportMode::Avg),
            _ => None,
        }
    }
}

/// Ancillary measurement produced by a sensor monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MonitorValue {
    Number(f64),
    /// Every sample, comma-joined.
    Series(String),
}

impl std::fmt::Display for MonitorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorValue::Number(n) => write!(f, "{}", format_number(*n)),
            MonitorValue::Series(s) => f.write_str(s),
        }
    }
}

/// Parse channel contents. Unparsable lines, such as a fragment left by a
/// rewrite cut short, are skipped.
pub fn parse_samples(contents: &str) -> Vec<f64> {
    contents.lines().filter_map(parse_numeric).collect()
}

/// Fold samples by report mode. No samples, no value.
pub fn reduce_samples(samples: &[f64], mode: ReportMode) -> Option<MonitorValue> {
    if samples.is_empty() {
        return None;
    }
    match mode {
        ReportMode::All => Some(MonitorValue::Series(
            samples
                .iter()
                .map(|s| format_number(*s))
                .collect::<Vec<_>>()
                .join(","),
        )),
        ReportMode::Min => stats::min(samples).map(MonitorValue::Number),
        ReportMode::Max => stats::max(samples).map(MonitorValue::Number),
        ReportMode::Avg => stats::mean(samples).map(MonitorValue::Number),
    }
}
