//! Special-case stream extractors.
//!
//! A few raw-log shapes are whole numeric series rather than a value embedded
//! in a line. They are selected by an exact sentinel in a rule's template (or
//! an auxiliary data identifier) and bypass the tokenizer entirely.

use crate::normalize::parse_numeric;
use crate::profile::Quantifier;
use crate::stats;
use regex::Regex;
use std::sync::LazyLock;

/// libframetime output: one `Frametime <us> us` line per frame.
pub const FRAMETIME_SENTINEL: &str = "libframetime-output";
/// Comma-separated per-frame latencies in milliseconds.
pub const CSV_LATENCY_SENTINEL: &str = "csv-dump-frame-latencies";
/// id Tech `com_speeds` output: `frame: ... all: <ms> ...` records.
pub const FRAME_LATENCY_TOTALS: &str = "com-speeds-frame-latency-totals";

/// Frame times at or below this many microseconds are treated as noise.
pub const FRAME_NOISE_FLOOR_US: f64 = 2000.0;

/// Minimum series length before outlier trimming or rate reduction applies.
const MIN_SERIES_LEN: usize = 4;

static FRAMETIME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Frametime (.+) us$").unwrap());

/// The stream shapes selectable by sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    FrameTime,
    CsvLatency,
    LatencyTotals,
}

impl StreamKind {
    /// Kinds usable as an extraction-rule template.
    pub fn from_template(template: &str) -> Option<Self> {
        match template {
            FRAMETIME_SENTINEL => Some(StreamKind::FrameTime),
            CSV_LATENCY_SENTINEL => Some(StreamKind::CsvLatency),
            _ => None,
        }
    }

    /// Kinds usable as an auxiliary data identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            FRAME_LATENCY_TOTALS => Some(StreamKind::LatencyTotals),
            other => Self::from_template(other),
        }
    }

    /// Extract the series (milliseconds per frame) from a raw log.
    pub fn extract(self, output: &str) -> Vec<f64> {
        match self {
            StreamKind::FrameTime => parse_frametime_log(output),
            StreamKind::CsvLatency => parse_csv_latencies(output),
            StreamKind::LatencyTotals => parse_frame_latency_totals(output),
        }
    }
}

/// Collect libframetime samples, converted to milliseconds.
///
/// Samples at or below the noise floor are discarded before conversion. Series
/// of at least four samples are outlier-trimmed.
pub fn parse_frametime_log(output: &str) -> Vec<f64> {
    let mut frames: Vec<f64> = output
        .lines()
        .filter_map(|line| FRAMETIME_LINE.captures(line.trim_end_matches('\r')))
        .filter_map(|caps| parse_numeric(&caps[1]))
        .filter(|us| *us > FRAME_NOISE_FLOOR_US)
        .map(|us| us / 1000.0)
        .collect();

    if frames.len() >= MIN_SERIES_LEN {
        frames = stats::remove_outliers(&frames, stats::OUTLIER_MAGNITUDE);
    }
    frames
}

/// Comma-delimited series; non-numeric tokens are dropped in place.
pub fn parse_csv_latencies(output: &str) -> Vec<f64> {
    output.split(',').filter_map(parse_numeric).collect()
}

/// id Tech `com_speeds` log: for each `frame:` record take the number after
/// ` all: ` when it sits on the same line and is positive. Scanning resumes at
/// the next `bk:` marker.
pub fn parse_frame_latency_totals(output: &str) -> Vec<f64> {
    let mut totals = Vec::new();
    let mut rest = output;

    while let Some(start) = rest.find("frame:") {
        rest = &rest[start..];
        let line_end = rest.find('\n').unwrap_or(rest.len());
        if let Some(all) = rest[..line_end].find(" all: ") {
            let value = rest[all + 6..line_end].split_whitespace().next();
            if let Some(v) = value.and_then(parse_numeric).filter(|v| *v > 0.0) {
                totals.push(v);
            }
        }
        match rest.find("bk:") {
            Some(bk) => rest = &rest[bk..],
            None => break,
        }
    }
    totals
}

/// Drop the first frame: it usually includes start-up work.
pub fn without_startup(series: &[f64]) -> &[f64] {
    series.get(1..).unwrap_or(&[])
}

/// Convert a frame-interval series (ms) into instantaneous frame rates,
/// excluding the first entry and any non-positive interval.
pub fn frame_rate_series(series: &[f64]) -> Vec<f64> {
    without_startup(series)
        .iter()
        .filter(|ms| **ms > 0.0)
        .map(|ms| 1000.0 / ms)
        .collect()
}

/// Reduce a frame-interval series to one frame-rate figure.
///
/// Series shorter than four entries, and reductions equal to zero, yield no value.
pub fn frame_rate(series: &[f64], quantifier: Option<Quantifier>) -> Option<f64> {
    if series.len() < MIN_SERIES_LEN {
        return None;
    }
    let rates = frame_rate_series(series);
    let value = match quantifier {
        Some(Quantifier::Min) => stats::min(&rates),
        Some(Quantifier::Max) => stats::max(&rates),
        Some(Quantifier::Avg) | None => stats::mean(&rates),
    };
    value.filter(|v| *v != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frametime_log(us: &[u32]) -> String {
        let mut log = String::from("libframetime v0.2\nstarting\n");
        for v in us {
            log.push_str(&format!("Frametime {v} us\n"));
        }
        log
    }

    #[test]
    fn test_frametime_noise_floor_and_conversion() {
        let log = frametime_log(&[1500, 16000, 2000, 17000, 900, 16500]);
        let series = parse_frametime_log(&log);
        assert_eq!(series, vec![16.0, 17.0, 16.5]);
    }

    #[test]
    fn test_frametime_ignores_other_lines() {
        let log = "Frametime 16000 ms\nframetime 16000 us\nFrametime 16000 us\r\n";
        assert_eq!(parse_frametime_log(log), vec![16.0]);
    }

    #[test]
    fn test_frametime_outliers_trimmed() {
        let mut us = vec![16000; 20];
        us.push(400000);
        let series = parse_frametime_log(&frametime_log(&us));
        assert_eq!(series.len(), 20);
        assert!(series.iter().all(|v| *v == 16.0));
    }

    #[test]
    fn test_first_surviving_frame_excluded_from_final_series() {
        // 1000us is below the floor, so 20000us is the first surviving sample
        let log = frametime_log(&[1000, 20000, 10000, 10000, 10000, 10000]);
        let series = parse_frametime_log(&log);
        assert_eq!(series[0], 20.0);
        let rates = frame_rate_series(&series);
        assert_eq!(rates, vec![100.0, 100.0, 100.0, 100.0]);
    }

    #[test]
    fn test_csv_latencies_drop_non_numeric() {
        let series = parse_csv_latencies("10,abc,20, 25 ,,x");
        assert_eq!(series, vec![10.0, 20.0, 25.0]);
    }

    #[test]
    fn test_frame_rate_quantifiers() {
        let series = [50.0, 10.0, 20.0, 40.0];
        assert_eq!(frame_rate(&series, Some(Quantifier::Max)), Some(100.0));
        assert_eq!(frame_rate(&series, Some(Quantifier::Min)), Some(25.0));
        let avg = frame_rate(&series, None).unwrap();
        assert!((avg - (100.0 + 50.0 + 25.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_rate_drops_non_positive() {
        let series = [1.0, 0.0, -5.0, 10.0, 20.0];
        assert_eq!(frame_rate(&series, Some(Quantifier::Min)), Some(50.0));
    }

    #[test]
    fn test_frame_rate_short_series_yields_nothing() {
        assert_eq!(frame_rate(&[10.0, 10.0, 10.0], None), None);
    }

    #[test]
    fn test_frame_latency_totals() {
        let log = "\
frame:1 all: 16 gfe: 1 gbe: 2 bk: 3\n\
frame:2 all: 17 gfe: 1 gbe: 2 bk: 3\n\
frame:3 all: abc bk: 0\n\
frame:4 gfe: 1\n all: 99 bk: 1\n\
frame:5 all: 0 bk: 1\n";
        assert_eq!(parse_frame_latency_totals(log), vec![16.0, 17.0]);
    }

    #[test]
    fn test_stream_kind_selection() {
        assert_eq!(
            StreamKind::from_template(FRAMETIME_SENTINEL),
            Some(StreamKind::FrameTime)
        );
        assert_eq!(StreamKind::from_template(FRAME_LATENCY_TOTALS), None);
        assert_eq!(
            StreamKind::from_identifier(FRAME_LATENCY_TOTALS),
            Some(StreamKind::LatencyTotals)
        );
        assert_eq!(StreamKind::from_identifier("something-else"), None);
    }
}
