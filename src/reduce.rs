//! Trial reducer: folds a test's repeated-trial results into one end result.

use crate::normalize::parse_numeric;
use crate::profile::Quantifier;
use crate::stats::{self, format_number};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use std::path::Path;

/// Trial values that count as a failure in pass/fail tests.
const FAIL_TOKENS: [&str; 4] = ["FALSE", "0", "FAIL", "FAILED"];

/// Digits kept on the reported min/max bracket.
const BRACKET_PRECISION: u32 = 2;

/// How a test's result is displayed, which decides how trials are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayFormat {
    NoResult,
    LineGraph,
    FilledLineGraph,
    TestCountPass,
    ImageComparison,
    PassFail,
    MultiPassFail,
    BarGraph,
    /// Any other kind. Reduced like a bar graph, but a non-numeric trial
    /// result is kept.
    Other,
}

impl DisplayFormat {
    /// Parse a display-format name. Unknown names become [`DisplayFormat::Other`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_RESULT" => DisplayFormat::NoResult,
            "LINE_GRAPH" => DisplayFormat::LineGraph,
            "FILLED_LINE_GRAPH" => DisplayFormat::FilledLineGraph,
            "TEST_COUNT_PASS" => DisplayFormat::TestCountPass,
            "IMAGE_COMPARISON" => DisplayFormat::ImageComparison,
            "PASS_FAIL" => DisplayFormat::PassFail,
            "MULTI_PASS_FAIL" => DisplayFormat::MultiPassFail,
            "BAR_GRAPH" => DisplayFormat::BarGraph,
            other => {
                tracing::debug!(
                    format = other,
                    "unknown display format, reducing as quantified numeric"
                );
                DisplayFormat::Other
            }
        }
    }

    pub fn is_pass_fail(self) -> bool {
        matches!(self, DisplayFormat::PassFail | DisplayFormat::MultiPassFail)
    }
}

/// One value produced by one invocation: a number, a pass/fail token, or an
/// image artifact path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialResult(String);

impl TrialResult {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn number(&self) -> Option<f64> {
        parse_numeric(&self.0)
    }
}

/// Trial results for one test, accumulated across its repeated invocations.
#[derive(Debug, Clone, Default)]
pub struct ResultBuffer {
    results: Vec<TrialResult>,
    min_results: Vec<f64>,
    max_results: Vec<f64>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: TrialResult) {
        self.results.push(result);
    }

    pub fn push_min(&mut self, value: f64) {
        self.min_results.push(value);
    }

    pub fn push_max(&mut self, value: f64) {
        self.max_results.push(value);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }
}

/// Final reduced value for a test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndResult {
    pub value: Option<String>,
    pub display_format: DisplayFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub precision: u32,
}

/// Reduce a test's trials to its end result. Consumes the buffer.
pub fn reduce_trials(
    buffer: ResultBuffer,
    display_format: DisplayFormat,
    quantifier: Option<Quantifier>,
    precision: u32,
) -> EndResult {
    let mut end = EndResult {
        value: None,
        display_format,
        min: None,
        max: None,
        precision,
    };

    if buffer.is_empty() {
        tracing::warn!(?display_format, "no trial results to reduce");
        end.value = Some("0".to_string());
        return end;
    }

    let trials = &buffer.results;
    match display_format {
        DisplayFormat::NoResult => {}
        DisplayFormat::LineGraph | DisplayFormat::FilledLineGraph | DisplayFormat::TestCountPass => {
            end.value = Some(trials[0].as_str().to_string());
        }
        DisplayFormat::ImageComparison => {
            end.value = encode_image(Path::new(trials[0].as_str()));
        }
        DisplayFormat::PassFail | DisplayFormat::MultiPassFail => {
            end.value = Some(reduce_pass_fail(trials));
        }
        DisplayFormat::BarGraph | DisplayFormat::Other => match quantifier {
            Some(Quantifier::Max) => {
                end.value = numeric_trials(trials).reduce(f64::max).map(format_number);
            }
            Some(Quantifier::Min) => {
                end.value = numeric_trials(trials).reduce(f64::min).map(format_number);
            }
            Some(Quantifier::Avg) | None => {
                let (mean, text) = average_trials(trials, precision);
                end.value = Some(text);
                end.min = bracket(&buffer.min_results, |m| m < mean, stats::min);
                end.max = bracket(&buffer.max_results, |m| m > mean, stats::max);
            }
        },
    }
    end
}

fn numeric_trials(trials: &[TrialResult]) -> impl Iterator<Item = f64> + '_ {
    trials.iter().filter_map(TrialResult::number)
}

/// Mean of the numeric trials, rounded to an integer unless any trial had a
/// decimal point, in which case `precision` digits are kept.
fn average_trials(trials: &[TrialResult], precision: u32) -> (f64, String) {
    let mut total = 0.0;
    let mut count = 0usize;
    let mut is_float = false;
    for trial in trials {
        let text = trial.as_str().trim();
        if let Some(n) = parse_numeric(text) {
            total += n;
            count += 1;
            is_float |= text.contains('.');
        }
    }
    let mean = stats::set_precision(total / count.max(1) as f64, precision);
    if is_float {
        (mean, format!("{:.*}", precision as usize, mean))
    } else {
        let rounded = mean.round();
        (rounded, format_number(rounded))
    }
}

/// Min/max bracket: kept only when strictly more extreme than the end value
/// and non-zero.
fn bracket(
    values: &[f64],
    more_extreme: impl Fn(f64) -> bool,
    pick: fn(&[f64]) -> Option<f64>,
) -> Option<f64> {
    let extreme = stats::set_precision(pick(values)?, BRACKET_PRECISION);
    (extreme != 0.0 && more_extreme(extreme)).then_some(extreme)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Undetermined,
    Pass,
    Fail,
}

/// A single trial passes through verbatim. With several, any failure makes
/// the aggregate FAIL and it never reverts to PASS.
fn reduce_pass_fail(trials: &[TrialResult]) -> String {
    if let [only] = trials {
        return only.as_str().to_string();
    }
    let mut verdict = Verdict::Undetermined;
    for trial in trials {
        if FAIL_TOKENS.contains(&trial.as_str().trim()) {
            verdict = Verdict::Fail;
        } else if verdict == Verdict::Undetermined {
            verdict = Verdict::Pass;
        }
    }
    match verdict {
        Verdict::Fail => "FAIL".to_string(),
        Verdict::Pass | Verdict::Undetermined => "PASS".to_string(),
    }
}

/// Base64 of the image's bytes. The source file is deleted once encoded.
fn encode_image(path: &Path) -> Option<String> {
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "image comparison artifact missing");
        return None;
    }
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read image artifact");
            return None;
        }
    };
    let encoded = BASE64.encode(bytes);
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(error = %e, path = %path.display(), "failed to remove image artifact");
    }
    Some(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(values: &[&str]) -> ResultBuffer {
        let mut buffer = ResultBuffer::new();
        for v in values {
            buffer.push(TrialResult::new(*v));
        }
        buffer
    }

    fn reduce(values: &[&str], format: DisplayFormat) -> EndResult {
        reduce_trials(buffer(values), format, None, 2)
    }

    #[test]
    fn test_display_format_parse() {
        assert_eq!(DisplayFormat::parse("PASS_FAIL"), DisplayFormat::PassFail);
        assert_eq!(DisplayFormat::parse("line_graph"), DisplayFormat::LineGraph);
        assert_eq!(DisplayFormat::parse("BAR_GRAPH"), DisplayFormat::BarGraph);
        assert_eq!(DisplayFormat::parse("HORIZONTAL_BOX_PLOT"), DisplayFormat::Other);
    }

    #[test]
    fn test_empty_buffer_yields_zero() {
        let end = reduce(&[], DisplayFormat::BarGraph);
        assert_eq!(end.value.as_deref(), Some("0"));
        assert_eq!(end.min, None);
    }

    #[test]
    fn test_no_result_computes_nothing() {
        let end = reduce(&["12"], DisplayFormat::NoResult);
        assert_eq!(end.value, None);
    }

    #[test]
    fn test_line_graph_takes_first_trial() {
        let end = reduce(&["1,2,3", "4,5,6"], DisplayFormat::LineGraph);
        assert_eq!(end.value.as_deref(), Some("1,2,3"));
    }

    #[test]
    fn test_pass_fail_single_trial_verbatim() {
        let end = reduce(&["PASS,FAIL"], DisplayFormat::MultiPassFail);
        assert_eq!(end.value.as_deref(), Some("PASS,FAIL"));
    }

    #[test]
    fn test_pass_fail_any_failure_is_sticky() {
        let end = reduce(&["PASS", "FAIL", "PASS"], DisplayFormat::PassFail);
        assert_eq!(end.value.as_deref(), Some("FAIL"));
    }

    #[test]
    fn test_pass_fail_all_pass() {
        let end = reduce(&["PASS", "PASS"], DisplayFormat::PassFail);
        assert_eq!(end.value.as_deref(), Some("PASS"));
    }

    #[test]
    fn test_pass_fail_zero_and_false_fail() {
        assert_eq!(
            reduce(&["PASS", "0"], DisplayFormat::PassFail).value.as_deref(),
            Some("FAIL")
        );
        assert_eq!(
            reduce(&["FALSE", "PASS"], DisplayFormat::PassFail)
                .value
                .as_deref(),
            Some("FAIL")
        );
    }

    #[test]
    fn test_average_ignores_non_numeric_and_rounds() {
        let end = reduce(&["10", "20", "abc", "30"], DisplayFormat::BarGraph);
        assert_eq!(end.value.as_deref(), Some("20"));
    }

    #[test]
    fn test_unknown_format_reduces_like_bar_graph() {
        let end = reduce(&["10", "20", "abc", "30"], DisplayFormat::Other);
        assert_eq!(end.value.as_deref(), Some("20"));
        assert_eq!(end.display_format, DisplayFormat::Other);
    }

    #[test]
    fn test_average_integer_trials_round() {
        let end = reduce(&["10", "11"], DisplayFormat::BarGraph);
        assert_eq!(end.value.as_deref(), Some("11"));
    }

    #[test]
    fn test_average_decimal_trials_keep_precision() {
        let end = reduce_trials(
            buffer(&["10.5", "11", " 12.25 "]),
            DisplayFormat::BarGraph,
            None,
            3,
        );
        assert_eq!(end.value.as_deref(), Some("11.250"));
    }

    #[test]
    fn test_max_and_min_quantifiers() {
        let max = reduce_trials(
            buffer(&["3", "9.5", "x"]),
            DisplayFormat::BarGraph,
            Some(Quantifier::Max),
            2,
        );
        assert_eq!(max.value.as_deref(), Some("9.5"));
        let min = reduce_trials(
            buffer(&["3", "9.5"]),
            DisplayFormat::BarGraph,
            Some(Quantifier::Min),
            2,
        );
        assert_eq!(min.value.as_deref(), Some("3"));
    }

    #[test]
    fn test_min_bracket_recorded_when_more_extreme() {
        let mut b = buffer(&["10", "10"]);
        b.push_min(5.0);
        let end = reduce_trials(b, DisplayFormat::BarGraph, None, 2);
        assert_eq!(end.min, Some(5.0));
    }

    #[test]
    fn test_min_bracket_skipped_when_not_more_extreme() {
        let mut b = buffer(&["10"]);
        b.push_min(15.0);
        let end = reduce_trials(b, DisplayFormat::BarGraph, None, 2);
        assert_eq!(end.min, None);
    }

    #[test]
    fn test_max_bracket_rounded_and_non_zero() {
        let mut b = buffer(&["10"]);
        b.push_max(12.3456);
        b.push_max(11.0);
        let end = reduce_trials(b, DisplayFormat::BarGraph, None, 2);
        assert_eq!(end.max, Some(12.35));

        let mut b = buffer(&["-10"]);
        b.push_max(0.0);
        let end = reduce_trials(b, DisplayFormat::BarGraph, None, 2);
        assert_eq!(end.max, None);
    }

    #[test]
    fn test_image_comparison_encodes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iqc.png");
        std::fs::write(&path, b"PNGDATA").unwrap();
        let end = reduce(&[path.to_str().unwrap()], DisplayFormat::ImageComparison);
        assert_eq!(end.value.as_deref(), Some("UE5HREFUQQ=="));
        assert!(!path.exists());
    }

    #[test]
    fn test_image_comparison_missing_file() {
        let end = reduce(&["/nonexistent/iqc.png"], DisplayFormat::ImageComparison);
        assert_eq!(end.value, None);
    }
}
