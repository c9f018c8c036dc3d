//! Result parser facade.
//!
//! Runs the pieces below it for one test run: per-trial extraction (or image
//! parsing) into the result buffer, auxiliary frame-time series, sensor
//! monitoring, and the final reduction.

use crate::config::ParserConfig;
use crate::extract::{ExtractMode, ExtractionContext, ExtractionEngine};
use crate::image::{parse_image_result, ImageCodec};
use crate::monitor::{MonitorStart, MonitorSupervisor, SensorSource};
use crate::normalize::parse_numeric;
use crate::profile::{Quantifier, ReportingOverrides, TestRunRequest};
use crate::reduce::{reduce_trials, DisplayFormat, EndResult, ResultBuffer, TrialResult};
use crate::rules::RuleDocument;
use crate::stats::format_number;
use crate::streams::{self, StreamKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Description attached to auxiliary frame-time results.
pub const FRAME_TIME_DESCRIPTION: &str = "Total Frame Time";

#[derive(Debug)]
pub enum ParseError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Rules {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ParseError::Rules { path, source } => {
                write!(f, "invalid rule document {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Read { source, .. } => Some(source),
            ParseError::Rules { source, .. } => Some(source),
        }
    }
}

/// Load a rule document from a TOML file.
pub fn load_rules(path: &Path) -> Result<RuleDocument, ParseError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ParseError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ParseError::Rules {
        path: path.to_path_buf(),
        source: e,
    })
}

/// What one trial contributed to the result buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrialOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub overrides: ReportingOverrides,
}

/// A secondary result linked to the test run, e.g. the per-frame time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuxiliaryResult {
    pub source: String,
    pub description: String,
    pub scale: String,
    pub proportion: String,
    pub display_format: DisplayFormat,
    pub value: String,
}

pub struct ResultParser {
    config: ParserConfig,
    codec: Option<Arc<dyn ImageCodec>>,
}

impl ResultParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            codec: None,
        }
    }

    /// Enable IMAGE_COMPARISON parsing with the host's image codec.
    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// A run-scoped sensor monitor supervisor configured from this parser.
    pub fn monitor(&self, source: Arc<dyn SensorSource>) -> MonitorSupervisor {
        MonitorSupervisor::new(source, &self.config.monitor, &self.config.validation)
    }

    /// Launch the sensor monitors the run's profile declares, resolving file
    /// channels against the profile's install directory. A profile without a
    /// rule document starts nothing.
    pub fn start_monitors(
        &self,
        run: &TestRunRequest,
        supervisor: &mut MonitorSupervisor,
    ) -> MonitorStart {
        let Some(rules) = run.profile.rules.as_ref() else {
            return MonitorStart::default();
        };
        supervisor.start(&rules.system_monitor, &run.profile.install_dir)
    }

    /// Parse one trial's log file into `buffer`. An unreadable log leaves the
    /// trial without a result.
    pub fn parse_trial(
        &self,
        run: &TestRunRequest,
        log_path: &Path,
        buffer: &mut ResultBuffer,
    ) -> TrialOutcome {
        if run.profile.display_format == DisplayFormat::ImageComparison {
            return self.parse_output(run, "", buffer);
        }
        match std::fs::read_to_string(log_path) {
            Ok(output) => self.parse_output(run, &output, buffer),
            Err(e) => {
                tracing::warn!(
                    test = %run.profile.identifier,
                    log = %log_path.display(),
                    error = %e,
                    "failed to read test log, trial has no result"
                );
                TrialOutcome::default()
            }
        }
    }

    /// Parse one trial's raw output into `buffer`.
    pub fn parse_output(
        &self,
        run: &TestRunRequest,
        output: &str,
        buffer: &mut ResultBuffer,
    ) -> TrialOutcome {
        let outcome = self.evaluate(run, output);
        if let Some(value) = &outcome.value {
            buffer.push(TrialResult::new(value.clone()));
        }
        if let Some(min) = outcome.min {
            buffer.push_min(min);
        }
        if let Some(max) = outcome.max {
            buffer.push_max(max);
        }
        outcome
    }

    fn evaluate(&self, run: &TestRunRequest, output: &str) -> TrialOutcome {
        let mut outcome = TrialOutcome::default();
        let profile = &run.profile;
        let Some(rules) = profile.rules.as_ref() else {
            tracing::debug!(test = %profile.identifier, "no rule document, test left unmeasured");
            return outcome;
        };
        let full_arguments = run.full_arguments();

        match profile.display_format {
            DisplayFormat::ImageComparison => {
                let Some(codec) = self.codec.as_deref() else {
                    tracing::warn!(test = %profile.identifier, "no image codec available");
                    return outcome;
                };
                outcome.value = parse_image_result(
                    &rules.image_parser,
                    codec,
                    &profile.install_dir,
                    &full_arguments,
                )
                .map(|path| path.display().to_string());
            }
            DisplayFormat::PassFail | DisplayFormat::MultiPassFail => {
                let ctx = context(run, &full_arguments, None, ExtractMode::Generic);
                if let Some(found) = ExtractionEngine::new(&rules.results_parser).extract(output, &ctx) {
                    outcome.value = Some(pass_fail_token(&found.value));
                    outcome.overrides = found.overrides;
                }
            }
            format => {
                let engine = ExtractionEngine::new(&rules.results_parser);
                let ctx = context(run, &full_arguments, None, ExtractMode::Numeric);
                if let Some(found) = engine.extract(output, &ctx) {
                    outcome.value = Some(found.value);
                    outcome.overrides = found.overrides;
                }

                let numeric = outcome.value.as_deref().and_then(parse_numeric).is_some();
                if format == DisplayFormat::BarGraph && !numeric {
                    tracing::debug!(test = %profile.identifier, value = ?outcome.value, "non-numeric bar graph result dropped");
                    outcome.value = None;
                    return outcome;
                }

                for quantifier in [Quantifier::Min, Quantifier::Max] {
                    let ctx = context(run, &full_arguments, Some(quantifier), ExtractMode::Numeric);
                    let Some(found) = engine.extract(output, &ctx) else {
                        continue;
                    };
                    let Some(value) = parse_numeric(&found.value) else {
                        continue;
                    };
                    outcome.overrides.merge(found.overrides);
                    match quantifier {
                        Quantifier::Min => outcome.min = Some(value),
                        _ => outcome.max = Some(value),
                    }
                }
            }
        }

        tracing::debug!(test = %profile.identifier, value = ?outcome.value, "trial parsed");
        outcome
    }

    /// Auxiliary frame-time series declared by the rule document's extra
    /// data entries.
    pub fn generate_extra_data(&self, run: &TestRunRequest, log_path: &Path) -> Vec<AuxiliaryResult> {
        match std::fs::read_to_string(log_path) {
            Ok(output) => self.extra_data_from_output(run, &output),
            Err(e) => {
                tracing::warn!(log = %log_path.display(), error = %e, "failed to read test log for extra data");
                Vec::new()
            }
        }
    }

    pub fn extra_data_from_output(&self, run: &TestRunRequest, output: &str) -> Vec<AuxiliaryResult> {
        let Some(rules) = run.profile.rules.as_ref() else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for entry in &rules.extra_data {
            let Some(identifier) = entry.identifier.as_deref() else {
                continue;
            };
            let Some(kind) = StreamKind::from_identifier(identifier) else {
                tracing::debug!(identifier, "unknown extra data identifier");
                continue;
            };

            let series = kind.extract(output);
            if series.len() < self.config.extra_data.min_frame_samples {
                tracing::debug!(identifier, samples = series.len(), "too few frame samples for extra data");
                continue;
            }
            let value = streams::without_startup(&series)
                .iter()
                .map(|v| format_number(*v))
                .collect::<Vec<_>>()
                .join(",");
            results.push(AuxiliaryResult {
                source: identifier.to_string(),
                description: FRAME_TIME_DESCRIPTION.to_string(),
                scale: "Milliseconds".to_string(),
                proportion: "LIB".to_string(),
                display_format: DisplayFormat::LineGraph,
                value,
            });
        }
        results
    }

    /// Reduce the run's trials. A precision override pushed by the winning
    /// rule takes precedence over the profile's precision.
    pub fn calculate_end_result(
        &self,
        run: &TestRunRequest,
        buffer: ResultBuffer,
        overrides: &ReportingOverrides,
    ) -> EndResult {
        let profile = &run.profile;
        let precision = overrides.precision.unwrap_or(profile.result_precision);
        reduce_trials(buffer, profile.display_format, profile.result_quantifier, precision)
    }
}

fn context<'a>(
    run: &'a TestRunRequest,
    full_arguments: &'a str,
    quantifier: Option<Quantifier>,
    mode: ExtractMode,
) -> ExtractionContext<'a> {
    ExtractionContext {
        full_arguments,
        user_arguments: &run.arguments,
        quantifier,
        mode,
    }
}

/// Fold a raw pass/fail value into the tokens the reducer understands.
/// Values made only of `PASS`, `FAIL` and commas are kept as they are.
fn pass_fail_token(value: &str) -> String {
    if value.replace("PASS", "").replace("FAIL", "").replace(',', "").is_empty() {
        return value.to_string();
    }
    match value {
        "TRUE" | "PASS" | "PASSED" => "PASS".to_string(),
        _ => "FAIL".to_string(),
    }
}
