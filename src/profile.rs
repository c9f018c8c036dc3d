//! Test profile and run request: the per-test inputs the result parser reads,
//! plus the reporting metadata a winning extraction rule may override.

use crate::reduce::DisplayFormat;
use crate::rules::RuleDocument;
use serde::Serialize;
use std::path::PathBuf;

/// Statistic requested for quantified numeric results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quantifier {
    Min,
    Max,
    Avg,
}

impl Quantifier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIN" => Some(Quantifier::Min),
            "MAX" => Some(Quantifier::Max),
            "AVG" => Some(Quantifier::Avg),
            _ => None,
        }
    }

    /// Placeholder prefix used by quantifier-scoped rules, e.g. `MIN_`.
    pub fn prefix(self) -> &'static str {
        match self {
            Quantifier::Min => "MIN_",
            Quantifier::Max => "MAX_",
            Quantifier::Avg => "AVG_",
        }
    }
}

/// Static description of a test, as supplied by the rule provider.
#[derive(Debug, Clone)]
pub struct TestProfile {
    pub identifier: String,
    pub display_format: DisplayFormat,
    pub result_quantifier: Option<Quantifier>,
    pub default_arguments: String,
    pub default_post_arguments: String,
    /// Directory image artifacts and monitor channels are resolved against.
    pub install_dir: PathBuf,
    pub result_precision: u32,
    /// `None` disables extraction for this test entirely.
    pub rules: Option<RuleDocument>,
}

impl TestProfile {
    pub fn new(identifier: impl Into<String>, display_format: DisplayFormat) -> Self {
        Self {
            identifier: identifier.into(),
            display_format,
            result_quantifier: None,
            default_arguments: String::new(),
            default_post_arguments: String::new(),
            install_dir: PathBuf::from("."),
            result_precision: 2,
            rules: None,
        }
    }
}

/// One run of a test profile with a concrete set of user arguments.
#[derive(Debug, Clone)]
pub struct TestRunRequest {
    pub profile: TestProfile,
    /// User-selected arguments for this run.
    pub arguments: String,
}

impl TestRunRequest {
    pub fn new(profile: TestProfile, arguments: impl Into<String>) -> Self {
        Self {
            profile,
            arguments: arguments.into(),
        }
    }

    /// Full argument string the test binary was invoked with:
    /// defaults, then user arguments not already in the defaults, then post arguments.
    pub fn full_arguments(&self) -> String {
        let defaults = &self.profile.default_arguments;
        let user = if defaults.is_empty() {
            self.arguments.clone()
        } else {
            self.arguments.replace(defaults.as_str(), "")
        };
        format!(
            "{} {} {}",
            defaults, user, self.profile.default_post_arguments
        )
        .trim()
        .to_string()
    }
}

/// Reporting metadata overrides pushed by the winning extraction rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proportion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl ReportingOverrides {
    /// Later overrides win field by field.
    pub fn merge(&mut self, other: ReportingOverrides) {
        if other.scale.is_some() {
            self.scale = other.scale;
        }
        if other.proportion.is_some() {
            self.proportion = other.proportion;
        }
        if other.precision.is_some() {
            self.precision = other.precision;
        }
    }
}
