//! Declarative rule document supplied by the rule provider.
//!
//! One document per test profile. It carries the ordered extraction rules,
//! sensor monitor declarations, image parser entries and auxiliary data
//! entries. All fields are optional; absent fields deserialize to `None`.

use serde::Deserialize;

/// Parsed rule document for one test profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleDocument {
    pub results_parser: Vec<ExtractionRule>,
    pub system_monitor: Vec<SensorMonitorRule>,
    pub image_parser: Vec<ImageParserRule>,
    pub extra_data: Vec<ExtraDataRule>,
}

/// How repeated occurrences of a result in one log are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultiMatch {
    #[default]
    None,
    Average,
    ReportAll,
}

impl MultiMatch {
    pub fn is_enabled(self) -> bool {
        self != MultiMatch::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileFormat {
    Csv,
    #[serde(other)]
    Text,
}

/// One `ResultsParser` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionRule {
    pub match_arguments: Option<String>,
    pub result_key: Option<String>,
    pub template: Option<String>,
    pub result_scale: Option<String>,
    pub result_proportion: Option<String>,
    pub result_precision: Option<u32>,
    pub line_hint: Option<String>,
    pub line_before_hint: Option<String>,
    pub line_after_hint: Option<String>,
    pub result_before_string: Option<String>,
    pub result_after_string: Option<String>,
    pub divide_by: Option<String>,
    pub multiply_by: Option<String>,
    pub strip_from_result: Option<String>,
    pub strip_result_postfix: Option<String>,
    pub multi_match: MultiMatch,
    pub file_format: Option<FileFormat>,
}

/// One `SystemMonitor` entry. Values are kept as declared text and validated
/// by the supervisor, which silently skips malformed declarations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorMonitorRule {
    pub sensor: Option<String>,
    pub polling_frequency: Option<String>,
    pub report: Option<String>,
}

/// One `ImageParser` entry: crop a region out of an image the test wrote.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageParserRule {
    pub match_arguments: Option<String>,
    pub source_image: Option<String>,
    pub image_x: u32,
    pub image_y: u32,
    pub image_width: u32,
    pub image_height: u32,
}

/// One `ExtraData` entry naming a built-in auxiliary series extractor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtraDataRule {
    pub identifier: Option<String>,
}

/// True when `filter` is unset/empty or occurs in `arguments`.
pub(crate) fn arguments_match(filter: Option<&str>, arguments: &str) -> bool {
    match filter {
        Some(f) if !f.is_empty() => arguments.contains(f),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_document_from_toml() {
        let doc: RuleDocument = toml::from_str(
            r#"
[[results_parser]]
template = "Average: #_RESULT_# FPS"
multi_match = "REPORT_ALL"
file_format = "CSV"
result_precision = 3

[[results_parser]]
result_key = "PTS_TEST_ARGUMENTS"
line_hint = "Score"

[[system_monitor]]
sensor = "cpu.temp"
polling_frequency = "1"
report = "MAX"

[[extra_data]]
identifier = "libframetime-output"
"#,
        )
        .unwrap();

        assert_eq!(doc.results_parser.len(), 2);
        assert_eq!(doc.results_parser[0].multi_match, MultiMatch::ReportAll);
        assert_eq!(doc.results_parser[0].file_format, Some(FileFormat::Csv));
        assert_eq!(doc.results_parser[0].result_precision, Some(3));
        assert_eq!(doc.results_parser[1].multi_match, MultiMatch::None);
        assert_eq!(doc.system_monitor[0].report.as_deref(), Some("MAX"));
        assert!(doc.image_parser.is_empty());
        assert_eq!(
            doc.extra_data[0].identifier.as_deref(),
            Some("libframetime-output")
        );
    }

    #[test]
    fn test_unknown_file_format_is_text() {
        let rule: ExtractionRule = toml::from_str("file_format = \"XML\"").unwrap();
        assert_eq!(rule.file_format, Some(FileFormat::Text));
    }

    #[test]
    fn test_arguments_match() {
        assert!(arguments_match(None, "-x 1"));
        assert!(arguments_match(Some(""), "-x 1"));
        assert!(arguments_match(Some("-x"), "-x 1"));
        assert!(!arguments_match(Some("-y"), "-x 1"));
    }
}
