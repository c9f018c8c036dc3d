//! Extraction rule engine.
//!
//! Each rule carries a *template*: a sample of the benchmark's output with the
//! result replaced by a placeholder such as `#_RESULT_#`. The template is
//! never parsed for data. It teaches the engine two things: how to find the
//! candidate line in the real output (the search key or a line hint) and which
//! token on that line holds the value (the positional index, or a
//! before/after anchor).
//!
//! Rules are tried in declared order and the first one whose normalized value
//! set is non-empty wins.

use crate::normalize::{parse_numeric, Normalizer};
use crate::profile::{Quantifier, ReportingOverrides};
use crate::rules::{arguments_match, ExtractionRule, FileFormat, MultiMatch};
use crate::stats::{self, format_number};
use crate::streams::{self, StreamKind};
use crate::tokens::{self, Separators};

/// Result-key sentinel: substitute the full invocation arguments.
pub const KEY_TEST_ARGUMENTS: &str = "PTS_TEST_ARGUMENTS";
/// Result-key sentinel: substitute the user-selected arguments.
pub const KEY_USER_ARGUMENTS: &str = "PTS_USER_SET_ARGUMENTS";

/// Tokens skipped when scanning forward from an "after" anchor.
const AFTER_ANCHOR_FILLER: [&str; 4] = [":", ",", "-", "="];

/// Whether extracted values must be numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Numeric,
    /// Pass/fail tokens and other free text.
    Generic,
}

/// Per-invocation inputs to the engine.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionContext<'a> {
    /// Full argument string (defaults, user, post).
    pub full_arguments: &'a str,
    pub user_arguments: &'a str,
    /// Set when the profile asks for a specific statistic (MIN/MAX/AVG).
    pub quantifier: Option<Quantifier>,
    pub mode: ExtractMode,
}

/// The winning rule's value plus the reporting overrides it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: String,
    pub overrides: ReportingOverrides,
}

/// How the candidate line is located in the real output.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineLocator {
    /// The hint is on the line before the result.
    FollowsHint(String),
    /// The hint is on the line after the result.
    PrecedesHint(String),
    /// The result is on the line containing the key.
    SearchKey(String),
    /// Template line starts with the placeholder: nothing to search for.
    WholeOutput,
}

/// Ways of picking the value token out of a tokenized candidate line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    /// Token immediately preceding the anchor token.
    BeforeAnchor(String),
    /// First non-filler token following the anchor token.
    AfterAnchor(String),
    /// Token at the placeholder's index in the template line.
    Positional(usize),
}

impl Strategy {
    fn pick(&self, tokens: &[String]) -> Option<String> {
        match self {
            Strategy::BeforeAnchor(anchor) => {
                let at = tokens::position(tokens, anchor)?;
                at.checked_sub(1).map(|i| tokens[i].clone())
            }
            Strategy::AfterAnchor(anchor) => {
                let at = tokens::position(tokens, anchor)?;
                tokens[at + 1..]
                    .iter()
                    .find(|t| !AFTER_ANCHOR_FILLER.contains(&t.as_str()))
                    .cloned()
            }
            Strategy::Positional(i) => tokens.get(*i).cloned(),
        }
    }
}

/// What the engine learned from a rule's template.
#[derive(Debug, Clone)]
struct TemplatePattern {
    separators: Separators,
    locator: Option<LineLocator>,
    position: Option<usize>,
}

/// Applies an ordered list of extraction rules to raw output.
pub struct ExtractionEngine<'a> {
    rules: &'a [ExtractionRule],
}

impl<'a> ExtractionEngine<'a> {
    pub fn new(rules: &'a [ExtractionRule]) -> Self {
        Self { rules }
    }

    /// Run the rules against one trial's output. Returns the first rule's
    /// aggregated value, or `None` when no rule produced one.
    pub fn extract(&self, output: &str, ctx: &ExtractionContext<'_>) -> Option<Extraction> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !arguments_match(rule.match_arguments.as_deref(), ctx.full_arguments) {
                tracing::debug!(rule = index, "rule skipped: arguments do not match");
                continue;
            }

            let raw = match self.raw_values(rule, output, ctx) {
                Ok(raw) => raw,
                Err(Abort) => {
                    tracing::debug!(
                        rule = index,
                        quantifier = ?ctx.quantifier,
                        "placeholder missing from quantified template, giving up"
                    );
                    return None;
                }
            };

            let normalizer = Normalizer::from_rule(rule, ctx.mode == ExtractMode::Numeric);
            let values: Vec<String> = raw.iter().filter_map(|v| normalizer.apply(v)).collect();
            if values.is_empty() {
                tracing::debug!(rule = index, raw = raw.len(), "rule yielded no values");
                continue;
            }

            let Some(value) = aggregate(&values, rule.multi_match, ctx.mode) else {
                continue;
            };
            tracing::debug!(rule = index, value = %value, "rule matched");
            return Some(Extraction {
                value,
                overrides: ReportingOverrides {
                    scale: rule.result_scale.clone(),
                    proportion: rule.result_proportion.clone(),
                    precision: rule.result_precision,
                },
            });
        }
        None
    }

    /// Raw (un-normalized) values one rule finds in the output.
    fn raw_values(
        &self,
        rule: &ExtractionRule,
        output: &str,
        ctx: &ExtractionContext<'_>,
    ) -> Result<Vec<String>, Abort> {
        let template = rule.template.as_deref().unwrap_or("");
        let stream = StreamKind::from_template(template);
        let key = placeholder(rule, ctx);
        let key_pos = template.rfind(&key);

        if ctx.quantifier.is_some() && key_pos.is_none() && stream.is_none() {
            return Err(Abort);
        }

        if let Some(kind) = stream {
            let series = kind.extract(output);
            return Ok(streams::frame_rate(&series, ctx.quantifier)
                .map(format_number)
                .into_iter()
                .collect());
        }

        let pattern = analyze_template(rule, template, &key, key_pos);
        let Some(locator) = &pattern.locator else {
            tracing::debug!("no search key, line hint or leading placeholder in template");
            return Ok(Vec::new());
        };
        let strategies = strategies(rule, pattern.position);

        let mut remaining = output.to_string();
        let mut values = Vec::new();
        loop {
            let found = values.len();
            let Some((line, rest)) = next_candidate(locator, &remaining) else {
                break;
            };
            remaining = rest;
            tracing::debug!(line = %line, "candidate result line");
            if let Some(value) = pick_value(&line, pattern.separators, &strategies) {
                values.push(value);
            }
            if !rule.multi_match.is_enabled() || values.len() == found || remaining.is_empty() {
                break;
            }
        }
        Ok(values)
    }
}

/// Marker: a quantified rule's template lacks its placeholder.
#[derive(Debug)]
struct Abort;

/// Resolve the placeholder token a rule's template uses.
fn placeholder(rule: &ExtractionRule, ctx: &ExtractionContext<'_>) -> String {
    let prefix = ctx.quantifier.map(Quantifier::prefix).unwrap_or("");
    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    match rule.result_key.as_deref() {
        None | Some("") => format!("#_{prefix}RESULT_#"),
        Some(KEY_TEST_ARGUMENTS) => format!("#_{prefix}{}_#", squash(ctx.full_arguments)),
        Some(KEY_USER_ARGUMENTS) => format!("#_{prefix}{}_#", squash(ctx.user_arguments)),
        Some(key) => key.to_string(),
    }
}

fn analyze_template(
    rule: &ExtractionRule,
    template: &str,
    key: &str,
    key_pos: Option<usize>,
) -> TemplatePattern {
    let anchor = key_pos.unwrap_or(0);
    let key_end = (anchor + key.len()).min(template.len());

    let separators = Separators {
        comma: rule.file_format == Some(FileFormat::Csv),
        slash: key_pos.is_some_and(|p| {
            template[..p].ends_with('/') || template[key_end..].starts_with('/')
        }),
    };

    let line_end = template
        .get(key_end..)
        .and_then(|s| s.find('\n'))
        .map_or(template.len(), |i| key_end + i);
    let head = &template[..line_end];
    let template_line = &head[head.rfind('\n').map_or(0, |i| i + 1)..];
    let template_tokens = tokens::tokenize(template_line, separators);

    let position = tokens::position(&template_tokens, key)
        .or_else(|| template_tokens.iter().position(|t| t.contains(key)));

    let locator = if let Some(hint) = non_empty(&rule.line_before_hint) {
        Some(LineLocator::FollowsHint(hint.to_string()))
    } else if let Some(hint) = non_empty(&rule.line_after_hint) {
        Some(LineLocator::PrecedesHint(hint.to_string()))
    } else if let Some(search_key) = search_key(rule, template_line, &template_tokens, key) {
        Some(LineLocator::SearchKey(search_key))
    } else if template_tokens.first().map(String::as_str) == Some(key) {
        Some(LineLocator::WholeOutput)
    } else {
        None
    };

    tracing::debug!(
        template_line = %template_line.trim(),
        ?locator,
        ?position,
        "analyzed result template"
    );

    TemplatePattern {
        separators,
        locator,
        position,
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Search key priority: explicit line hint present in the template line, then
/// the first colon-suffixed token, then the text preceding the placeholder.
fn search_key(
    rule: &ExtractionRule,
    template_line: &str,
    template_tokens: &[String],
    key: &str,
) -> Option<String> {
    if let Some(hint) = non_empty(&rule.line_hint) {
        if template_line.contains(hint) {
            return Some(hint.to_string());
        }
    }
    if let Some(token) = template_tokens
        .iter()
        .find(|t| t.len() > 1 && t.contains(':'))
    {
        return Some(token.clone());
    }
    let preceding = template_line.find(key).map(|i| template_line[..i].trim())?;
    (!preceding.is_empty()).then(|| preceding.to_string())
}

/// Anchors, when declared, replace positional extraction.
fn strategies(rule: &ExtractionRule, position: Option<usize>) -> Vec<Strategy> {
    if let Some(anchor) = non_empty(&rule.result_before_string) {
        vec![Strategy::BeforeAnchor(anchor.to_string())]
    } else if let Some(anchor) = non_empty(&rule.result_after_string) {
        vec![Strategy::AfterAnchor(anchor.to_string())]
    } else {
        position.map(Strategy::Positional).into_iter().collect()
    }
}

/// Try each strategy in order; if none yields a value and the line has a
/// colon, retry once with a space inserted after every colon.
fn pick_value(line: &str, separators: Separators, strategies: &[Strategy]) -> Option<String> {
    let attempt = |line: &str| {
        let line_tokens = tokens::tokenize(line, separators);
        strategies.iter().find_map(|s| s.pick(&line_tokens))
    };
    attempt(line).or_else(|| {
        if line.contains(':') {
            attempt(&line.replace(':', ": "))
        } else {
            None
        }
    })
}

/// Locate the next candidate line and return it with the unconsumed output
/// preceding it.
fn next_candidate(locator: &LineLocator, output: &str) -> Option<(String, String)> {
    match locator {
        LineLocator::FollowsHint(hint) => {
            let hint_pos = output.rfind(hint.as_str())?;
            let hint_line_start = line_start(output, hint_pos);
            let next_start = hint_pos + output[hint_pos..].find('\n')? + 1;
            let line = &output[next_start..line_end(output, next_start)];
            Some((line.to_string(), output[..hint_line_start].to_string()))
        }
        LineLocator::PrecedesHint(hint) => {
            let hint_pos = output.rfind(hint.as_str())?;
            let hint_line_start = line_start(output, hint_pos);
            if hint_line_start == 0 {
                return None;
            }
            let prev_end = hint_line_start - 1;
            let prev_start = line_start(output, prev_end);
            let line = &output[prev_start..prev_end];
            // Single pass: nothing is left for a further match.
            Some((line.to_string(), String::new()))
        }
        LineLocator::SearchKey(key) => {
            let key_pos = output.rfind(key.trim())?;
            let start = line_start(output, key_pos);
            let line = &output[start..line_end(output, key_pos)];
            Some((line.to_string(), output[..start].to_string()))
        }
        LineLocator::WholeOutput => {
            let trimmed = output.trim();
            (!trimmed.is_empty()).then(|| (trimmed.to_string(), String::new()))
        }
    }
}

/// Byte offset where the line containing `pos` starts.
fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map_or(0, |i| i + 1)
}

/// Byte offset of the newline ending the line containing `pos` (or text end).
fn line_end(text: &str, pos: usize) -> usize {
    text[pos..].find('\n').map_or(text.len(), |i| pos + i)
}

fn aggregate(values: &[String], multi_match: MultiMatch, mode: ExtractMode) -> Option<String> {
    match (multi_match, mode) {
        (MultiMatch::ReportAll, _) => Some(values.join(",")),
        (_, ExtractMode::Numeric) => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| parse_numeric(v)).collect();
            if numbers.len() == 1 {
                return values.first().cloned();
            }
            stats::mean(&numbers).map(format_number)
        }
        (_, ExtractMode::Generic) => values.last().cloned(),
    }
}
