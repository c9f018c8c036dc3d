//! Result extraction and aggregation for benchmark runs.
//!
//! Raw output from an arbitrary benchmark binary is matched against a
//! declarative rule document to find the embedded numeric, pass/fail or image
//! result. Repeated trials are reduced into one reported value, and optional
//! sensor monitors sample platform metrics while the test runs.

pub mod config;
pub mod extract;
pub mod image;
pub mod monitor;
pub mod normalize;
pub mod parser;
pub mod profile;
pub mod reduce;
pub mod rules;
pub mod stats;
pub mod streams;
pub mod tokens;

pub use config::ParserConfig;
pub use parser::{AuxiliaryResult, ParseError, ResultParser, TrialOutcome};
pub use profile::{Quantifier, ReportingOverrides, TestProfile, TestRunRequest};
pub use reduce::{DisplayFormat, EndResult, ResultBuffer};
pub use rules::RuleDocument;
