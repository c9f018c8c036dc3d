use clap::{Parser, Subcommand};
use resultsmith::parser::load_rules;
use resultsmith::{
    AuxiliaryResult, DisplayFormat, EndResult, ParserConfig, Quantifier, ReportingOverrides,
    ResultBuffer, ResultParser, TestProfile, TestRunRequest, TrialOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Extract benchmark results from raw test logs using declarative rules, and
/// reduce repeated trials into one reported value.
#[derive(Parser, Debug)]
#[command(name = "resultsmith", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "resultsmith.toml", global = true)]
    config: PathBuf,

    /// Extra logging (rule decisions, candidate lines, dropped values)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse one or more trial logs of a test run and print the end result as JSON
    Parse {
        /// Rule document (TOML)
        #[arg(long)]
        rules: PathBuf,

        /// Display format, e.g. BAR_GRAPH, PASS_FAIL, LINE_GRAPH
        #[arg(long, default_value = "BAR_GRAPH")]
        display_format: String,

        /// Statistic for quantified results: MIN, MAX or AVG
        #[arg(long)]
        quantifier: Option<String>,

        /// Arguments the test was invoked with
        #[arg(long, default_value = "")]
        arguments: String,

        /// Default precision for averaged results
        #[arg(long, default_value_t = 2)]
        precision: u32,

        /// Directory image artifacts are resolved against (default: current dir)
        #[arg(long)]
        install_dir: Option<PathBuf>,

        /// Trial logs, one per invocation
        #[arg(required = true, value_name = "LOG")]
        logs: Vec<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct Report {
    test: String,
    end_result: EndResult,
    overrides: ReportingOverrides,
    trials: Vec<TrialOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    auxiliary: Vec<AuxiliaryResult>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match ParserConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Parse {
            rules,
            display_format,
            quantifier,
            arguments,
            precision,
            install_dir,
            logs,
        } => {
            let rules = match load_rules(&rules) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let quantifier = match quantifier.as_deref().map(|q| (q, Quantifier::parse(q))) {
                None => None,
                Some((_, Some(q))) => Some(q),
                Some((raw, None)) => {
                    eprintln!("error: unknown quantifier {raw:?} (expected MIN, MAX or AVG)");
                    return ExitCode::FAILURE;
                }
            };

            let test = run_name(&logs);
            let mut profile = TestProfile::new(test.clone(), DisplayFormat::parse(&display_format));
            profile.result_quantifier = quantifier;
            profile.result_precision = precision;
            if let Some(dir) = install_dir {
                profile.install_dir = dir;
            }
            profile.rules = Some(rules);
            let run = TestRunRequest::new(profile, arguments);

            let parser = ResultParser::new(config);
            let mut buffer = ResultBuffer::new();
            let mut overrides = ReportingOverrides::default();
            let mut trials = Vec::with_capacity(logs.len());
            for log in &logs {
                let outcome = parser.parse_trial(&run, log, &mut buffer);
                overrides.merge(outcome.overrides.clone());
                trials.push(outcome);
            }

            let auxiliary = logs
                .last()
                .map(|log| parser.generate_extra_data(&run, log))
                .unwrap_or_default();
            let end_result = parser.calculate_end_result(&run, buffer, &overrides);
            tracing::info!(
                test = %test,
                trials = trials.len(),
                value = ?end_result.value,
                "test run parsed"
            );

            let report = Report {
                test,
                end_result,
                overrides,
                trials,
                auxiliary,
            };
            match serde_json::to_string_pretty(&report) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: failed to serialize report: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Name the run after the first log's parent directory, or the log itself.
fn run_name(logs: &[PathBuf]) -> String {
    logs.first()
        .and_then(|log| {
            log.parent()
                .and_then(|p| p.file_name())
                .or_else(|| log.file_stem())
        })
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}
