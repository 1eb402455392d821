use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use cutoffs::{check_metric_cutoffs, format_cutoff_failures, parse_metric_cutoff};
use helpers::{load_predictions, load_tool_schemas, write_json, write_jsonl};
use preprocessing::{
    EvalData, MultiTurnEvalData, dataset_tool_schemas, group_predictions, parse_dataset_jsonl,
    prepare_eval_data, prepare_multi_turn_eval_data,
};

// Public re-exports for external consumers
pub use error::EvaluationError;
pub use metrics::{EvalResult, evaluate_function_calls};
pub use multi_turn::{ConversationEvalResult, evaluate_multi_turn};
pub use schema::{ToolSchemas, extract_tool_schemas};

pub mod cutoffs;
pub mod error;
pub mod helpers;
pub mod metrics;
pub mod multi_turn;
pub mod preprocessing;
pub mod schema;
pub mod stats;
pub mod tool_call;

/// Share of dataset records evaluated when neither the CLI nor the defaults file sets one.
pub const DEFAULT_TEST_RATIO: f64 = 0.2;

#[derive(clap::ValueEnum, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[clap(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Jsonl,
    #[default]
    Pretty,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the JSONL chat dataset (`system_prompt`, `messages`, optional `tools`).
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,

    /// Path to model outputs as JSONL (`{"output": "..."}`), one line per
    /// assistant turn in dataset order.
    #[arg(short, long)]
    pub predictions: Option<PathBuf>,

    /// JSON file with tool schemas. Overrides the tools found in the dataset.
    #[arg(long)]
    pub tools_file: Option<PathBuf>,

    /// Share of leading dataset records to evaluate. Defaults to 0.2.
    #[arg(long)]
    pub test_ratio: Option<f64>,

    /// Score turns grouped by conversation and report multi-turn metrics.
    #[arg(long)]
    pub multi_turn: bool,

    #[arg(short, long, default_value = "pretty")]
    pub format: OutputFormat,

    /// Where to write per-turn results as JSONL. Metrics are written next to
    /// it with a `.metrics.json` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Where to write prompt/label pairs as JSONL for running inference elsewhere.
    #[arg(long)]
    pub prompts_out: Option<PathBuf>,

    /// Minimum (or, for `error_cascade_rate`, maximum) acceptable metric values.
    /// Format: metric_name=cutoff, comma-separated for multiple metrics.
    /// Example: --cutoff exact_match=0.8,turn_level_accuracy=0.7
    #[arg(long = "cutoff", value_parser = parse_metric_cutoff, value_delimiter = ',', num_args = 0..)]
    pub cutoffs: Vec<(String, f64)>,
}

/// Values read from `~/.toolcall_eval_defaults.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct EvalDefaults {
    pub dataset: Option<PathBuf>,
    pub tools_file: Option<PathBuf>,
    pub test_ratio: Option<f64>,
}

impl Args {
    /// Fills in whatever was not given on the command line.
    pub fn apply_defaults(&mut self, defaults: EvalDefaults) {
        if self.dataset.is_none() {
            self.dataset = defaults.dataset;
        }
        if self.tools_file.is_none() {
            self.tools_file = defaults.tools_file;
        }
        if self.test_ratio.is_none() {
            self.test_ratio = defaults.test_ratio;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub evaluation_run_id: Uuid,
    pub num_samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_conversations: Option<usize>,
}

/// Evaluation pairs, flat or grouped by conversation.
#[derive(Clone, Debug, PartialEq)]
pub enum PreparedData {
    SingleTurn(EvalData),
    MultiTurn(MultiTurnEvalData),
}

/// One assistant turn as written to the prompts and results files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<usize>,
    pub prompt: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PreparedData {
    pub fn num_samples(&self) -> usize {
        match self {
            PreparedData::SingleTurn(data) => data.labels.len(),
            PreparedData::MultiTurn(data) => data.conversation_labels.iter().map(Vec::len).sum(),
        }
    }

    /// Turns in flattened order, without outputs.
    pub fn turn_records(&self) -> Vec<TurnRecord> {
        match self {
            PreparedData::SingleTurn(data) => data
                .prompts
                .iter()
                .zip(&data.labels)
                .map(|(prompt, label)| TurnRecord {
                    conversation: None,
                    turn: None,
                    prompt: prompt.clone(),
                    label: label.clone(),
                    output: None,
                })
                .collect(),
            PreparedData::MultiTurn(data) => data
                .conversation_prompts
                .iter()
                .zip(&data.conversation_labels)
                .enumerate()
                .flat_map(|(conversation, (prompts, labels))| {
                    prompts
                        .iter()
                        .zip(labels)
                        .enumerate()
                        .map(move |(turn, (prompt, label))| TurnRecord {
                            conversation: Some(conversation),
                            turn: Some(turn),
                            prompt: prompt.clone(),
                            label: label.clone(),
                            output: None,
                        })
                })
                .collect(),
        }
    }
}

/// Scores for a run, in the shape that matches how the data was prepared.
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationReport {
    SingleTurn(EvalResult),
    MultiTurn(ConversationEvalResult),
}

impl EvaluationReport {
    pub fn to_dict(&self) -> Value {
        match self {
            EvaluationReport::SingleTurn(result) => result.to_dict(),
            EvaluationReport::MultiTurn(result) => result.to_dict(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            EvaluationReport::SingleTurn(result) => result.summary(),
            EvaluationReport::MultiTurn(result) => result.summary(),
        }
    }
}

/// Scores flat `predictions` against `data`.
pub fn evaluate_predictions(
    data: &PreparedData,
    predictions: Vec<String>,
    tool_schemas: Option<&ToolSchemas>,
) -> Result<EvaluationReport> {
    let report = match data {
        PreparedData::SingleTurn(data) => EvaluationReport::SingleTurn(evaluate_function_calls(
            &data.labels,
            &predictions,
            tool_schemas,
        )?),
        PreparedData::MultiTurn(data) => {
            let grouped = group_predictions(predictions, &data.conversation_labels)?;
            EvaluationReport::MultiTurn(evaluate_multi_turn(
                &data.conversation_labels,
                &grouped,
                tool_schemas,
            )?)
        }
    };
    Ok(report)
}

/// Runs an evaluation from the CLI arguments.
///
/// 1. Loads the dataset and builds prompt/label pairs from the leading
///    `test_ratio` share of records (grouped by conversation with `--multi-turn`).
/// 2. Resolves tool schemas: `--tools-file` if given, else the dataset's tools.
/// 3. Writes prompt/label pairs to `--prompts-out` if given.
/// 4. If `--predictions` is given, scores them, writes the report to `writer`
///    and the optional `--output` files, then checks `--cutoff` thresholds.
///
/// Returns `Err` on unreadable inputs, mismatched prediction counts, or
/// failed cutoffs.
#[instrument(skip_all, fields(evaluation_run_id = %evaluation_run_id, multi_turn = args.multi_turn))]
pub fn run_evaluation(args: Args, evaluation_run_id: Uuid, mut writer: impl Write) -> Result<()> {
    let dataset_path = args.dataset.as_deref().ok_or_else(|| {
        anyhow!("--dataset must be provided either as a CLI arg or in ~/.toolcall_eval_defaults.toml")
    })?;
    if args.predictions.is_none() && args.prompts_out.is_none() {
        bail!("Nothing to do: provide --predictions to score, or --prompts-out to export prompts");
    }
    let test_ratio = args.test_ratio.unwrap_or(DEFAULT_TEST_RATIO);

    info!(dataset = %dataset_path.display(), test_ratio, "Loading dataset");
    let content = fs::read_to_string(dataset_path)
        .map_err(|e| anyhow!("Failed to read dataset {}: {e}", dataset_path.display()))?;
    let records = parse_dataset_jsonl(&content)?;

    let (data, dataset_schemas) = if args.multi_turn {
        let mut data = prepare_multi_turn_eval_data(&records, test_ratio)?;
        let schemas = data.tool_schemas.take();
        (PreparedData::MultiTurn(data), schemas)
    } else {
        let data = prepare_eval_data(&records, test_ratio)?;
        (PreparedData::SingleTurn(data), dataset_tool_schemas(&records))
    };
    let tool_schemas = match &args.tools_file {
        Some(path) => Some(load_tool_schemas(path)?),
        None => dataset_schemas,
    };
    info!(
        num_samples = data.num_samples(),
        schemas_provided = tool_schemas.is_some(),
        "Evaluation data prepared"
    );

    let run_info = RunInfo {
        evaluation_run_id,
        num_samples: data.num_samples(),
        num_conversations: match &data {
            PreparedData::SingleTurn(_) => None,
            PreparedData::MultiTurn(data) => Some(data.conversation_labels.len()),
        },
    };
    write_run_info(&mut writer, &run_info, &args.format)?;

    let turns = data.turn_records();
    if let Some(path) = &args.prompts_out {
        write_jsonl(path, &turns)?;
        info!(path = %path.display(), num_prompts = turns.len(), "Wrote prompts");
    }

    let Some(predictions_path) = &args.predictions else {
        return Ok(());
    };
    let predictions = load_predictions(predictions_path)?;
    let report = evaluate_predictions(&data, predictions.clone(), tool_schemas.as_ref())?;
    let metrics = report.to_dict();

    match args.format {
        OutputFormat::Jsonl => writeln!(writer, "{}", serde_json::to_string(&metrics)?)?,
        OutputFormat::Pretty => writeln!(writer, "{}", report.summary())?,
    }

    if let Some(path) = &args.output {
        write_results(path, turns, predictions, &metrics, evaluation_run_id)?;
    }

    let failures = check_metric_cutoffs(&metrics, &args.cutoffs)?;
    if args.format == OutputFormat::Pretty {
        for failure in &failures {
            writeln!(
                writer,
                "Failed cutoff for metric {} ({:.2}, got {:.2})",
                failure.metric, failure.cutoff, failure.actual
            )?;
        }
    }
    if !failures.is_empty() {
        let failure_messages = format_cutoff_failures(&failures);
        bail!("Failed cutoffs for metrics: {failure_messages}");
    }

    Ok(())
}

/// Writes per-turn results to `path` and the metrics to its `.metrics.json` sibling.
fn write_results(
    path: &Path,
    turns: Vec<TurnRecord>,
    predictions: Vec<String>,
    metrics: &Value,
    evaluation_run_id: Uuid,
) -> Result<()> {
    let results = turns
        .into_iter()
        .zip(predictions)
        .map(|(turn, output)| TurnRecord {
            output: Some(output),
            ..turn
        });
    write_jsonl(path, results)?;

    let mut metrics = metrics.clone();
    if let Some(map) = metrics.as_object_mut() {
        map.insert(
            "evaluation_run_id".to_string(),
            Value::String(evaluation_run_id.to_string()),
        );
    }
    let metrics_path = path.with_extension("metrics.json");
    write_json(&metrics_path, &metrics)?;
    info!(
        results = %path.display(),
        metrics = %metrics_path.display(),
        "Wrote evaluation results"
    );
    Ok(())
}

fn write_run_info(
    writer: &mut impl Write,
    run_info: &RunInfo,
    format: &OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            writeln!(writer, "{}", serde_json::to_string(run_info)?)?;
        }
        OutputFormat::Pretty => {
            writeln!(writer, "Run ID: {}", run_info.evaluation_run_id)?;
            writeln!(writer, "Number of samples: {}", run_info.num_samples)?;
            if let Some(num_conversations) = run_info.num_conversations {
                writeln!(writer, "Number of conversations: {num_conversations}")?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "toolcall-evaluations",
            "--dataset",
            "data.jsonl",
            "--multi-turn",
            "--format",
            "jsonl",
            "--cutoff",
            "exact_match=0.8,turn_level_accuracy=0.5",
        ])
        .unwrap();
        assert_eq!(args.dataset, Some(PathBuf::from("data.jsonl")));
        assert!(args.multi_turn);
        assert_eq!(args.format, OutputFormat::Jsonl);
        assert_eq!(args.test_ratio, None);
        assert_eq!(
            args.cutoffs,
            vec![
                ("exact_match".to_string(), 0.8),
                ("turn_level_accuracy".to_string(), 0.5),
            ]
        );

        assert!(Args::try_parse_from(["toolcall-evaluations", "--cutoff", "exact_match"]).is_err());
    }

    #[test]
    fn test_apply_defaults() {
        let mut args =
            Args::try_parse_from(["toolcall-evaluations", "--test-ratio", "0.5"]).unwrap();
        args.apply_defaults(EvalDefaults {
            dataset: Some(PathBuf::from("default.jsonl")),
            tools_file: None,
            test_ratio: Some(0.1),
        });
        assert_eq!(args.dataset, Some(PathBuf::from("default.jsonl")));
        // CLI values win
        assert_eq!(args.test_ratio, Some(0.5));
    }

    #[test]
    fn test_turn_records_multi_turn() {
        let data = PreparedData::MultiTurn(MultiTurnEvalData {
            conversation_prompts: vec![vec!["p0".into(), "p1".into()], vec!["q0".into()]],
            conversation_labels: vec![vec!["l0".into(), "l1".into()], vec!["m0".into()]],
            tool_schemas: None,
        });
        let records = data.turn_records();
        assert_eq!(data.num_samples(), 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].conversation, Some(1));
        assert_eq!(records[2].turn, Some(0));
        assert_eq!(records[1].label, "l1");

        let line = serde_json::to_string(&records[0]).unwrap();
        assert_eq!(line, r#"{"conversation":0,"turn":0,"prompt":"p0","label":"l0"}"#);
    }

    #[test]
    fn test_evaluate_predictions_mismatch() {
        let data = PreparedData::SingleTurn(EvalData {
            prompts: vec!["p".into()],
            labels: vec!["l".into()],
        });
        assert!(evaluate_predictions(&data, vec![], None).is_err());
    }
}
