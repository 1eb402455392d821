//! Pass/fail thresholds on the reported metrics.

use anyhow::{Result, anyhow, bail};
use serde_json::Value;

use crate::metrics::SCHEMA_NOT_APPLICABLE;

/// Whether a metric improves as it grows or as it shrinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricOptimize {
    Max,
    Min,
}

/// Returns how `metric` is optimized, or `None` if it can't carry a cutoff.
///
/// Counts and `first_failure_turn_avg` are descriptive only.
pub fn metric_optimize(metric: &str) -> Option<MetricOptimize> {
    match metric {
        "exact_match"
        | "relevance_detection_f1"
        | "tool_selection"
        | "param_name_recall"
        | "param_name_precision"
        | "params_value_accuracy"
        | "schema_valid_rate"
        | "turn_level_accuracy"
        | "conversation_success_rate" => Some(MetricOptimize::Max),
        "error_cascade_rate" => Some(MetricOptimize::Min),
        _ => None,
    }
}

/// A metric that missed its cutoff.
#[derive(Clone, Debug, PartialEq)]
pub struct CutoffFailure {
    pub metric: String,
    pub cutoff: f64,
    pub actual: f64,
}

/// Parse a single cutoff in format "metric_name=cutoff"
pub fn parse_metric_cutoff(s: &str) -> Result<(String, f64), String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Cutoff cannot be empty".to_string());
    }

    let Some((metric, cutoff)) = s.split_once('=') else {
        return Err(format!(
            "Invalid cutoff format: '{s}'. Expected format: metric_name=cutoff"
        ));
    };
    let metric = metric.trim();
    if metric.is_empty() {
        return Err(format!("Missing metric name in cutoff '{s}'"));
    }

    let cutoff = cutoff
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("Invalid cutoff value '{cutoff}': {e}"))?;
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(format!("Cutoff value must be within [0, 1], got {cutoff}"));
    }

    Ok((metric.to_string(), cutoff))
}

/// Looks up a metric by name in a metrics mapping.
///
/// Dotted names address nested mappings (`aggregated.exact_match`). A bare
/// name missing at the top level falls back to the `aggregated` mapping of a
/// multi-turn report.
fn lookup_metric<'a>(metrics: &'a Value, metric: &str) -> Option<&'a Value> {
    let pointer = format!("/{}", metric.replace('.', "/"));
    metrics.pointer(&pointer).or_else(|| {
        metrics
            .get("aggregated")
            .and_then(|aggregated| aggregated.pointer(&pointer))
    })
}

/// Checks each cutoff against the metrics mapping produced by `to_dict()`.
///
/// Fails outright on metric names that are unknown or can't carry a cutoff,
/// and on a `schema_valid_rate` cutoff when no schema was provided.
pub fn check_metric_cutoffs(
    metrics: &Value,
    cutoffs: &[(String, f64)],
) -> Result<Vec<CutoffFailure>> {
    let mut failures = Vec::new();

    for (metric, cutoff) in cutoffs {
        let leaf = metric.rsplit('.').next().unwrap_or(metric);
        let optimize = metric_optimize(leaf)
            .ok_or_else(|| anyhow!("Metric `{metric}` does not support cutoffs"))?;
        let actual = lookup_metric(metrics, metric)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("Metric `{metric}` not found in results"))?;

        if leaf == "schema_valid_rate" && actual == SCHEMA_NOT_APPLICABLE {
            bail!("Cutoff on `{metric}` requires tool schemas, but none were provided");
        }

        let failed = match optimize {
            MetricOptimize::Max => actual < *cutoff,
            MetricOptimize::Min => actual > *cutoff,
        };
        if failed {
            failures.push(CutoffFailure {
                metric: metric.clone(),
                cutoff: *cutoff,
                actual,
            });
        }
    }

    Ok(failures)
}

/// Formats a list of cutoff failures into a human-readable string
pub fn format_cutoff_failures(failures: &[CutoffFailure]) -> String {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{} (cutoff: {:.2}, got: {:.2})",
                failure.metric, failure.cutoff, failure.actual
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
