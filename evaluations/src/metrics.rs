//! Single-turn function calling metrics.
//!
//! Computes the BFCL-style metrics (`exact_match`, `relevance_detection_f1`)
//! and the Unitxt decomposition (`tool_selection`, `param_name_recall`,
//! `param_name_precision`, `params_value_accuracy`, `schema_valid_rate`)
//! in a single pass over paired label and prediction strings.
//!
//! ```
//! use toolcall_evaluations::metrics::evaluate_function_calls;
//!
//! let labels = ["<tool_call>{\"name\": \"get_cart\", \"arguments\": {\"user_id\": \"U1\"}}</tool_call>"];
//! let predictions = labels;
//! let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
//! assert_eq!(result.exact_match, 1.0);
//! assert_eq!(result.schema_valid_rate, -1.0);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{EvaluationError, Result};
use crate::schema::ToolSchemas;
use crate::stats::{RatioCounter, RelevanceCounts};
use crate::tool_call::{ToolCallPayload, is_tool_call, parse_tool_call, values_equal};

/// Value of `schema_valid_rate` when no schemas were supplied.
pub const SCHEMA_NOT_APPLICABLE: f64 = -1.0;

/// Aggregate scores over a batch of turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalResult {
    // BFCL
    pub exact_match: f64,
    pub relevance_detection_f1: f64,

    // Unitxt
    pub tool_selection: f64,
    pub param_name_recall: f64,
    pub param_name_precision: f64,
    pub params_value_accuracy: f64,
    /// In `[0, 1]`, or [`SCHEMA_NOT_APPLICABLE`] if no schemas were supplied.
    pub schema_valid_rate: f64,

    pub total_tool_call_samples: usize,
    pub total_non_tool_call_samples: usize,
    pub total_samples: usize,

    #[serde(skip)]
    pub(crate) details: EvalDetails,
}

impl Default for EvalResult {
    fn default() -> Self {
        Self {
            exact_match: 0.0,
            relevance_detection_f1: 0.0,
            tool_selection: 0.0,
            param_name_recall: 0.0,
            param_name_precision: 0.0,
            params_value_accuracy: 0.0,
            schema_valid_rate: SCHEMA_NOT_APPLICABLE,
            total_tool_call_samples: 0,
            total_non_tool_call_samples: 0,
            total_samples: 0,
            details: EvalDetails::default(),
        }
    }
}

/// Raw counters behind an [`EvalResult`], kept for debugging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalDetails {
    pub tool_selection: RatioCounter,
    pub param_name_recall: RatioCounter,
    pub param_name_precision: RatioCounter,
    pub params_value_accuracy: RatioCounter,
    pub exact_match: RatioCounter,
    pub schema_validation: RatioCounter,
    pub relevance_detection: RelevanceCounts,
}

impl EvalResult {
    pub fn details(&self) -> &EvalDetails {
        &self.details
    }

    /// Flat metric name to value mapping.
    pub fn to_dict(&self) -> Value {
        json!({
            "exact_match": self.exact_match,
            "relevance_detection_f1": self.relevance_detection_f1,
            "tool_selection": self.tool_selection,
            "param_name_recall": self.param_name_recall,
            "param_name_precision": self.param_name_precision,
            "params_value_accuracy": self.params_value_accuracy,
            "schema_valid_rate": self.schema_valid_rate,
            "total_tool_call_samples": self.total_tool_call_samples,
            "total_non_tool_call_samples": self.total_non_tool_call_samples,
            "total_samples": self.total_samples,
        })
    }

    /// Human-readable multi-line report.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

pub(crate) fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

impl fmt::Display for EvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schema = if self.schema_valid_rate >= 0.0 {
            percent(self.schema_valid_rate)
        } else {
            "N/A (no schema provided)".to_string()
        };
        writeln!(f, "=== Function Calling Evaluation Results ===")?;
        writeln!(f)?;
        writeln!(f, "[BFCL metrics]")?;
        writeln!(f, "  exact_match (ASTAcc)     : {}", percent(self.exact_match))?;
        writeln!(
            f,
            "  relevance_detection (F1) : {}",
            percent(self.relevance_detection_f1)
        )?;
        writeln!(f)?;
        writeln!(f, "[Unitxt decomposed metrics]")?;
        writeln!(f, "  tool_selection           : {}", percent(self.tool_selection))?;
        writeln!(
            f,
            "  param_name_recall        : {}",
            percent(self.param_name_recall)
        )?;
        writeln!(
            f,
            "  param_name_precision     : {}",
            percent(self.param_name_precision)
        )?;
        writeln!(
            f,
            "  params_value_accuracy    : {}",
            percent(self.params_value_accuracy)
        )?;
        writeln!(f, "  schema_valid_rate        : {schema}")?;
        writeln!(f)?;
        writeln!(f, "  ---")?;
        writeln!(
            f,
            "  tool_call samples        : {}",
            self.total_tool_call_samples
        )?;
        writeln!(
            f,
            "  non-tool_call samples    : {}",
            self.total_non_tool_call_samples
        )?;
        write!(f, "  total samples            : {}", self.total_samples)
    }
}

/// Accumulators for one scoring pass. Never outlives the call.
#[derive(Debug, Default)]
struct Counters {
    details: EvalDetails,
    tool_call_samples: usize,
    non_tool_call_samples: usize,
}

impl Counters {
    fn score_turn(&mut self, label: &str, prediction: &str, tool_schemas: Option<&ToolSchemas>) {
        let label_is_call = is_tool_call(label);
        let prediction_is_call = is_tool_call(prediction);
        let details = &mut self.details;

        if !label_is_call {
            // Only relevance detection looks at turns that need no call.
            self.non_tool_call_samples += 1;
            if prediction_is_call {
                debug!("Predicted a tool call where none was expected");
                details.relevance_detection.false_negatives += 1;
            } else {
                details.relevance_detection.true_positives += 1;
            }
            return;
        }
        self.tool_call_samples += 1;

        if !prediction_is_call {
            debug!("Predicted no tool call where one was expected");
            details.relevance_detection.false_positives += 1;
            details.tool_selection.miss(1);
            details.exact_match.miss(1);
            let missed_params = parse_tool_call(label).map_or(1, |call| call.arguments.len());
            details.param_name_recall.miss(missed_params);
            return;
        }

        let (Some(label_call), Some(prediction_call)) =
            (parse_tool_call(label), parse_tool_call(prediction))
        else {
            debug!("Tool call payload could not be parsed, scoring the turn as a miss");
            details.tool_selection.miss(1);
            details.param_name_recall.miss(1);
            details.exact_match.miss(1);
            return;
        };

        details
            .tool_selection
            .record(label_call.name == prediction_call.name);

        for name in label_call.argument_names() {
            details
                .param_name_recall
                .record(prediction_call.has_argument(name));
        }
        for name in prediction_call.argument_names() {
            details
                .param_name_precision
                .record(label_call.has_argument(name));
        }

        if let Some(values_match) = shared_values_match(&label_call, &prediction_call) {
            details.params_value_accuracy.record(values_match);
        }

        let is_exact = label_call == prediction_call;
        details.exact_match.record(is_exact);

        if let Some(schema) = tool_schemas.and_then(|schemas| schemas.get(&prediction_call.name)) {
            details
                .schema_validation
                .record(schema.validate(&prediction_call.arguments));
        }

        debug!(
            label_name = %label_call.name,
            prediction_name = %prediction_call.name,
            exact_match = is_exact,
            "Scored tool call turn"
        );
    }

    fn into_result(self, total_samples: usize, schemas_provided: bool) -> EvalResult {
        let details = self.details;
        let schema_valid_rate = if schemas_provided {
            details.schema_validation.ratio()
        } else {
            SCHEMA_NOT_APPLICABLE
        };
        EvalResult {
            exact_match: details.exact_match.ratio(),
            relevance_detection_f1: details.relevance_detection.f1(),
            tool_selection: details.tool_selection.ratio(),
            param_name_recall: details.param_name_recall.ratio(),
            param_name_precision: details.param_name_precision.ratio(),
            params_value_accuracy: details.params_value_accuracy.ratio(),
            schema_valid_rate,
            total_tool_call_samples: self.tool_call_samples,
            total_non_tool_call_samples: self.non_tool_call_samples,
            total_samples,
            details,
        }
    }
}

/// Whether every argument present on both sides has the same value.
///
/// Returns `None` if the two calls share no argument names. A single
/// mismatching value fails the whole turn.
fn shared_values_match(label: &ToolCallPayload, prediction: &ToolCallPayload) -> Option<bool> {
    let mut shared = label
        .arguments
        .iter()
        .filter_map(|(key, value)| prediction.argument(key).map(|other| (value, other)))
        .peekable();
    shared.peek()?;
    Some(shared.all(|(label_value, prediction_value)| values_equal(label_value, prediction_value)))
}

/// Scores paired label and prediction turns.
///
/// Turns whose label has no tool call only count towards relevance detection.
/// A tool call whose payload cannot be parsed is scored as wrong rather than
/// failing the batch.
///
/// `tool_schemas` enables `schema_valid_rate`; without it the rate is
/// [`SCHEMA_NOT_APPLICABLE`].
///
/// Fails with [`EvaluationError::InvalidInput`] if the two slices differ in length.
#[instrument(skip_all, fields(num_samples = labels.len(), schemas_provided = tool_schemas.is_some()))]
pub fn evaluate_function_calls<L, P>(
    labels: &[L],
    predictions: &[P],
    tool_schemas: Option<&ToolSchemas>,
) -> Result<EvalResult>
where
    L: AsRef<str>,
    P: AsRef<str>,
{
    if labels.len() != predictions.len() {
        return Err(EvaluationError::invalid_input(format!(
            "labels and predictions have different lengths: {} vs {}",
            labels.len(),
            predictions.len()
        )));
    }

    let mut counters = Counters::default();
    for (label, prediction) in labels.iter().zip(predictions) {
        counters.score_turn(label.as_ref(), prediction.as_ref(), tool_schemas);
    }

    let result = counters.into_result(labels.len(), tool_schemas.is_some());
    debug!(
        exact_match = result.exact_match,
        tool_call_samples = result.total_tool_call_samples,
        non_tool_call_samples = result.total_non_tool_call_samples,
        "Function call evaluation completed"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ToolSchema;
    use serde_json::json;

    fn call(name: &str, arguments: Value) -> String {
        format!(
            "<tool_call>\n{}\n</tool_call>",
            json!({"name": name, "arguments": arguments})
        )
    }

    #[test]
    fn test_mismatched_lengths() {
        let error = evaluate_function_calls(&["a", "b"], &["a"], None).unwrap_err();
        assert!(matches!(error, EvaluationError::InvalidInput { .. }));
    }

    #[test]
    fn test_empty_input() {
        let empty: [&str; 0] = [];
        let result = evaluate_function_calls(&empty, &empty, None).unwrap();
        assert_eq!(result.total_samples, 0);
        assert_eq!(result.exact_match, 0.0);
        assert_eq!(result.relevance_detection_f1, 0.0);
        assert_eq!(result.tool_selection, 0.0);
        assert_eq!(result.schema_valid_rate, SCHEMA_NOT_APPLICABLE);
    }

    #[test]
    fn test_params_value_accuracy_is_all_or_nothing() {
        let labels = [call("search", json!({"q": "치킨", "limit": 10, "sort": "near"}))];
        let predictions = [call("search", json!({"q": "치킨", "limit": 10, "sort": "rating"}))];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        assert_eq!(result.params_value_accuracy, 0.0);
        assert_eq!(
            result.details().params_value_accuracy,
            RatioCounter { correct: 0, total: 1 }
        );
        assert_eq!(result.param_name_recall, 1.0);
        assert_eq!(result.exact_match, 0.0);
    }

    #[test]
    fn test_params_value_accuracy_skips_disjoint_arguments() {
        let labels = [call("search", json!({"q": "치킨"}))];
        let predictions = [call("search", json!({"keyword": "치킨"}))];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        assert_eq!(result.details().params_value_accuracy.total, 0);
        assert_eq!(result.params_value_accuracy, 0.0);
        assert_eq!(result.param_name_recall, 0.0);
        assert_eq!(result.param_name_precision, 0.0);
    }

    #[test]
    fn test_numeric_values_compare_by_value() {
        let labels = [call("order", json!({"quantity": 2}))];
        let predictions = [call("order", json!({"quantity": 2.0}))];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        assert_eq!(result.params_value_accuracy, 1.0);
        assert_eq!(result.exact_match, 1.0);
    }

    #[test]
    fn test_unparseable_prediction_counts_as_miss() {
        let labels = [call("get_cart", json!({"user_id": "U1", "store": "S1"}))];
        let predictions = ["<tool_call>\n{\"name\": \"get_cart\", \"arguments\": {\n</tool_call>"];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        let details = result.details();
        assert_eq!(details.tool_selection, RatioCounter { correct: 0, total: 1 });
        assert_eq!(details.param_name_recall, RatioCounter { correct: 0, total: 1 });
        assert_eq!(details.exact_match, RatioCounter { correct: 0, total: 1 });
        assert_eq!(details.param_name_precision.total, 0);
        // Both sides are calls, so relevance detection is untouched
        assert_eq!(details.relevance_detection, RelevanceCounts::default());
        assert_eq!(result.total_tool_call_samples, 1);
    }

    #[test]
    fn test_unparseable_label_with_silent_prediction() {
        let labels = ["<tool_call>not json</tool_call>"];
        let predictions = ["주문을 확인해 드릴게요."];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        let details = result.details();
        assert_eq!(details.param_name_recall, RatioCounter { correct: 0, total: 1 });
        assert_eq!(details.relevance_detection.false_positives, 1);
    }

    #[test]
    fn test_silent_prediction_misses_every_label_param() {
        let labels = [call("search", json!({"q": "피자", "limit": 3, "sort": "near"}))];
        let predictions = ["어떤 메뉴를 찾으시나요?"];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        assert_eq!(
            result.details().param_name_recall,
            RatioCounter { correct: 0, total: 3 }
        );
        assert_eq!(result.relevance_detection_f1, 0.0);
    }

    #[test]
    fn test_relevance_detection_mixed() {
        let labels = [
            "안녕하세요".to_string(),
            "감사합니다".to_string(),
            call("get_cart", json!({})),
            "죄송합니다".to_string(),
        ];
        let predictions = [
            "안녕하세요".to_string(),
            call("get_cart", json!({})),
            "장바구니를 볼까요?".to_string(),
            "죄송합니다".to_string(),
        ];
        let result = evaluate_function_calls(&labels, &predictions, None).unwrap();
        // tp=2, fp=1, fn=1 -> precision = recall = 2/3
        assert_eq!(
            result.details().relevance_detection,
            RelevanceCounts {
                true_positives: 2,
                false_positives: 1,
                false_negatives: 1,
            }
        );
        assert!((result.relevance_detection_f1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.total_non_tool_call_samples, 3);
        assert_eq!(result.total_tool_call_samples, 1);
    }

    #[test]
    fn test_schema_only_counts_known_functions() {
        let schemas = ToolSchemas::from([(
            "search".to_string(),
            serde_json::from_value::<ToolSchema>(json!({
                "properties": {"limit": {"type": "integer"}}
            }))
            .unwrap(),
        )]);
        let labels = [
            call("search", json!({"limit": 10})),
            call("get_cart", json!({"user_id": "U1"})),
        ];
        let predictions = [
            call("search", json!({"limit": 10})),
            call("get_cart", json!({"user_id": 7})),
        ];
        let result = evaluate_function_calls(&labels, &predictions, Some(&schemas)).unwrap();
        assert_eq!(
            result.details().schema_validation,
            RatioCounter { correct: 1, total: 1 }
        );
        assert_eq!(result.schema_valid_rate, 1.0);
    }

    #[test]
    fn test_schema_supplied_but_never_matched() {
        let schemas = ToolSchemas::new();
        let labels = [call("search", json!({"q": "a"}))];
        let result = evaluate_function_calls(&labels, &labels, Some(&schemas)).unwrap();
        assert_eq!(result.schema_valid_rate, 0.0);
    }

    #[test]
    fn test_schema_uses_predicted_function_name() {
        let schemas = ToolSchemas::from([(
            "search".to_string(),
            serde_json::from_value::<ToolSchema>(json!({
                "properties": {"limit": {"type": "integer"}}
            }))
            .unwrap(),
        )]);
        let labels = [call("search", json!({"limit": 10}))];
        let predictions = [call("search_v2", json!({"limit": "ten"}))];
        let result = evaluate_function_calls(&labels, &predictions, Some(&schemas)).unwrap();
        assert_eq!(result.details().schema_validation.total, 0);
    }

    #[test]
    fn test_idempotent() {
        let labels = [call("search", json!({"q": "a", "n": 1})), "hi".to_string()];
        let predictions = [call("search", json!({"q": "b"})), call("x", json!({}))];
        let first = evaluate_function_calls(&labels, &predictions, None).unwrap();
        let second = evaluate_function_calls(&labels, &predictions, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_to_dict_keys() {
        let result = EvalResult {
            tool_selection: 0.9,
            param_name_recall: 0.8,
            ..Default::default()
        };
        let dict = result.to_dict();
        assert_eq!(dict["tool_selection"], json!(0.9));
        assert_eq!(dict["param_name_recall"], json!(0.8));
        assert_eq!(dict["schema_valid_rate"], json!(-1.0));
        let keys: Vec<&str> = dict
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(
            keys,
            [
                "exact_match",
                "relevance_detection_f1",
                "tool_selection",
                "param_name_recall",
                "param_name_precision",
                "params_value_accuracy",
                "schema_valid_rate",
                "total_tool_call_samples",
                "total_non_tool_call_samples",
                "total_samples",
            ]
        );
    }

    #[test]
    fn test_summary() {
        let result = EvalResult {
            tool_selection: 0.95,
            total_samples: 100,
            ..Default::default()
        };
        let summary = result.summary();
        assert!(summary.contains("95.00%"));
        assert!(summary.contains("100"));
        assert!(summary.contains("N/A"));

        let result = EvalResult {
            schema_valid_rate: 0.5,
            ..Default::default()
        };
        assert!(result.summary().contains("schema_valid_rate        : 50.00%"));
    }
}
