//! Multi-turn (HammerBench-style) conversation metrics.
//!
//! Every turn is scored on its own with [`evaluate_function_calls`], and the
//! per-turn verdicts are then read as a sequence per conversation to find
//! where conversations first go wrong and whether errors cascade.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::error::{EvaluationError, Result};
use crate::metrics::{EvalResult, evaluate_function_calls, percent};
use crate::schema::ToolSchemas;
use crate::stats::{RatioCounter, mean, safe_div};

/// Value of `first_failure_turn_avg` when no conversation has a failing turn.
pub const NO_FAILURE: f64 = -1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationEvalResult {
    /// Share of turns that are individually an exact match.
    pub turn_level_accuracy: f64,
    /// Share of conversations in which every turn is an exact match.
    pub conversation_success_rate: f64,
    /// Mean 0-indexed position of the first failing turn, over conversations
    /// with at least one failure. [`NO_FAILURE`] if there are none.
    pub first_failure_turn_avg: f64,
    /// Among failing turns that have a next turn, the share whose next turn also fails.
    pub error_cascade_rate: f64,

    /// Metrics over every turn of every conversation pooled together.
    pub aggregated: EvalResult,

    pub total_conversations: usize,
    pub total_turns: usize,

    /// Per-turn results in conversation order, for debugging.
    #[serde(skip)]
    pub per_turn_results: Vec<EvalResult>,
}

impl Default for ConversationEvalResult {
    fn default() -> Self {
        Self {
            turn_level_accuracy: 0.0,
            conversation_success_rate: 0.0,
            first_failure_turn_avg: NO_FAILURE,
            error_cascade_rate: 0.0,
            aggregated: EvalResult::default(),
            total_conversations: 0,
            total_turns: 0,
            per_turn_results: Vec::new(),
        }
    }
}

impl ConversationEvalResult {
    pub fn to_dict(&self) -> Value {
        json!({
            "turn_level_accuracy": self.turn_level_accuracy,
            "conversation_success_rate": self.conversation_success_rate,
            "first_failure_turn_avg": self.first_failure_turn_avg,
            "error_cascade_rate": self.error_cascade_rate,
            "total_conversations": self.total_conversations,
            "total_turns": self.total_turns,
            "aggregated": self.aggregated.to_dict(),
        })
    }

    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConversationEvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first_failure = if self.first_failure_turn_avg >= 0.0 {
            format!("{:.1}", self.first_failure_turn_avg)
        } else {
            "none (all turns correct)".to_string()
        };
        writeln!(f, "=== Multi-turn Evaluation Results (HammerBench) ===")?;
        writeln!(f)?;
        writeln!(f, "[Multi-turn metrics]")?;
        writeln!(
            f,
            "  turn_level_accuracy      : {}",
            percent(self.turn_level_accuracy)
        )?;
        writeln!(
            f,
            "  conversation_success_rate: {}",
            percent(self.conversation_success_rate)
        )?;
        writeln!(f, "  first_failure_turn_avg   : {first_failure}")?;
        writeln!(
            f,
            "  error_cascade_rate       : {}",
            percent(self.error_cascade_rate)
        )?;
        writeln!(f)?;
        writeln!(f, "  conversations: {}", self.total_conversations)?;
        writeln!(f, "  total turns  : {}", self.total_turns)?;
        writeln!(f)?;
        writeln!(f, "[Aggregated metrics (all turns pooled)]")?;
        write!(f, "{}", self.aggregated)
    }
}

/// Position of the first failing turn, if any.
fn first_failure(turns: &[bool]) -> Option<usize> {
    turns.iter().position(|is_correct| !is_correct)
}

/// Counts cascade opportunities (a failing turn followed by another turn)
/// and hits (that next turn also fails).
fn cascade_counts(turns: &[bool]) -> RatioCounter {
    let mut counter = RatioCounter::default();
    for pair in turns.windows(2) {
        if !pair[0] {
            counter.record(!pair[1]);
        }
    }
    counter
}

/// Scores conversations turn by turn.
///
/// `conversation_labels[i][j]` is paired with `conversation_predictions[i][j]`.
/// Conversations may differ in length, but each must have at least one turn
/// and the same number of labels and predictions.
///
/// A turn counts as correct iff its own `exact_match` is 1.0, so a turn that
/// correctly makes no tool call is not counted as correct here.
#[instrument(skip_all, fields(num_conversations = conversation_labels.len(), schemas_provided = tool_schemas.is_some()))]
pub fn evaluate_multi_turn<L, P>(
    conversation_labels: &[Vec<L>],
    conversation_predictions: &[Vec<P>],
    tool_schemas: Option<&ToolSchemas>,
) -> Result<ConversationEvalResult>
where
    L: AsRef<str>,
    P: AsRef<str>,
{
    if conversation_labels.len() != conversation_predictions.len() {
        return Err(EvaluationError::invalid_input(format!(
            "conversation counts differ: {} vs {}",
            conversation_labels.len(),
            conversation_predictions.len()
        )));
    }
    for (index, (labels, predictions)) in conversation_labels
        .iter()
        .zip(conversation_predictions)
        .enumerate()
    {
        if labels.len() != predictions.len() {
            return Err(EvaluationError::invalid_input(format!(
                "turn counts differ in conversation {index}: {} vs {}",
                labels.len(),
                predictions.len()
            )));
        }
        if labels.is_empty() {
            return Err(EvaluationError::invalid_input(format!(
                "conversation {index} has no turns"
            )));
        }
    }

    let mut per_turn_results = Vec::new();
    let mut all_labels: Vec<&str> = Vec::new();
    let mut all_predictions: Vec<&str> = Vec::new();
    let mut conversation_turns: Vec<Vec<bool>> = Vec::with_capacity(conversation_labels.len());

    for (labels, predictions) in conversation_labels.iter().zip(conversation_predictions) {
        let mut turns = Vec::with_capacity(labels.len());
        for (label, prediction) in labels.iter().zip(predictions) {
            let (label, prediction) = (label.as_ref(), prediction.as_ref());
            let turn_result = evaluate_function_calls(&[label], &[prediction], tool_schemas)?;
            turns.push(turn_result.exact_match == 1.0);
            per_turn_results.push(turn_result);
            all_labels.push(label);
            all_predictions.push(prediction);
        }
        conversation_turns.push(turns);
    }

    let aggregated = evaluate_function_calls(&all_labels, &all_predictions, tool_schemas)?;

    let total_conversations = conversation_turns.len();
    let total_turns = all_labels.len();

    let correct_turns = conversation_turns.iter().flatten().filter(|c| **c).count();
    let perfect_conversations = conversation_turns
        .iter()
        .filter(|turns| turns.iter().all(|c| *c))
        .count();

    let first_failures: Vec<f64> = conversation_turns
        .iter()
        .filter_map(|turns| first_failure(turns))
        .map(|index| index as f64)
        .collect();

    let mut cascade = RatioCounter::default();
    for turns in &conversation_turns {
        let counts = cascade_counts(turns);
        cascade.correct += counts.correct;
        cascade.total += counts.total;
    }
    debug!(
        opportunities = cascade.total,
        hits = cascade.correct,
        "Computed error cascade counts"
    );

    let result = ConversationEvalResult {
        turn_level_accuracy: safe_div(correct_turns, total_turns),
        conversation_success_rate: safe_div(perfect_conversations, total_conversations),
        first_failure_turn_avg: mean(&first_failures).unwrap_or(NO_FAILURE),
        error_cascade_rate: cascade.ratio(),
        aggregated,
        total_conversations,
        total_turns,
        per_turn_results,
    };
    info!(
        total_conversations,
        total_turns,
        turn_level_accuracy = result.turn_level_accuracy,
        conversation_success_rate = result.conversation_success_rate,
        "Multi-turn evaluation completed"
    );
    Ok(result)
}
