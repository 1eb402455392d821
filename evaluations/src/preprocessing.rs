//! Turns chat datasets into `(prompt, label)` pairs for evaluation.
//!
//! Each dataset record is a conversation. It is rendered to ChatML and split
//! at every assistant turn: the prompt is everything before that turn (ending
//! with an open assistant header) and the label is the assistant's content.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::{EvaluationError, Result};
use crate::schema::{ToolSchemas, extract_tool_schemas};

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";
const ASSISTANT_HEADER: &str = "<|im_start|>assistant";

lazy_static! {
    static ref ASSISTANT_PATTERN: Regex = {
        #[expect(clippy::expect_used)]
        Regex::new(r"(?s)<\|im_start\|>assistant(.*?)<\|im_end\|>")
            .expect("Failed to compile ASSISTANT_PATTERN")
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One line of a JSONL chat dataset.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DatasetRecord {
    #[serde(default)]
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    /// Tool definitions offered to the model in this conversation.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
}

/// A prompt ending in an open assistant header, and the assistant content it should produce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub label: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalData {
    pub prompts: Vec<String>,
    pub labels: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiTurnEvalData {
    pub conversation_prompts: Vec<Vec<String>>,
    pub conversation_labels: Vec<Vec<String>>,
    /// Schemas from the first record that carries tools, assuming every
    /// conversation is offered the same tools.
    pub tool_schemas: Option<ToolSchemas>,
}

impl MultiTurnEvalData {
    /// Flattens conversations into single-turn evaluation data.
    pub fn flatten(&self) -> EvalData {
        EvalData {
            prompts: self.conversation_prompts.iter().flatten().cloned().collect(),
            labels: self.conversation_labels.iter().flatten().cloned().collect(),
        }
    }
}

/// Parses a JSONL dataset, skipping blank lines.
pub fn parse_dataset_jsonl(content: &str) -> Result<Vec<DatasetRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| EvaluationError::Dataset {
                index,
                message: e.to_string(),
            })
        })
        .collect()
}

/// The record's messages with its system prompt prepended.
pub fn format_conversation(record: &DatasetRecord) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(record.messages.len() + 1);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: record.system_prompt.clone(),
    });
    messages.extend(record.messages.iter().cloned());
    messages
}

/// Renders messages as ChatML, one `<|im_start|>role\ncontent<|im_end|>` block per message.
pub fn to_chatml(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{IM_START}{}\n{}{IM_END}", message.role, message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits ChatML at every assistant turn.
pub fn extract_examples(chatml: &str) -> Vec<Example> {
    ASSISTANT_PATTERN
        .captures_iter(chatml)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let content = captures.get(1)?;
            Some(Example {
                input: format!("{}\n{ASSISTANT_HEADER}", chatml[..whole.start()].trim()),
                label: content.as_str().trim().to_string(),
            })
        })
        .collect()
}

fn test_size(num_records: usize, test_ratio: f64) -> Result<usize> {
    if !(0.0..=1.0).contains(&test_ratio) {
        return Err(EvaluationError::invalid_input(format!(
            "test ratio must be between 0 and 1, got {test_ratio}"
        )));
    }
    Ok((num_records as f64 * test_ratio).floor() as usize)
}

/// Builds flat `(prompts, labels)` from the leading `test_ratio` share of records.
#[instrument(skip_all, fields(num_records = records.len(), test_ratio = %test_ratio))]
pub fn prepare_eval_data(records: &[DatasetRecord], test_ratio: f64) -> Result<EvalData> {
    let test_size = test_size(records.len(), test_ratio)?;
    let mut data = EvalData::default();
    for record in &records[..test_size] {
        let chatml = to_chatml(&format_conversation(record));
        for example in extract_examples(&chatml) {
            data.prompts.push(example.input);
            data.labels.push(example.label);
        }
    }
    info!(
        test_records = test_size,
        num_examples = data.labels.len(),
        "Prepared evaluation data"
    );
    Ok(data)
}

/// Like [`prepare_eval_data`], but keeps turns grouped by conversation.
///
/// Conversations without any assistant turn are skipped.
#[instrument(skip_all, fields(num_records = records.len(), test_ratio = %test_ratio))]
pub fn prepare_multi_turn_eval_data(
    records: &[DatasetRecord],
    test_ratio: f64,
) -> Result<MultiTurnEvalData> {
    let test_size = test_size(records.len(), test_ratio)?;
    let mut data = MultiTurnEvalData::default();
    for (index, record) in records[..test_size].iter().enumerate() {
        let chatml = to_chatml(&format_conversation(record));
        let examples = extract_examples(&chatml);
        if examples.is_empty() {
            debug!(index, "Skipping conversation without assistant turns");
        } else {
            let (prompts, labels) = examples
                .into_iter()
                .map(|example| (example.input, example.label))
                .unzip();
            data.conversation_prompts.push(prompts);
            data.conversation_labels.push(labels);
        }

        if data.tool_schemas.is_none()
            && let Some(tools) = record.tools.as_deref().filter(|tools| !tools.is_empty())
        {
            data.tool_schemas = Some(extract_tool_schemas(tools));
        }
    }
    info!(
        num_conversations = data.conversation_labels.len(),
        num_turns = data.conversation_labels.iter().map(Vec::len).sum::<usize>(),
        "Prepared multi-turn evaluation data"
    );
    Ok(data)
}

/// Schemas from the first record that carries a non-empty `tools` list.
pub fn dataset_tool_schemas(records: &[DatasetRecord]) -> Option<ToolSchemas> {
    records
        .iter()
        .find_map(|record| record.tools.as_deref().filter(|tools| !tools.is_empty()))
        .map(extract_tool_schemas)
}

/// Regroups flat predictions into conversations shaped like `conversation_labels`.
pub fn group_predictions(
    predictions: Vec<String>,
    conversation_labels: &[Vec<String>],
) -> Result<Vec<Vec<String>>> {
    let expected: usize = conversation_labels.iter().map(Vec::len).sum();
    if predictions.len() != expected {
        return Err(EvaluationError::invalid_input(format!(
            "expected {expected} predictions for {} conversations, got {}",
            conversation_labels.len(),
            predictions.len()
        )));
    }
    let mut predictions = predictions.into_iter();
    Ok(conversation_labels
        .iter()
        .map(|labels| predictions.by_ref().take(labels.len()).collect())
        .collect())
}
