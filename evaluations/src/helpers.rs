use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::schema::{ToolSchemas, extract_tool_schemas};
use crate::{Args, OutputFormat};

pub fn setup_logging(args: &Args) -> Result<()> {
    match args.format {
        OutputFormat::Jsonl => {
            let subscriber = tracing_subscriber::FmtSubscriber::builder()
                .with_writer(std::io::stderr)
                .json()
                .with_env_filter(EnvFilter::from_default_env())
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
        }
        OutputFormat::Pretty => {
            let subscriber = tracing_subscriber::FmtSubscriber::builder()
                .with_writer(std::io::stderr)
                .with_env_filter(EnvFilter::from_default_env())
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
        }
    }
}

/// One line of a predictions file.
#[derive(Debug, Deserialize)]
struct PredictionRecord {
    output: String,
}

/// Reads model outputs from JSONL (`{"output": "..."}` per turn).
///
/// Outputs are trimmed; blank lines are skipped.
pub fn load_predictions(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read predictions from {}: {e}", path.display()))?;
    let mut predictions = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: PredictionRecord = serde_json::from_str(line).map_err(|e| {
            anyhow!(
                "Invalid prediction on line {} of {}: {e}",
                index + 1,
                path.display()
            )
        })?;
        predictions.push(record.output.trim().to_string());
    }
    debug!(num_predictions = predictions.len(), "Loaded predictions");
    Ok(predictions)
}

/// Reads tool schemas from a JSON file.
///
/// Accepts either a list of tool definitions, as found in a dataset's `tools`
/// column, or a mapping from function name to `{"properties": ...}`.
pub fn load_tool_schemas(path: &Path) -> Result<ToolSchemas> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read tool schemas from {}: {e}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| anyhow!("Invalid JSON in {}: {e}", path.display()))?;
    let schemas = match value {
        Value::Array(tools) => extract_tool_schemas(&tools),
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| anyhow!("Invalid tool schemas in {}: {e}", path.display()))?,
        _ => {
            return Err(anyhow!(
                "Tool schemas in {} must be a list or an object",
                path.display()
            ));
        }
    };
    info!(num_tools = schemas.len(), path = %path.display(), "Loaded tool schemas");
    Ok(schemas)
}

/// Writes one JSON line per item, creating parent directories as needed.
pub fn write_jsonl<T: Serialize>(path: &Path, items: impl IntoIterator<Item = T>) -> Result<()> {
    create_parent_dirs(path)?;
    let file = fs::File::create(path)
        .map_err(|e| anyhow!("Failed to create {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, &item)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `value` as pretty-printed JSON, creating parent directories as needed.
pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    create_parent_dirs(path)?;
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).map_err(|e| anyhow!("Failed to write {}: {e}", path.display()))
}

fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create directory {}: {e}", parent.display()))?;
    }
    Ok(())
}
