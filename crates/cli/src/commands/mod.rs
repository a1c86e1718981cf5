pub(crate) mod dependents;
pub(crate) mod evaluate;
pub(crate) mod logic;
pub(crate) mod subforms;
pub(crate) mod validate;
pub(crate) mod value;

use std::path::Path;

use formeval_eval::{EngineConfig, SchemaEvaluator};
use serde_json::Value;

use crate::{report_error, Inputs, OutputFormat};

pub(crate) struct Ctx {
    pub output: OutputFormat,
    pub quiet: bool,
    pub config: EngineConfig,
}

impl Ctx {
    /// Report `msg` and return the failure exit code.
    pub fn fail(&self, msg: &str) -> i32 {
        report_error(msg, self.output, self.quiet);
        1
    }
}

pub(crate) fn load_config(path: &Path) -> Result<EngineConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading config '{}': {}", path.display(), e))?;
    toml::from_str(&text).map_err(|e| format!("error parsing config '{}': {}", path.display(), e))
}

pub(crate) fn read_json_file(path: &Path) -> Result<Value, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
}

/// Inline JSON when the argument looks like an object or array, a file
/// path otherwise.
pub(crate) fn read_json_arg(arg: &str) -> Result<Value, String> {
    let trimmed = arg.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| format!("error parsing inline JSON: {}", e))
    } else {
        read_json_file(Path::new(arg))
    }
}

/// Build an instance from the command inputs. Returns it with the data,
/// which callers pass to the operation they run.
pub(crate) fn open(ctx: &Ctx, inputs: &Inputs) -> Result<(SchemaEvaluator, Value, Option<Value>), String> {
    let schema = read_json_file(&inputs.schema)?;
    let data = read_json_arg(&inputs.data)?;
    let context = inputs.context.as_deref().map(read_json_arg).transpose()?;
    let mut ev = SchemaEvaluator::new(&schema, context.clone(), None).map_err(|e| e.to_string())?;
    ev.set_config(ctx.config.clone());
    log::debug!(
        "loaded schema {} ({} nodes)",
        ev.parsed_schema().content_key(),
        ev.parsed_schema().nodes.len()
    );
    Ok((ev, data, context))
}

pub(crate) fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("serialization error: {}", e))
    );
}
