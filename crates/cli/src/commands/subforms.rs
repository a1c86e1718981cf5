use std::path::Path;

use formeval_eval::ParsedSchema;

use crate::commands::{print_json, read_json_file, Ctx};
use crate::OutputFormat;

pub(crate) fn cmd_subforms(ctx: &Ctx, schema_path: &Path) -> i32 {
    let raw = match read_json_file(schema_path) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    let schema = match ParsedSchema::parse(&raw) {
        Ok(s) => s,
        Err(e) => return ctx.fail(&e.to_string()),
    };
    let paths = schema.subform_paths();
    if ctx.quiet {
        return 0;
    }
    match ctx.output {
        OutputFormat::Json => print_json(&serde_json::json!(paths)),
        OutputFormat::Text => {
            for p in &paths {
                println!("{}", p);
            }
        }
    }
    0
}
