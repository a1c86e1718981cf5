use crate::commands::{open, print_json, Ctx};
use crate::{Inputs, OutputFormat};

/// Exit code when the data has validation errors.
const EXIT_INVALID: i32 = 2;

pub(crate) fn cmd_validate(ctx: &Ctx, inputs: &Inputs, paths: &[String]) -> i32 {
    let (ev, data, context) = match open(ctx, inputs) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    let result = match ev.validate_paths(data, context, paths) {
        Ok(r) => r,
        Err(e) => return ctx.fail(&e.to_string()),
    };

    if !ctx.quiet {
        match ctx.output {
            OutputFormat::Json => match serde_json::to_value(&result) {
                Ok(v) => print_json(&v),
                Err(e) => return ctx.fail(&format!("serialization error: {}", e)),
            },
            OutputFormat::Text => {
                if result.has_error {
                    for e in &result.errors {
                        println!("{}: {} [{}]", e.path, e.message, e.rule_type);
                    }
                    println!("{} error(s)", result.errors.len());
                } else {
                    println!("valid");
                }
            }
        }
    }

    if result.has_error {
        EXIT_INVALID
    } else {
        0
    }
}
