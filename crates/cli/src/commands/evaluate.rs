use formeval_eval::{ReturnFormat, PARAMS_KEY};

use crate::commands::{open, print_json, Ctx};
use crate::Inputs;

/// What part of the evaluated schema to print.
pub(crate) struct Projection {
    pub skip_layout: bool,
    pub exclude_hidden: bool,
    pub without_params: bool,
    pub paths: Vec<String>,
    pub format: ReturnFormat,
}

pub(crate) fn cmd_evaluate(ctx: &Ctx, inputs: &Inputs, projection: &Projection) -> i32 {
    let (mut ev, data, context) = match open(ctx, inputs) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    if let Err(e) = ev.evaluate(data, context) {
        return ctx.fail(&e.to_string());
    }
    let skip_layout = projection.skip_layout.then_some(true);
    let doc = if !projection.paths.is_empty() {
        ev.get_evaluated_schema_by_paths(projection.paths.as_slice(), skip_layout, projection.format)
    } else {
        let mut doc = ev.get_evaluated_schema_filtered(skip_layout, !projection.exclude_hidden);
        if projection.without_params {
            if let serde_json::Value::Object(map) = &mut doc {
                map.shift_remove(PARAMS_KEY);
            }
        }
        doc
    };
    if !ctx.quiet {
        print_json(&doc);
    }
    0
}
