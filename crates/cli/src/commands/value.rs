use crate::commands::{open, print_json, Ctx};
use crate::Inputs;

pub(crate) fn cmd_value(ctx: &Ctx, inputs: &Inputs, path: Option<&str>, flat: bool) -> i32 {
    let (mut ev, data, context) = match open(ctx, inputs) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    if let Err(e) = ev.evaluate(data, context) {
        return ctx.fail(&e.to_string());
    }
    let value = match path {
        Some(p) => ev.get_value_by_path(p, false).unwrap_or(serde_json::Value::Null),
        None if flat => ev.get_schema_value_flat(),
        None => ev.get_schema_value(),
    };
    if !ctx.quiet {
        print_json(&value);
    }
    0
}
