use crate::commands::{open, print_json, Ctx};
use crate::{Inputs, OutputFormat};

/// Evaluate `data` once, then report what a change at `changed` touches
/// and the recomputed entries.
pub(crate) fn cmd_dependents(ctx: &Ctx, inputs: &Inputs, changed: &[String], nested: bool) -> i32 {
    let (mut ev, data, context) = match open(ctx, inputs) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    if let Err(e) = ev.evaluate(data.clone(), context) {
        return ctx.fail(&e.to_string());
    }
    let updated = match ev.evaluate_dependents(changed, data, None, nested) {
        Ok(v) => v,
        Err(e) => return ctx.fail(&e.to_string()),
    };

    if !ctx.quiet {
        match ctx.output {
            OutputFormat::Json => print_json(&updated),
            OutputFormat::Text => {
                let nodes: Vec<&String> = updated
                    .as_object()
                    .map(|m| m.keys().collect())
                    .unwrap_or_default();
                if nodes.is_empty() {
                    println!("no dependents");
                }
                for node in nodes {
                    println!("{} = {}", node, updated[node.as_str()]["value"]);
                }
            }
        }
    }
    0
}
