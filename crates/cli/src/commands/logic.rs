use formeval_eval::evaluate_logic;
use serde_json::Value;

use crate::commands::{print_json, read_json_arg, Ctx};

type LogicArgs = (Value, Option<Value>, Option<Value>);

fn read_args(logic: &str, data: Option<&str>, context: Option<&str>) -> Result<LogicArgs, String> {
    let logic = read_json_arg(logic)?;
    let data = data.map(read_json_arg).transpose()?;
    let context = context.map(read_json_arg).transpose()?;
    Ok((logic, data, context))
}

pub(crate) fn cmd_logic(ctx: &Ctx, logic: &str, data: Option<&str>, context: Option<&str>) -> i32 {
    let (logic, data, context) = match read_args(logic, data, context) {
        Ok(v) => v,
        Err(msg) => return ctx.fail(&msg),
    };
    match evaluate_logic(&logic, data, context) {
        Ok(v) => {
            if !ctx.quiet {
                print_json(&v);
            }
            0
        }
        Err(e) => ctx.fail(&e.to_string()),
    }
}
