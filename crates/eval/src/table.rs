//! Building the rows of a `$table` node.
//!
//! Evaluation runs in a sandbox copy of the working document: `$datas`
//! are mounted there, rows are appended at the table's own path as they
//! are built, and row variables (`$iteration`, `$threshold`, `$<column>`)
//! live at the top level of the sandbox only while their row is built.
//! Nothing written to the sandbox leaks into the caller's document.

use formeval_core::{Cell, Column, EvalUnit, ParsedSchema, RowPlan, TableDef, ITERATION_VAR, THRESHOLD_VAR};
use rust_decimal::prelude::ToPrimitive;

use crate::dates::Clock;
use crate::error::ExpressionError;
use crate::logic::Evaluator;
use crate::value::Value;

/// Upper bound on the rows one table may produce.
pub const MAX_TABLE_ROWS: usize = 10_000;

/// Build the rows of `table`, owned by `unit`, against `root`.
pub fn build_rows(
    schema: &ParsedSchema,
    unit: &EvalUnit,
    table: &TableDef,
    root: &serde_json::Value,
    clock: &Clock,
) -> Result<Value, ExpressionError> {
    let mut sandbox = root.clone();

    for data in &table.datas {
        let v = match eval_cell(&data.cell, &sandbox, clock) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("{}: $datas '{}': {}", unit.label, data.name, e);
                serde_json::Value::Null
            }
        };
        data.name.assign(&mut sandbox, v);
    }

    if is_set(&table.skip, &sandbox, clock)? {
        log::debug!("{}: skipped", unit.label);
        return Ok(Value::List(Vec::new()));
    }
    if let Some(missing) = missing_required_input(schema, unit, &sandbox) {
        log::debug!("{}: required input '{}' is empty", unit.label, missing);
        return Ok(Value::List(Vec::new()));
    }
    if is_set(&table.clear, &sandbox, clock)? {
        return Ok(Value::List(Vec::new()));
    }

    let own = &unit.node_path;
    own.assign(&mut sandbox, serde_json::Value::Array(Vec::new()));
    let mut rows = Vec::new();
    for plan in &table.rows {
        match plan {
            RowPlan::Static(columns) => {
                let row = build_row(columns, rows.len(), &mut sandbox, clock)?;
                push_row(&mut rows, row, own, &mut sandbox)?;
            }
            RowPlan::Repeat { start, end, columns } => {
                let start = bound(start, &sandbox, clock)?;
                let end = bound(end, &sandbox, clock)?;
                if start > end {
                    continue;
                }
                let count = end.abs_diff(start).saturating_add(1);
                if (rows.len() as u64).saturating_add(count) > MAX_TABLE_ROWS as u64 {
                    return Err(ExpressionError::new(format!(
                        "'$repeat' would exceed {} rows",
                        MAX_TABLE_ROWS
                    )));
                }
                set_local(&mut sandbox, THRESHOLD_VAR, serde_json::Value::from(end));
                for i in start..=end {
                    set_local(&mut sandbox, ITERATION_VAR, serde_json::Value::from(i));
                    let row = build_row(columns, rows.len(), &mut sandbox, clock)?;
                    push_row(&mut rows, row, own, &mut sandbox)?;
                }
                clear_local(&mut sandbox, ITERATION_VAR);
                clear_local(&mut sandbox, THRESHOLD_VAR);
            }
        }
    }
    Ok(Value::from_json(&serde_json::Value::Array(rows)))
}

fn eval_cell(cell: &Cell, doc: &serde_json::Value, clock: &Clock) -> Result<serde_json::Value, ExpressionError> {
    match cell {
        Cell::Literal(v) => Ok(v.clone()),
        Cell::Computed(expr) => {
            let v = Evaluator::new(doc, clock).eval(expr)?;
            Ok(if v.is_absent() {
                serde_json::Value::Null
            } else {
                v.to_json()
            })
        }
    }
}

/// `$skip` and `$clear` only fire on boolean `true`.
fn is_set(cell: &Cell, doc: &serde_json::Value, clock: &Clock) -> Result<bool, ExpressionError> {
    Ok(eval_cell(cell, doc, clock)? == serde_json::Value::Bool(true))
}

fn bound(cell: &Cell, doc: &serde_json::Value, clock: &Clock) -> Result<i64, ExpressionError> {
    let v = eval_cell(cell, doc, clock)?;
    Value::from_json(&v)
        .to_number()
        .and_then(|d| d.trunc().to_i64())
        .ok_or_else(|| ExpressionError::new(format!("'$repeat' bound must be an integer, got {}", v)))
}

/// First statically read field that is always required but still empty.
fn missing_required_input(schema: &ParsedSchema, unit: &EvalUnit, doc: &serde_json::Value) -> Option<String> {
    unit.reads
        .iter()
        .filter(|p| !unit.computed_reads.contains(p))
        .find(|p| {
            schema.node_by_path(p).is_some_and(|n| n.always_required())
                && p.lookup(doc).map(Value::from_json).unwrap_or(Value::Absent).is_empty_input()
        })
        .map(|p| p.to_string())
}

fn build_row(
    columns: &[Column],
    index: usize,
    sandbox: &mut serde_json::Value,
    clock: &Clock,
) -> Result<serde_json::Value, ExpressionError> {
    let mut row = serde_json::Map::new();
    for col in columns {
        let v = eval_cell(&col.cell, sandbox, clock)
            .map_err(|e| ExpressionError::new(format!("row {} column '{}': {}", index, col.name, e)))?;
        set_local(sandbox, &col.var, v.clone());
        row.insert(col.name.clone(), v);
    }
    for col in columns {
        clear_local(sandbox, &col.var);
    }
    Ok(serde_json::Value::Object(row))
}

fn push_row(
    rows: &mut Vec<serde_json::Value>,
    row: serde_json::Value,
    own: &formeval_core::DataPath,
    sandbox: &mut serde_json::Value,
) -> Result<(), ExpressionError> {
    if rows.len() >= MAX_TABLE_ROWS {
        return Err(ExpressionError::new(format!("table exceeds {} rows", MAX_TABLE_ROWS)));
    }
    own.child(&rows.len().to_string()).assign(sandbox, row.clone());
    rows.push(row);
    Ok(())
}

fn set_local(sandbox: &mut serde_json::Value, key: &str, v: serde_json::Value) {
    if let serde_json::Value::Object(map) = sandbox {
        map.insert(key.to_string(), v);
    }
}

fn clear_local(sandbox: &mut serde_json::Value, key: &str) {
    if let serde_json::Value::Object(map) = sandbox {
        map.shift_remove(key);
    }
}
