//! Computed tables.
//!
//! A node carrying `$table` gets its `value` from a list of row plans
//! instead of a single expression:
//!
//! ```json
//! "schedule": {
//!   "type": "array",
//!   "$datas": [{"name": "rate", "data": {"$evaluation": {"var": "$params.rate"}}}],
//!   "$skip": {"$evaluation": {"!": {"var": "years"}}},
//!   "$table": [
//!     {"year": 0, "amount": {"$evaluation": {"var": "principal"}}},
//!     {"$repeat": [1, {"$evaluation": {"var": "years"}}, {
//!       "year": {"$evaluation": {"var": "$iteration"}},
//!       "amount": {"$evaluation": {"*": [{"var": "$year"}, {"var": "rate"}]}}
//!     }]}
//!   ]
//! }
//! ```
//!
//! Cells are literals or `{"$evaluation": expr}`. While a row is built,
//! `$iteration` and `$threshold` hold the repeat counter and its upper
//! bound, and every column already evaluated in the row is readable as
//! `$<column>`. `$datas` entries are evaluated first and mounted at their
//! `name` for the rest of the table. Rows already built are readable at
//! the table's own path.

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::expr::{Expr, ReadSet};
use crate::path::{DataPath, PathRoot};
use crate::schema::evaluation_of;

pub const TABLE_KEY: &str = "$table";
pub const DATAS_KEY: &str = "$datas";
pub const SKIP_KEY: &str = "$skip";
pub const CLEAR_KEY: &str = "$clear";
pub const REPEAT_KEY: &str = "$repeat";
pub const ITERATION_VAR: &str = "$iteration";
pub const THRESHOLD_VAR: &str = "$threshold";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Literal(Value),
    Computed(Expr),
}

impl Cell {
    fn parse(value: &Value, at: &str) -> Result<Cell, SchemaError> {
        Ok(match evaluation_of(value, at)? {
            Some(expr) => Cell::Computed(expr),
            None => Cell::Literal(value.clone()),
        })
    }

    fn expr(&self) -> Option<&Expr> {
        match self {
            Cell::Computed(e) => Some(e),
            Cell::Literal(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// `$<name>`, the variable later columns of the row read it through.
    pub var: String,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowPlan {
    /// One row.
    Static(Vec<Column>),
    /// One row per counter value in `start..=end`.
    Repeat {
        start: Cell,
        end: Cell,
        columns: Vec<Column>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub name: DataPath,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub datas: Vec<TableData>,
    pub rows: Vec<RowPlan>,
    pub skip: Cell,
    pub clear: Cell,
}

impl TableDef {
    /// Parse the table keys of a node object. `Ok(None)` when the node has
    /// no `$table`; the companion keys are rejected on their own.
    pub fn parse(obj: &Map<String, Value>, at: &str) -> Result<Option<TableDef>, SchemaError> {
        let Some(table) = obj.get(TABLE_KEY) else {
            for key in [DATAS_KEY, SKIP_KEY, CLEAR_KEY] {
                if obj.contains_key(key) {
                    return Err(SchemaError::new(
                        at,
                        format!("'{}' is only allowed together with '{}'", key, TABLE_KEY),
                    ));
                }
            }
            return Ok(None);
        };
        let table_at = format!("{}.{}", at, TABLE_KEY);
        let Value::Array(rows) = table else {
            return Err(SchemaError::new(table_at, "'$table' must be an array of rows"));
        };

        let mut plans = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            plans.push(parse_row(row, &format!("{}.{}", table_at, i))?);
        }

        let datas = match obj.get(DATAS_KEY) {
            None => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(i, e)| parse_data(e, &format!("{}.{}.{}", at, DATAS_KEY, i)))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(SchemaError::new(at, "'$datas' must be an array")),
        };

        let flag = |key: &str| -> Result<Cell, SchemaError> {
            match obj.get(key) {
                None => Ok(Cell::Literal(Value::Bool(false))),
                Some(v) => Cell::parse(v, &format!("{}.{}", at, key)),
            }
        };

        Ok(Some(TableDef {
            datas,
            rows: plans,
            skip: flag(SKIP_KEY)?,
            clear: flag(CLEAR_KEY)?,
        }))
    }

    /// Every expression of the table, in evaluation order.
    pub fn exprs(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = Vec::new();
        out.extend(self.datas.iter().filter_map(|d| d.cell.expr()));
        out.extend(self.skip.expr());
        out.extend(self.clear.expr());
        for row in &self.rows {
            match row {
                RowPlan::Static(columns) => out.extend(columns.iter().filter_map(|c| c.cell.expr())),
                RowPlan::Repeat { start, end, columns } => {
                    out.extend(start.expr());
                    out.extend(end.expr());
                    out.extend(columns.iter().filter_map(|c| c.cell.expr()));
                }
            }
        }
        out
    }

    /// Reads of the table as seen from outside: row variables, `$datas`
    /// names and the table's own rows are local and dropped.
    pub fn read_set(&self, own: &DataPath) -> ReadSet {
        let mut reads = ReadSet::default();
        for expr in self.exprs() {
            reads.extend(expr.read_set());
        }
        let local = |p: &DataPath| {
            let row_var = p.root_kind() == PathRoot::Data
                && p.first().is_some_and(|s| s.starts_with('$'));
            row_var || p.starts_with(own) || self.datas.iter().any(|d| p.starts_with(&d.name))
        };
        reads.fixed.retain(|p| !local(p));
        reads.computed.retain(|p| !local(p));
        reads
    }

    pub fn is_volatile(&self) -> bool {
        self.exprs().iter().any(|e| e.is_volatile())
    }
}

fn parse_columns(template: &Map<String, Value>, at: &str) -> Result<Vec<Column>, SchemaError> {
    template
        .iter()
        .map(|(name, value)| {
            if name.is_empty() || name.starts_with('$') {
                return Err(SchemaError::new(at, format!("invalid column name '{}'", name)));
            }
            Ok(Column {
                name: name.clone(),
                var: format!("${}", name),
                cell: Cell::parse(value, &format!("{}.{}", at, name))?,
            })
        })
        .collect()
}

fn parse_row(row: &Value, at: &str) -> Result<RowPlan, SchemaError> {
    let Value::Object(row) = row else {
        return Err(SchemaError::new(at, "table row must be an object"));
    };
    let Some(repeat) = row.get(REPEAT_KEY) else {
        return Ok(RowPlan::Static(parse_columns(row, at)?));
    };
    if row.len() > 1 {
        return Err(SchemaError::new(at, "a '$repeat' row declares its columns inside '$repeat'"));
    }
    let repeat_at = format!("{}.{}", at, REPEAT_KEY);
    match repeat {
        Value::Array(parts) if parts.len() == 3 => {
            let Value::Object(template) = &parts[2] else {
                return Err(SchemaError::new(repeat_at, "'$repeat' template must be an object"));
            };
            Ok(RowPlan::Repeat {
                start: Cell::parse(&parts[0], &format!("{}.0", repeat_at))?,
                end: Cell::parse(&parts[1], &format!("{}.1", repeat_at))?,
                columns: parse_columns(template, &format!("{}.2", repeat_at))?,
            })
        }
        _ => Err(SchemaError::new(
            repeat_at,
            "'$repeat' must be [start, end, template]",
        )),
    }
}

fn parse_data(entry: &Value, at: &str) -> Result<TableData, SchemaError> {
    let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
    if name.is_empty() {
        return Err(SchemaError::new(at, "'$datas' entry needs a non-empty 'name'"));
    }
    let cell = match entry.get("data") {
        Some(v) => Cell::parse(v, &format!("{}.data", at))?,
        None => Cell::Literal(Value::Null),
    };
    Ok(TableData {
        name: DataPath::parse(name),
        cell,
    })
}
