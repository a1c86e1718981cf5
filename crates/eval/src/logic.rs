//! Expression evaluator.
//!
//! Evaluates a compiled [`Expr`] against one working root: the data object
//! with the context mounted at `$context` and the schema constants at
//! `$params`. Evaluation has no side effects. Coercion failures produce
//! [`Value::Absent`] rather than errors; only an expression that could
//! not be compiled (unknown operator, wrong arity) or an operator given
//! unusable arguments raises [`ExpressionError`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use formeval_core::{DataPath, Expr, Op, PathRef, PathRoot};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::dates::{self, Clock};
use crate::error::ExpressionError;
use crate::numeric::{self, Rounding};
use crate::value::Value;

type EvalResult = Result<Value, ExpressionError>;

/// Upper bound on the list `rangeoptions` may build.
const MAX_RANGE_OPTIONS: usize = 10_000;

pub struct Evaluator<'a> {
    root: &'a serde_json::Value,
    clock: &'a Clock,
}

impl<'a> Evaluator<'a> {
    pub fn new(root: &'a serde_json::Value, clock: &'a Clock) -> Self {
        Evaluator { root, clock }
    }

    pub fn eval(&self, expr: &Expr) -> EvalResult {
        self.eval_in(expr, None)
    }

    /// Look a path up the way `var` does outside iteration.
    pub fn lookup(&self, path: &DataPath) -> Value {
        path.lookup(self.root)
            .map(Value::from_json)
            .unwrap_or(Value::Absent)
    }

    fn eval_in(&self, expr: &Expr, item: Option<&Value>) -> EvalResult {
        match expr {
            Expr::Literal(v) => Ok(Value::from_json(v)),
            Expr::Array(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|e| self.eval_in(e, item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Var { path, default } => {
                let p = self.resolve_path(path, item)?;
                let found = self.var_lookup(&p, item);
                self.or_default(found, default.as_deref(), item)
            }
            Expr::Ref { path, default } => {
                let p = self.resolve_path(path, item)?;
                let found = self.lookup(&p);
                self.or_default(found, default.as_deref(), item)
            }
            Expr::Call { op, args } => self.call(*op, args, item),
            Expr::Invalid { op, reason } => {
                Err(ExpressionError::new(format!("'{}': {}", op, reason)))
            }
        }
    }

    fn resolve_path(&self, path: &PathRef, item: Option<&Value>) -> Result<DataPath, ExpressionError> {
        match path {
            PathRef::Static(p) => Ok(p.clone()),
            PathRef::Dynamic(inner) => Ok(DataPath::parse(&self.eval_in(inner, item)?.to_text())),
        }
    }

    fn var_lookup(&self, path: &DataPath, item: Option<&Value>) -> Value {
        match item {
            Some(it) if path.root_kind() == PathRoot::Data => it.lookup(path.segments()),
            _ => self.lookup(path),
        }
    }

    fn or_default(&self, found: Value, default: Option<&Expr>, item: Option<&Value>) -> EvalResult {
        match default {
            Some(d) if found.is_nullish() => self.eval_in(d, item),
            _ => Ok(found),
        }
    }

    fn arg(&self, args: &[Expr], i: usize, item: Option<&Value>) -> EvalResult {
        match args.get(i) {
            Some(e) => self.eval_in(e, item),
            None => Ok(Value::Absent),
        }
    }

    fn all_args(&self, args: &[Expr], item: Option<&Value>) -> Result<Vec<Value>, ExpressionError> {
        args.iter().map(|e| self.eval_in(e, item)).collect()
    }

    /// Arguments, or the elements of a single list argument.
    fn spread_args(&self, args: &[Expr], item: Option<&Value>) -> Result<Vec<Value>, ExpressionError> {
        let values = self.all_args(args, item)?;
        match values.as_slice() {
            [Value::List(items)] => Ok(items.clone()),
            _ => Ok(values),
        }
    }

    fn call(&self, op: Op, args: &[Expr], item: Option<&Value>) -> EvalResult {
        match op {
            // ── Access ───────────────────────────────────────────────
            Op::Missing => {
                let keys = self.spread_args(args, item)?;
                Ok(Value::List(self.missing_keys(&keys, item)))
            }
            Op::MissingSome => {
                let need = self.arg(args, 0, item)?.to_number().unwrap_or(Decimal::ZERO);
                let keys = match self.arg(args, 1, item)? {
                    Value::List(keys) => keys,
                    other => vec![other],
                };
                let missing = self.missing_keys(&keys, item);
                let present = Decimal::from(keys.len() - missing.len());
                if present >= need {
                    Ok(Value::List(Vec::new()))
                } else {
                    Ok(Value::List(missing))
                }
            }

            // ── Logic ────────────────────────────────────────────────
            Op::And => {
                let mut last = Value::Absent;
                for a in args {
                    last = self.eval_in(a, item)?;
                    if !last.is_truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Op::Or => {
                let mut last = Value::Absent;
                for a in args {
                    last = self.eval_in(a, item)?;
                    if last.is_truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Op::Not => Ok(Value::Bool(!self.arg(args, 0, item)?.is_truthy())),
            Op::Truthy => Ok(Value::Bool(self.arg(args, 0, item)?.is_truthy())),
            Op::If => {
                let mut i = 0;
                while i + 1 < args.len() {
                    if self.eval_in(&args[i], item)?.is_truthy() {
                        return self.eval_in(&args[i + 1], item);
                    }
                    i += 2;
                }
                match args.get(i) {
                    Some(otherwise) => self.eval_in(otherwise, item),
                    None => Ok(Value::Null),
                }
            }
            Op::Xor => {
                let a = self.arg(args, 0, item)?.is_truthy();
                let b = self.arg(args, 1, item)?.is_truthy();
                Ok(Value::Bool(a != b))
            }
            Op::IfNull => {
                let a = self.arg(args, 0, item)?;
                if a.is_nullish() {
                    self.arg(args, 1, item)
                } else {
                    Ok(a)
                }
            }
            Op::IsEmpty => Ok(Value::Bool(self.arg(args, 0, item)?.is_empty_input())),

            // ── Comparison ───────────────────────────────────────────
            Op::Eq | Op::Ne => {
                let a = self.arg(args, 0, item)?;
                let b = self.arg(args, 1, item)?;
                Ok(match loose_eq(&a, &b) {
                    Some(eq) => Value::Bool(if op == Op::Eq { eq } else { !eq }),
                    None => Value::Absent,
                })
            }
            Op::StrictEq | Op::StrictNe => {
                let a = self.arg(args, 0, item)?;
                let b = self.arg(args, 1, item)?;
                let eq = strict_eq(&a, &b);
                Ok(Value::Bool(if op == Op::StrictEq { eq } else { !eq }))
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let values = self.all_args(args, item)?;
                let accept = |o: Ordering| match op {
                    Op::Lt => o == Ordering::Less,
                    Op::Le => o != Ordering::Greater,
                    Op::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                };
                // three arguments: a < b < c
                for pair in values.windows(2) {
                    match compare(&pair[0], &pair[1]) {
                        Some(o) if accept(o) => {}
                        Some(_) => return Ok(Value::Bool(false)),
                        None => return Ok(Value::Absent),
                    }
                }
                Ok(Value::Bool(true))
            }

            // ── Arithmetic ───────────────────────────────────────────
            Op::Add => {
                let mut total = Decimal::ZERO;
                for v in self.all_args(args, item)? {
                    let Some(n) = number_or_zero(&v) else {
                        return Ok(Value::Absent);
                    };
                    let Some(t) = numeric::add(total, n) else {
                        return Ok(Value::Absent);
                    };
                    total = t;
                }
                Ok(Value::Number(total))
            }
            Op::Sub => {
                let a = number_or_zero(&self.arg(args, 0, item)?);
                if args.len() == 1 {
                    return Ok(a.map(|n| Value::Number(-n)).unwrap_or(Value::Absent));
                }
                let b = number_or_zero(&self.arg(args, 1, item)?);
                Ok(number_result(a.zip(b).and_then(|(a, b)| numeric::sub(a, b))))
            }
            Op::Mul => {
                let mut product = Decimal::ONE;
                for v in self.all_args(args, item)? {
                    let Some(p) = v.to_number().and_then(|n| numeric::mul(product, n)) else {
                        return Ok(Value::Absent);
                    };
                    product = p;
                }
                Ok(Value::Number(product))
            }
            Op::Div | Op::Mod => {
                let a = self.arg(args, 0, item)?.to_number();
                let b = self.arg(args, 1, item)?.to_number();
                let f = if op == Op::Div { numeric::div } else { numeric::rem };
                Ok(number_result(a.zip(b).and_then(|(a, b)| f(a, b))))
            }
            Op::Min | Op::Max => {
                let values = self.spread_args(args, item)?;
                let numbers: Option<Vec<Decimal>> = values.iter().map(Value::to_number).collect();
                let picked = numbers.and_then(|ns| {
                    if op == Op::Min {
                        ns.into_iter().min()
                    } else {
                        ns.into_iter().max()
                    }
                });
                Ok(number_result(picked))
            }
            Op::Abs => Ok(number_result(self.arg(args, 0, item)?.to_number().map(|n| n.abs()))),
            Op::Round | Op::RoundUp | Op::RoundDown => {
                let mode = match op {
                    Op::Round => Rounding::Nearest,
                    Op::RoundUp => Rounding::Up,
                    _ => Rounding::Down,
                };
                let x = self.arg(args, 0, item)?.to_number();
                let digits = match args.len() {
                    1 => 0,
                    _ => self
                        .arg(args, 1, item)?
                        .to_number()
                        .and_then(|d| d.trunc().to_u32())
                        .unwrap_or(0)
                        .min(28),
                };
                Ok(number_result(x.map(|x| numeric::round(x, digits, mode))))
            }
            Op::Pow => {
                let a = self.arg(args, 0, item)?.to_number();
                let b = self.arg(args, 1, item)?.to_number();
                Ok(number_result(a.zip(b).and_then(|(a, b)| numeric::pow(a, b))))
            }

            // ── Strings ──────────────────────────────────────────────
            Op::Cat => {
                let mut out = String::new();
                for v in self.all_args(args, item)? {
                    out.push_str(&v.to_text());
                }
                Ok(Value::Text(out))
            }
            Op::Substr => {
                let s = self.arg(args, 0, item)?;
                if s.is_nullish() {
                    return Ok(Value::Absent);
                }
                let chars: Vec<char> = s.to_text().chars().collect();
                let n = chars.len() as i64;
                let start = self.int_arg(args, 1, item)?.unwrap_or(0);
                let start = if start < 0 { (n + start).max(0) } else { start.min(n) };
                let end = match self.int_arg(args, 2, item)? {
                    None => n,
                    Some(len) if len < 0 => (n + len).max(start),
                    Some(len) => start.saturating_add(len).min(n),
                };
                Ok(Value::Text(chars[start as usize..end as usize].iter().collect()))
            }
            Op::Length => Ok(number_result(
                self.arg(args, 0, item)?.length().map(Decimal::from),
            )),
            Op::Upper | Op::Lower | Op::Trim => {
                let v = self.arg(args, 0, item)?;
                if v.is_nullish() {
                    return Ok(Value::Absent);
                }
                let t = v.to_text();
                Ok(Value::Text(match op {
                    Op::Upper => t.to_uppercase(),
                    Op::Lower => t.to_lowercase(),
                    _ => t.trim().to_string(),
                }))
            }
            Op::Contains => {
                let hay = self.arg(args, 0, item)?;
                let needle = self.arg(args, 1, item)?;
                Ok(Value::Bool(contains(&hay, &needle)))
            }
            Op::In => {
                let needle = self.arg(args, 0, item)?;
                let hay = self.arg(args, 1, item)?;
                Ok(Value::Bool(contains(&hay, &needle)))
            }
            Op::StartsWith | Op::EndsWith => {
                let s = self.arg(args, 0, item)?;
                let affix = self.arg(args, 1, item)?;
                if s.is_nullish() {
                    return Ok(Value::Bool(false));
                }
                let (s, affix) = (s.to_text(), affix.to_text());
                Ok(Value::Bool(if op == Op::StartsWith {
                    s.starts_with(&affix)
                } else {
                    s.ends_with(&affix)
                }))
            }
            Op::Split => {
                let s = self.arg(args, 0, item)?;
                if s.is_nullish() {
                    return Ok(Value::List(Vec::new()));
                }
                let s = s.to_text();
                let sep = self.arg(args, 1, item)?.to_text();
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::Text(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(|p| Value::Text(p.to_string())).collect()
                };
                Ok(Value::List(parts))
            }

            // ── Collections ──────────────────────────────────────────
            Op::Merge => {
                let mut out = Vec::new();
                for v in self.all_args(args, item)? {
                    match v {
                        Value::List(items) => out.extend(items),
                        other => out.push(other),
                    }
                }
                Ok(Value::List(out))
            }
            Op::Map => {
                let items = as_list(self.arg(args, 0, item)?);
                let mut out = Vec::with_capacity(items.len());
                for it in &items {
                    out.push(self.eval_in(&args[1], Some(it))?);
                }
                Ok(Value::List(out))
            }
            Op::Filter => {
                let items = as_list(self.arg(args, 0, item)?);
                let mut out = Vec::new();
                for it in items {
                    if self.eval_in(&args[1], Some(&it))?.is_truthy() {
                        out.push(it);
                    }
                }
                Ok(Value::List(out))
            }
            Op::Reduce => {
                let items = as_list(self.arg(args, 0, item)?);
                let mut acc = self.arg(args, 2, item)?;
                for it in items {
                    let mut frame = BTreeMap::new();
                    frame.insert("current".to_string(), it);
                    frame.insert("accumulator".to_string(), acc);
                    acc = self.eval_in(&args[1], Some(&Value::Record(frame)))?;
                }
                Ok(acc)
            }
            Op::All | Op::Some | Op::None => {
                let items = as_list(self.arg(args, 0, item)?);
                if op == Op::All && items.is_empty() {
                    return Ok(Value::Bool(false));
                }
                let mut hits = 0usize;
                for it in &items {
                    if self.eval_in(&args[1], Some(it))?.is_truthy() {
                        hits += 1;
                    } else if op == Op::All {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(match op {
                    Op::All => true,
                    Op::Some => hits > 0,
                    _ => hits == 0,
                }))
            }
            Op::Sum => {
                let items = as_list(self.arg(args, 0, item)?);
                let field = match args.len() {
                    1 => None,
                    _ => Some(DataPath::parse(&self.arg(args, 1, item)?.to_text())),
                };
                let mut total = Decimal::ZERO;
                for it in items {
                    let v = match &field {
                        Some(f) => it.lookup(f.segments()),
                        None => it,
                    };
                    if v.is_nullish() {
                        continue;
                    }
                    let Some(t) = v.to_number().and_then(|n| numeric::add(total, n)) else {
                        return Ok(Value::Absent);
                    };
                    total = t;
                }
                Ok(Value::Number(total))
            }
            Op::Count => Ok(Value::Number(Decimal::from(
                match self.arg(args, 0, item)? {
                    Value::List(items) => items.len(),
                    Value::Absent | Value::Null => 0,
                    _ => 1,
                },
            ))),

            // ── Dates ────────────────────────────────────────────────
            Op::Today => Ok(Value::Text(self.clock.today())),
            Op::Now => Ok(Value::Text(self.clock.now())),
            Op::Date => {
                let y = self.int_arg(args, 0, item)?;
                let m = self.int_arg(args, 1, item)?;
                let d = self.int_arg(args, 2, item)?;
                let date = match (y, m, d) {
                    (Some(y), Some(m), Some(d)) => dates::from_parts(y, m, d),
                    _ => None,
                };
                Ok(date_result(date))
            }
            Op::Year | Op::Month | Op::Day => {
                let Some(date) = self.date_arg(args, 0, item)? else {
                    return Ok(Value::Absent);
                };
                let part = match op {
                    Op::Year => i64::from(date.year()),
                    Op::Month => i64::from(date.month() as u8),
                    _ => i64::from(date.day()),
                };
                Ok(Value::Number(Decimal::from(part)))
            }
            Op::Days => {
                let start = self.date_arg(args, 0, item)?;
                let end = self.date_arg(args, 1, item)?;
                Ok(number_result(
                    start
                        .zip(end)
                        .map(|(s, e)| Decimal::from(dates::days_between(s, e))),
                ))
            }
            Op::DateAdd => {
                let Some(date) = self.date_arg(args, 0, item)? else {
                    return Ok(Value::Absent);
                };
                let Some(amount) = self.int_arg(args, 1, item)? else {
                    return Ok(Value::Absent);
                };
                let unit = self.arg(args, 2, item)?.to_text().to_lowercase();
                let shifted = match unit.as_str() {
                    "day" | "days" | "d" => dates::add_days(date, amount),
                    "week" | "weeks" | "w" => amount
                        .checked_mul(7)
                        .and_then(|days| dates::add_days(date, days)),
                    "month" | "months" | "m" => dates::add_months(date, amount),
                    "year" | "years" | "y" => amount
                        .checked_mul(12)
                        .and_then(|months| dates::add_months(date, months)),
                    other => {
                        return Err(ExpressionError::new(format!(
                            "'dateadd': unknown unit '{}'",
                            other
                        )))
                    }
                };
                Ok(date_result(shifted))
            }

            // ── Options ──────────────────────────────────────────────
            Op::RangeOptions => {
                let lo = self.arg(args, 0, item)?.to_number();
                let hi = self.arg(args, 1, item)?.to_number();
                let step = match args.len() {
                    3 => self.arg(args, 2, item)?.to_number(),
                    _ => Some(Decimal::ONE),
                };
                let (Some(lo), Some(hi), Some(step)) = (lo, hi, step) else {
                    return Ok(Value::Absent);
                };
                if step <= Decimal::ZERO {
                    return Err(ExpressionError::new("'rangeoptions': step must be positive"));
                }
                let mut out = Vec::new();
                let mut n = lo;
                while n <= hi {
                    if out.len() >= MAX_RANGE_OPTIONS {
                        return Err(ExpressionError::new(format!(
                            "'rangeoptions': more than {} options",
                            MAX_RANGE_OPTIONS
                        )));
                    }
                    let mut option = BTreeMap::new();
                    option.insert("label".to_string(), Value::Text(numeric::format_decimal(n)));
                    option.insert("value".to_string(), Value::Number(n));
                    out.push(Value::Record(option));
                    let Some(next) = numeric::add(n, step) else {
                        break;
                    };
                    n = next;
                }
                Ok(Value::List(out))
            }
        }
    }

    fn missing_keys(&self, keys: &[Value], item: Option<&Value>) -> Vec<Value> {
        keys.iter()
            .filter(|k| {
                let found = self.var_lookup(&DataPath::parse(&k.to_text()), item);
                found.is_nullish() || found == Value::Text(String::new())
            })
            .cloned()
            .collect()
    }

    fn int_arg(&self, args: &[Expr], i: usize, item: Option<&Value>) -> Result<Option<i64>, ExpressionError> {
        if i >= args.len() {
            return Ok(None);
        }
        Ok(self
            .arg(args, i, item)?
            .to_number()
            .and_then(|d| d.trunc().to_i64()))
    }

    fn date_arg(&self, args: &[Expr], i: usize, item: Option<&Value>) -> Result<Option<time::Date>, ExpressionError> {
        Ok(match self.arg(args, i, item)? {
            Value::Text(s) => dates::parse_date(&s),
            _ => None,
        })
    }
}

fn number_or_zero(v: &Value) -> Option<Decimal> {
    if v.is_nullish() {
        Some(Decimal::ZERO)
    } else {
        v.to_number()
    }
}

fn number_result(n: Option<Decimal>) -> Value {
    n.map(Value::Number).unwrap_or(Value::Absent)
}

fn date_result(d: Option<time::Date>) -> Value {
    d.map(|d| Value::Text(dates::format_date(d)))
        .unwrap_or(Value::Absent)
}

fn as_list(v: Value) -> Vec<Value> {
    match v {
        Value::List(items) => items,
        _ => Vec::new(),
    }
}

fn contains(hay: &Value, needle: &Value) -> bool {
    match hay {
        Value::List(items) => items.iter().any(|i| loose_eq(i, needle) == Some(true)),
        Value::Text(s) => !needle.is_nullish() && s.contains(needle.to_text().as_str()),
        _ => false,
    }
}

/// `==` semantics. `None` when a number meets non-numeric text.
pub fn loose_eq(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (x, y) if x.is_nullish() && y.is_nullish() => Some(true),
        (x, y) if x.is_nullish() || y.is_nullish() => Some(false),
        (Value::Number(x), Value::Number(y)) => Some(x == y),
        (Value::Number(x), Value::Text(t)) | (Value::Text(t), Value::Number(x)) => {
            numeric::parse_decimal(t).map(|y| *x == y)
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) => match (a.to_number(), b.to_number()) {
            (Some(x), Some(y)) => Some(x == y),
            _ => Some(false),
        },
        (Value::Text(x), Value::Text(y)) => Some(x == y),
        _ => Some(a == b),
    }
}

pub fn strict_eq(a: &Value, b: &Value) -> bool {
    if a.is_nullish() && b.is_nullish() {
        return true;
    }
    a == b
}

/// Ordering for `<` and friends. Two non-numeric strings compare
/// lexically (ISO dates order correctly); anything else compares as
/// numbers, and a side that is not a number makes the result `None`.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::Text(x), Value::Text(y)) = (a, b) {
        match (numeric::parse_decimal(x), numeric::parse_decimal(y)) {
            (Some(x), Some(y)) => return Some(x.cmp(&y)),
            (None, None) => return Some(x.cmp(y)),
            _ => return None,
        }
    }
    if a.is_nullish() || b.is_nullish() {
        return None;
    }
    Some(a.to_number()?.cmp(&b.to_number()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn clock() -> Clock {
        Clock::fixed(datetime!(2024-05-06 07:08:09 UTC))
    }

    fn run(expr: serde_json::Value, root: serde_json::Value) -> EvalResult {
        let compiled = Expr::compile(&expr).unwrap();
        let c = clock();
        Evaluator::new(&root, &c).eval(&compiled)
    }

    fn ok(expr: serde_json::Value, root: serde_json::Value) -> serde_json::Value {
        run(expr, root).unwrap().to_json()
    }

    // ── Access ───────────────────────────────────────────────────────

    #[test]
    fn var_reads_nested_and_defaults() {
        let root = json!({"a": {"b": 5}, "n": null});
        assert_eq!(ok(json!({"var": "a.b"}), root.clone()), json!(5));
        assert_eq!(ok(json!({"var": ["x", 9]}), root.clone()), json!(9));
        assert_eq!(ok(json!({"var": ["n", "d"]}), root), json!("d"));
    }

    #[test]
    fn missing_path_is_absent() {
        let v = run(json!({"var": "a.b.c"}), json!({"a": 1})).unwrap();
        assert!(v.is_absent());
    }

    #[test]
    fn context_and_params_roots() {
        let root = json!({"$context": {"role": "admin"}, "$params": {"rate": 2}});
        assert_eq!(ok(json!({"var": "$context.role"}), root.clone()), json!("admin"));
        assert_eq!(ok(json!({"*": [{"var": "$params.rate"}, 3]}), root), json!(6));
    }

    #[test]
    fn missing_and_missing_some() {
        let root = json!({"a": 1, "b": ""});
        assert_eq!(ok(json!({"missing": ["a", "b", "c"]}), root.clone()), json!(["b", "c"]));
        assert_eq!(ok(json!({"missing_some": [1, ["a", "c"]]}), root.clone()), json!([]));
        assert_eq!(ok(json!({"missing_some": [2, ["a", "c"]]}), root), json!(["c"]));
    }

    // ── Logic and comparison ─────────────────────────────────────────

    #[test]
    fn if_chains() {
        let e = json!({"if": [{"<": [{"var": "x"}, 10]}, "small", {"<": [{"var": "x"}, 100]}, "medium", "large"]});
        assert_eq!(ok(e.clone(), json!({"x": 5})), json!("small"));
        assert_eq!(ok(e.clone(), json!({"x": 50})), json!("medium"));
        assert_eq!(ok(e, json!({"x": 500})), json!("large"));
    }

    #[test]
    fn and_or_short_circuit_past_invalid() {
        assert_eq!(ok(json!({"and": [false, {"bogus": []}]}), json!({})), json!(false));
        assert_eq!(ok(json!({"or": [1, {"bogus": []}]}), json!({})), json!(1));
    }

    #[test]
    fn loose_equality_coerces_numeric_text() {
        assert_eq!(ok(json!({"==": ["10", 10]}), json!({})), json!(true));
        assert_eq!(ok(json!({"==": [1.0, 1]}), json!({})), json!(true));
        assert_eq!(ok(json!({"===": ["10", 10]}), json!({})), json!(false));
    }

    #[test]
    fn non_numeric_text_against_number_is_absent() {
        assert!(run(json!({"==": ["abc", 1]}), json!({})).unwrap().is_absent());
        assert!(run(json!({">": ["abc", 1]}), json!({})).unwrap().is_absent());
        assert!(!run(json!({"!!": {">": ["abc", 1]}}), json!({})).unwrap().is_truthy());
    }

    #[test]
    fn between_form() {
        assert_eq!(ok(json!({"<": [1, 5, 10]}), json!({})), json!(true));
        assert_eq!(ok(json!({"<=": [1, 1, 0]}), json!({})), json!(false));
    }

    #[test]
    fn iso_dates_compare_lexically() {
        assert_eq!(ok(json!({"<": ["2024-01-01", "2024-02-01"]}), json!({})), json!(true));
    }

    // ── Arithmetic ───────────────────────────────────────────────────

    #[test]
    fn decimal_arithmetic() {
        assert_eq!(ok(json!({"+": [0.1, 0.2]}), json!({})), json!(0.3));
        assert_eq!(ok(json!({"-": [5]}), json!({})), json!(-5));
        assert_eq!(ok(json!({"/": [7, 2]}), json!({})), json!(3.5));
        assert_eq!(ok(json!({"%": [7, 2]}), json!({})), json!(1));
        assert_eq!(ok(json!({"max": [[3, 9, 4]]}), json!({})), json!(9));
        assert_eq!(ok(json!({"round": [2.345, 2]}), json!({})), json!(2.35));
        assert_eq!(ok(json!({"pow": [2, 3]}), json!({})), json!(8));
    }

    #[test]
    fn addition_treats_absent_as_zero() {
        assert_eq!(ok(json!({"+": [{"var": "a"}, 2]}), json!({})), json!(2));
    }

    #[test]
    fn division_by_zero_is_absent() {
        assert!(run(json!({"/": [1, 0]}), json!({})).unwrap().is_absent());
    }

    // ── Strings ──────────────────────────────────────────────────────

    #[test]
    fn string_operators() {
        assert_eq!(ok(json!({"cat": ["a", 1, true]}), json!({})), json!("a1true"));
        assert_eq!(ok(json!({"substr": ["jsonlogic", 4]}), json!({})), json!("logic"));
        assert_eq!(ok(json!({"substr": ["jsonlogic", -5, 2]}), json!({})), json!("lo"));
        assert_eq!(ok(json!({"length": "héllo"}), json!({})), json!(5));
        assert_eq!(ok(json!({"upper": "abc"}), json!({})), json!("ABC"));
        assert_eq!(ok(json!({"split": ["a,b", ","]}), json!({})), json!(["a", "b"]));
        assert_eq!(ok(json!({"in": ["ell", "hello"]}), json!({})), json!(true));
    }

    // ── Collections ──────────────────────────────────────────────────

    #[test]
    fn iteration_is_item_relative() {
        let root = json!({"rows": [{"p": 2}, {"p": 5}], "limit": 3});
        assert_eq!(ok(json!({"map": [{"var": "rows"}, {"var": "p"}]}), root.clone()), json!([2, 5]));
        assert_eq!(
            ok(json!({"filter": [{"var": "rows"}, {">": [{"var": "p"}, {"$ref": "limit"}]}]}), root.clone()),
            json!([{"p": 5}])
        );
        assert_eq!(
            ok(json!({"reduce": [{"var": "rows"}, {"+": [{"var": "accumulator"}, {"var": "current.p"}]}, 0]}), root.clone()),
            json!(7)
        );
        assert_eq!(ok(json!({"some": [{"var": "rows"}, {">": [{"var": "p"}, 4]}]}), root.clone()), json!(true));
        assert_eq!(ok(json!({"all": [[], true]}), root.clone()), json!(false));
        assert_eq!(ok(json!({"sum": [{"var": "rows"}, "p"]}), root), json!(7));
    }

    #[test]
    fn merge_flattens_one_level() {
        assert_eq!(ok(json!({"merge": [[1, 2], 3, [[4]]]}), json!({})), json!([1, 2, 3, [4]]));
    }

    // ── Dates ────────────────────────────────────────────────────────

    #[test]
    fn date_operators() {
        assert_eq!(ok(json!({"today": []}), json!({})), json!("2024-05-06"));
        assert_eq!(ok(json!({"year": "2020-02-29"}), json!({})), json!(2020));
        assert_eq!(ok(json!({"days": ["2024-01-01", "2024-01-31"]}), json!({})), json!(30));
        assert_eq!(ok(json!({"dateadd": ["2024-01-31", 1, "months"]}), json!({})), json!("2024-02-29"));
        assert_eq!(ok(json!({"date": [2024, 2, 30]}), json!({})), json!(null));
    }

    #[test]
    fn dateadd_unknown_unit_is_error() {
        assert!(run(json!({"dateadd": ["2024-01-01", 1, "fortnights"]}), json!({})).is_err());
    }

    // ── Options and errors ───────────────────────────────────────────

    #[test]
    fn rangeoptions_builds_label_value_pairs() {
        assert_eq!(
            ok(json!({"rangeoptions": [1, 3]}), json!({})),
            json!([
                {"label": "1", "value": 1},
                {"label": "2", "value": 2},
                {"label": "3", "value": 3}
            ])
        );
    }

    #[test]
    fn invalid_node_fails_at_evaluation() {
        let err = run(json!({"frobnicate": [1]}), json!({})).unwrap_err();
        assert!(err.message.contains("frobnicate"));
        let err = run(json!({"==": [1]}), json!({})).unwrap_err();
        assert!(err.message.contains("expected 2"));
    }
}
