//! Expression tree for the rule/logic vocabulary.
//!
//! Expressions arrive as JSON-logic documents: literals evaluate to
//! themselves and a single-key object `{op: args}` is an operator call.
//! Compilation resolves operator names and checks arity once, so the
//! evaluator never re-inspects raw JSON. Structural problems that make a
//! document unreadable are rejected here; an unknown operator or a wrong
//! argument count compiles to [`Expr::Invalid`] and only fails when that
//! expression is evaluated.

use crate::path::{DataPath, PathRoot};

/// A path operand of `var` / `$ref`.
#[derive(Debug, Clone, PartialEq)]
pub enum PathRef {
    Static(DataPath),
    Dynamic(Box<Expr>),
}

/// Paths an expression reads. `fixed` paths are spelled out in the
/// expression; `computed` holds the known prefix of each path that is only
/// built at evaluation time, an over-approximation of what it reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSet {
    pub fixed: Vec<DataPath>,
    pub computed: Vec<DataPath>,
}

impl ReadSet {
    pub fn extend(&mut self, other: ReadSet) {
        self.fixed.extend(other.fixed);
        self.computed.extend(other.computed);
    }

    /// Every read, sorted and deduplicated, plus the computed-path prefixes
    /// that are not also read as a fixed path.
    pub fn into_parts(self) -> (Vec<DataPath>, Vec<DataPath>) {
        let mut all: Vec<DataPath> = self.fixed.iter().chain(&self.computed).cloned().collect();
        all.sort();
        all.dedup();
        let mut computed: Vec<DataPath> = self
            .computed
            .into_iter()
            .filter(|p| !self.fixed.contains(p))
            .collect();
        computed.sort();
        computed.dedup();
        (all, computed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(serde_json::Value),
    Array(Vec<Expr>),
    /// Lookup relative to the innermost iteration item, or the root
    /// outside iteration.
    Var {
        path: PathRef,
        default: Option<Box<Expr>>,
    },
    /// Lookup that always starts at the root.
    Ref {
        path: PathRef,
        default: Option<Box<Expr>>,
    },
    Call {
        op: Op,
        args: Vec<Expr>,
    },
    Invalid {
        op: String,
        reason: String,
    },
}

/// Operators understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Missing,
    MissingSome,
    And,
    Or,
    Not,
    Truthy,
    If,
    Xor,
    IfNull,
    IsEmpty,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Abs,
    Round,
    RoundUp,
    RoundDown,
    Pow,
    Cat,
    Substr,
    Length,
    Upper,
    Lower,
    Trim,
    Contains,
    StartsWith,
    EndsWith,
    Split,
    In,
    Merge,
    Map,
    Filter,
    Reduce,
    All,
    Some,
    None,
    Sum,
    Count,
    Today,
    Now,
    Date,
    Year,
    Month,
    Day,
    Days,
    DateAdd,
    RangeOptions,
}

impl Op {
    pub fn from_name(name: &str) -> Option<Op> {
        let op = match name {
            "missing" => Op::Missing,
            "missing_some" => Op::MissingSome,
            "and" => Op::And,
            "or" => Op::Or,
            "!" | "not" => Op::Not,
            "!!" => Op::Truthy,
            "if" | "?:" => Op::If,
            "xor" => Op::Xor,
            "ifnull" => Op::IfNull,
            "isempty" => Op::IsEmpty,
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "===" => Op::StrictEq,
            "!==" => Op::StrictNe,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "/" => Op::Div,
            "%" => Op::Mod,
            "min" => Op::Min,
            "max" => Op::Max,
            "abs" => Op::Abs,
            "round" => Op::Round,
            "roundup" => Op::RoundUp,
            "rounddown" => Op::RoundDown,
            "pow" => Op::Pow,
            "cat" => Op::Cat,
            "substr" => Op::Substr,
            "length" | "len" => Op::Length,
            "upper" => Op::Upper,
            "lower" => Op::Lower,
            "trim" => Op::Trim,
            "contains" => Op::Contains,
            "startswith" => Op::StartsWith,
            "endswith" => Op::EndsWith,
            "split" => Op::Split,
            "in" => Op::In,
            "merge" => Op::Merge,
            "map" => Op::Map,
            "filter" => Op::Filter,
            "reduce" => Op::Reduce,
            "all" => Op::All,
            "some" => Op::Some,
            "none" => Op::None,
            "sum" => Op::Sum,
            "count" => Op::Count,
            "today" => Op::Today,
            "now" => Op::Now,
            "date" => Op::Date,
            "year" => Op::Year,
            "month" => Op::Month,
            "day" => Op::Day,
            "days" => Op::Days,
            "dateadd" => Op::DateAdd,
            "rangeoptions" => Op::RangeOptions,
            _ => return None,
        };
        Some(op)
    }

    /// Accepted argument count as `(min, max)`; `None` means unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Op::Missing | Op::Cat | Op::Merge => (0, None),
            Op::Today | Op::Now => (0, Some(0)),
            Op::And | Op::Or | Op::If | Op::Add | Op::Mul | Op::Min | Op::Max => (1, None),
            Op::Not
            | Op::Truthy
            | Op::IsEmpty
            | Op::Abs
            | Op::Length
            | Op::Upper
            | Op::Lower
            | Op::Trim
            | Op::Count
            | Op::Year
            | Op::Month
            | Op::Day => (1, Some(1)),
            Op::Sub | Op::Round | Op::RoundUp | Op::RoundDown | Op::Sum => (1, Some(2)),
            Op::MissingSome
            | Op::Xor
            | Op::IfNull
            | Op::Eq
            | Op::Ne
            | Op::StrictEq
            | Op::StrictNe
            | Op::Gt
            | Op::Ge
            | Op::Div
            | Op::Mod
            | Op::Pow
            | Op::Contains
            | Op::StartsWith
            | Op::EndsWith
            | Op::Split
            | Op::In
            | Op::Map
            | Op::Filter
            | Op::All
            | Op::Some
            | Op::None
            | Op::Days => (2, Some(2)),
            Op::Lt | Op::Le | Op::Substr | Op::RangeOptions => (2, Some(3)),
            Op::Reduce | Op::Date | Op::DateAdd => (3, Some(3)),
        }
    }

    /// Operators whose second argument is evaluated once per list item.
    pub fn iterates(self) -> bool {
        matches!(
            self,
            Op::Map | Op::Filter | Op::Reduce | Op::All | Op::Some | Op::None
        )
    }

    /// Operators whose result depends on the wall clock.
    pub fn is_volatile(self) -> bool {
        matches!(self, Op::Today | Op::Now)
    }
}

impl Expr {
    /// Compile a JSON-logic document.
    ///
    /// Returns `Err` only for structural problems: an operator object with
    /// more than one key, an empty operator name, or a path operand that is
    /// neither a string, a number nor an expression.
    pub fn compile(doc: &serde_json::Value) -> Result<Expr, String> {
        match doc {
            serde_json::Value::Array(items) => {
                let compiled = items.iter().map(Expr::compile).collect::<Result<_, _>>()?;
                Ok(Expr::Array(compiled))
            }
            serde_json::Value::Object(map) => {
                if map.is_empty() {
                    return Ok(Expr::Literal(doc.clone()));
                }
                if map.len() > 1 {
                    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                    return Err(format!(
                        "operator object must have exactly one key, found [{}]",
                        keys.join(", ")
                    ));
                }
                let Some((name, args)) = map.iter().next() else {
                    return Ok(Expr::Literal(doc.clone()));
                };
                compile_call(name, args)
            }
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    /// Paths this expression reads, for dependency tracking.
    ///
    /// Inside iteration bodies `var` is item-relative and contributes no
    /// read unless it addresses `$context` or `$params`; `$ref` stays
    /// absolute. A computed path operand reads its fixed prefix (see
    /// [`ReadSet`]).
    pub fn reads(&self) -> Vec<DataPath> {
        self.read_set().into_parts().0
    }

    /// Reads split into fixed paths and computed-path prefixes.
    pub fn read_set(&self) -> ReadSet {
        let mut out = ReadSet::default();
        self.collect_reads(false, &mut out);
        out
    }

    fn collect_reads(&self, in_iteration: bool, out: &mut ReadSet) {
        match self {
            Expr::Literal(_) | Expr::Invalid { .. } => {}
            Expr::Array(items) => {
                for item in items {
                    item.collect_reads(in_iteration, out);
                }
            }
            Expr::Var { path, default } => {
                match path {
                    PathRef::Static(p) => {
                        if !in_iteration || p.root_kind() != PathRoot::Data {
                            out.fixed.push(p.clone());
                        }
                    }
                    PathRef::Dynamic(inner) => {
                        inner.collect_reads(in_iteration, out);
                        // Item-relative in iteration, so the prefix says
                        // nothing about the root.
                        out.computed.push(if in_iteration {
                            DataPath::root()
                        } else {
                            computed_prefix(inner)
                        });
                    }
                }
                if let Some(d) = default {
                    d.collect_reads(in_iteration, out);
                }
            }
            Expr::Ref { path, default } => {
                match path {
                    PathRef::Static(p) => out.fixed.push(p.clone()),
                    PathRef::Dynamic(inner) => {
                        inner.collect_reads(in_iteration, out);
                        out.computed.push(computed_prefix(inner));
                    }
                }
                if let Some(d) = default {
                    d.collect_reads(in_iteration, out);
                }
            }
            Expr::Call { op, args } => match op {
                Op::Missing | Op::MissingSome => {
                    for arg in args {
                        collect_key_reads(arg, in_iteration, out);
                    }
                }
                op if op.iterates() => {
                    for (i, arg) in args.iter().enumerate() {
                        arg.collect_reads(in_iteration || i == 1, out);
                    }
                }
                _ => {
                    for arg in args {
                        arg.collect_reads(in_iteration, out);
                    }
                }
            },
        }
    }

    /// True if any operator in the tree depends on the wall clock.
    pub fn is_volatile(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Invalid { .. } => false,
            Expr::Array(items) => items.iter().any(Expr::is_volatile),
            Expr::Var { path, default } | Expr::Ref { path, default } => {
                let in_path = match path {
                    PathRef::Static(_) => false,
                    PathRef::Dynamic(inner) => inner.is_volatile(),
                };
                in_path || default.as_ref().is_some_and(|d| d.is_volatile())
            }
            Expr::Call { op, args } => op.is_volatile() || args.iter().any(Expr::is_volatile),
        }
    }

    /// Collect the problems of every invalid node, in tree order.
    pub fn invalid_nodes(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_invalid(&mut out);
        out
    }

    fn collect_invalid(&self, out: &mut Vec<String>) {
        match self {
            Expr::Invalid { op, reason } => out.push(format!("'{}': {}", op, reason)),
            Expr::Literal(_) => {}
            Expr::Array(items) => items.iter().for_each(|e| e.collect_invalid(out)),
            Expr::Var { path, default } | Expr::Ref { path, default } => {
                if let PathRef::Dynamic(inner) = path {
                    inner.collect_invalid(out);
                }
                if let Some(d) = default {
                    d.collect_invalid(out);
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_invalid(out)),
        }
    }
}

fn collect_key_reads(arg: &Expr, in_iteration: bool, out: &mut ReadSet) {
    match arg {
        Expr::Literal(serde_json::Value::String(key)) => {
            let p = DataPath::parse(key);
            if !in_iteration || p.root_kind() != PathRoot::Data {
                out.fixed.push(p);
            }
        }
        Expr::Literal(_) => {}
        Expr::Array(items) => {
            for item in items {
                collect_key_reads(item, in_iteration, out);
            }
        }
        other => {
            other.collect_reads(in_iteration, out);
            if !in_iteration {
                out.computed.push(DataPath::root());
            }
        }
    }
}

/// The part of a computed path known at parse time: the complete segments
/// of a leading string literal of `cat`, or the root when there is none.
/// `{"cat": ["rates.", {"var": "plan"}]}` is always under `rates`.
fn computed_prefix(inner: &Expr) -> DataPath {
    let Expr::Call { op: Op::Cat, args } = inner else {
        return DataPath::root();
    };
    let Some(Expr::Literal(serde_json::Value::String(lead))) = args.first() else {
        return DataPath::root();
    };
    match lead.rfind(|c: char| matches!(c, '.' | '[' | '/')) {
        Some(end) => DataPath::parse(&lead[..end]),
        None => DataPath::root(),
    }
}

fn compile_call(name: &str, args: &serde_json::Value) -> Result<Expr, String> {
    if name.is_empty() {
        return Err("operator name must not be empty".to_string());
    }
    match name {
        "var" => {
            let (path, default) = compile_path_operand(name, args)?;
            return Ok(Expr::Var { path, default });
        }
        "$ref" | "ref" => {
            let (path, default) = compile_path_operand(name, args)?;
            return Ok(Expr::Ref { path, default });
        }
        "preserve" | "return" => return Ok(Expr::Literal(args.clone())),
        _ => {}
    }

    let compiled: Vec<Expr> = match args {
        serde_json::Value::Array(items) => {
            items.iter().map(Expr::compile).collect::<Result<_, _>>()?
        }
        single => vec![Expr::compile(single)?],
    };

    let Some(op) = Op::from_name(name) else {
        return Ok(Expr::Invalid {
            op: name.to_string(),
            reason: "unknown operator".to_string(),
        });
    };

    // `{"today": []}` and `{"today": null}` both mean "no arguments".
    let compiled = if op.arity().1 == Some(0) {
        compiled
            .into_iter()
            .filter(|e| !matches!(e, Expr::Literal(serde_json::Value::Null)))
            .collect()
    } else {
        compiled
    };

    let (min, max) = op.arity();
    let n = compiled.len();
    if n < min || max.is_some_and(|m| n > m) {
        let expected = match max {
            Some(m) if m == min => format!("{}", min),
            Some(m) => format!("{}..{}", min, m),
            None => format!("at least {}", min),
        };
        return Ok(Expr::Invalid {
            op: name.to_string(),
            reason: format!("expected {} argument(s), got {}", expected, n),
        });
    }

    Ok(Expr::Call { op, args: compiled })
}

fn compile_path_operand(
    name: &str,
    args: &serde_json::Value,
) -> Result<(PathRef, Option<Box<Expr>>), String> {
    let (target, default) = match args {
        serde_json::Value::Array(items) => match items.as_slice() {
            [] => return Ok((PathRef::Static(DataPath::root()), None)),
            [target] => (target, None),
            [target, default, ..] => (target, Some(Box::new(Expr::compile(default)?))),
        },
        other => (other, None),
    };
    let path = match target {
        serde_json::Value::Null => PathRef::Static(DataPath::root()),
        serde_json::Value::String(s) => PathRef::Static(DataPath::parse(s)),
        serde_json::Value::Number(n) => PathRef::Static(DataPath::parse(&n.to_string())),
        serde_json::Value::Object(_) => PathRef::Dynamic(Box::new(Expr::compile(target)?)),
        other => {
            return Err(format!(
                "'{}' path must be a string, number or expression, got {}",
                name, other
            ))
        }
    };
    Ok((path, default))
}
