//! Path addressing shared by schema nodes, data, context and params.
//!
//! Every spelling a host may use is normalised to one canonical form:
//! a list of segments rendered as a dotted string (`a.0.b`). Accepted
//! inputs are dotted (`a.b`), bracketed (`a[0].b`, `a["b"]`), JSON
//! pointer (`/a/0/b`) and schema pointer (`#/a/properties/b`), where the
//! `properties` and `items` wrappers of the schema document are dropped.

use std::fmt;

/// Root segment under which the context object is addressed.
pub const CONTEXT_ROOT: &str = "$context";
/// Root segment under which the schema constants are addressed.
pub const PARAMS_ROOT: &str = "$params";

/// Which object a path reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Data,
    Context,
    Params,
}

/// A canonical, segment-based path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// The empty path; addresses the whole root and overlaps every path.
    pub fn root() -> Self {
        DataPath {
            segments: Vec::new(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataPath {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Parse any accepted spelling. Never fails: empty segments are
    /// dropped, so `""`, `"."` and `"#"` all parse to the root.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix('#') {
            return DataPath::from_segments(
                split_pointer(rest)
                    .into_iter()
                    .filter(|s| s != "properties" && s != "items"),
            );
        }
        if raw.starts_with('/') {
            return DataPath::from_segments(split_pointer(raw));
        }
        DataPath::from_segments(split_dotted(raw))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn root_kind(&self) -> PathRoot {
        match self.first() {
            Some(CONTEXT_ROOT) => PathRoot::Context,
            Some(PARAMS_ROOT) => PathRoot::Params,
            _ => PathRoot::Data,
        }
    }

    pub fn child(&self, segment: &str) -> DataPath {
        let mut segments = self.segments.clone();
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
        DataPath { segments }
    }

    pub fn join(&self, other: &DataPath) -> DataPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        DataPath { segments }
    }

    pub fn parent(&self) -> Option<DataPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(DataPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &DataPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True if a change at one path can change the value read at the other.
    pub fn overlaps(&self, other: &DataPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    pub fn strip_prefix(&self, prefix: &DataPath) -> Option<DataPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(DataPath {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// The root, every proper ancestor, then the path itself.
    pub fn ancestors(&self) -> impl Iterator<Item = DataPath> + '_ {
        (0..=self.segments.len()).map(move |n| DataPath {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Look the path up inside a JSON document. Objects are indexed by
    /// key, arrays by numeric segment. Missing intermediates yield `None`.
    pub fn lookup<'a>(&self, root: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        let mut current = root;
        for seg in &self.segments {
            current = match current {
                serde_json::Value::Object(map) => map.get(seg)?,
                serde_json::Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at this path, creating intermediate objects. Writing
    /// the root replaces the document. Existing arrays are indexed in
    /// place; an out-of-range index pads with nulls.
    pub fn assign(&self, root: &mut serde_json::Value, value: serde_json::Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            *root = value;
            return;
        };
        let mut current = root;
        for seg in parents {
            current = descend_or_create(current, seg);
        }
        if let serde_json::Value::Array(items) = current {
            if let Ok(idx) = last.parse::<usize>() {
                if idx >= items.len() {
                    items.resize(idx + 1, serde_json::Value::Null);
                }
                items[idx] = value;
                return;
            }
        }
        if let serde_json::Value::Object(map) = current {
            map.insert(last.clone(), value);
            return;
        }
        let mut map = serde_json::Map::new();
        map.insert(last.clone(), value);
        *current = serde_json::Value::Object(map);
    }

    /// Remove the value at this path; absent intermediates are a no-op.
    pub fn remove(&self, root: &mut serde_json::Value) -> Option<serde_json::Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = root;
        for seg in parents {
            current = match current {
                serde_json::Value::Object(map) => map.get_mut(seg)?,
                serde_json::Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match current {
            serde_json::Value::Object(map) => map.shift_remove(last),
            serde_json::Value::Array(items) => {
                let idx = last.parse::<usize>().ok()?;
                items.get_mut(idx).map(serde_json::Value::take)
            }
            _ => None,
        }
    }
}

fn descend_or_create<'a>(current: &'a mut serde_json::Value, seg: &str) -> &'a mut serde_json::Value {
    match (current, seg.parse::<usize>().ok()) {
        (serde_json::Value::Array(items), Some(idx)) => {
            if idx >= items.len() {
                items.resize(idx + 1, serde_json::Value::Null);
            }
            let slot = &mut items[idx];
            if !(slot.is_object() || slot.is_array()) {
                *slot = serde_json::Value::Object(serde_json::Map::new());
            }
            slot
        }
        (serde_json::Value::Object(map), _) => {
            let slot = map
                .entry(seg.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !(slot.is_object() || slot.is_array()) {
                *slot = serde_json::Value::Object(serde_json::Map::new());
            }
            slot
        }
        (other, _) => {
            *other = serde_json::Value::Object(serde_json::Map::new());
            descend_or_create(other, seg)
        }
    }
}

fn split_pointer(raw: &str) -> Vec<String> {
    raw.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn split_dotted(raw: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                segments.push(std::mem::take(&mut current));
            }
            '[' => {
                segments.push(std::mem::take(&mut current));
                let mut inner = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    inner.push(d);
                }
                let inner = inner.trim().trim_matches(|q: char| q == '"' || q == '\'');
                segments.push(inner.to_string());
            }
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for DataPath {
    fn from(raw: &str) -> Self {
        DataPath::parse(raw)
    }
}
