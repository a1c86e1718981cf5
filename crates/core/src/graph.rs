//! Dependency graph over evaluation units.
//!
//! Built once per parsed schema. Reads are indexed by canonical path
//! string in a sorted map, so "who reads something overlapping `p`" is a
//! lookup per ancestor of `p` plus one range scan over the keys under
//! `p.`; the cost depends on path depth and hit count, not schema size.

use crate::error::SchemaError;
use crate::path::{DataPath, PathRoot};
use crate::schema::{EvalUnit, NodeId, UnitId};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// canonical read path -> units reading it
    readers: BTreeMap<String, Vec<UnitId>>,
    /// writer unit -> units whose reads overlap its write path
    dependents: Vec<Vec<UnitId>>,
    /// the subset of `dependents` reached through fixed reads; only these
    /// edges can form a rejected cycle
    fixed: Vec<Vec<UnitId>>,
    /// unit -> array-subform scope it is evaluated in
    scopes: Vec<Option<NodeId>>,
    order: Vec<UnitId>,
    rank: Vec<usize>,
}

impl DependencyGraph {
    /// Index `units`, link writers to readers, reject cycles and compute a
    /// topological evaluation order (ties broken by unit id, which follows
    /// schema declaration order).
    pub fn build(units: &[EvalUnit]) -> Result<Self, SchemaError> {
        let mut readers: BTreeMap<String, Vec<UnitId>> = BTreeMap::new();
        for unit in units {
            // Constants never change after parse.
            for read in unit.reads.iter().filter(|r| r.root_kind() != PathRoot::Params) {
                let slot = readers.entry(read.to_string()).or_default();
                if slot.last() != Some(&unit.id) {
                    slot.push(unit.id);
                }
            }
        }

        let mut graph = DependencyGraph {
            readers,
            dependents: vec![Vec::new(); units.len()],
            fixed: vec![Vec::new(); units.len()],
            scopes: units.iter().map(|u| u.scope).collect(),
            order: Vec::new(),
            rank: vec![0; units.len()],
        };

        for unit in units {
            if let Some(write) = &unit.writes {
                // Reading a container of one's own output sees the value
                // from before this unit ran; only a fixed read of the written
                // path itself or something beneath it is a self-dependency.
                let self_reads = unit
                    .reads
                    .iter()
                    .any(|r| r.starts_with(write) && !unit.computed_reads.contains(r));
                let dependents: Vec<UnitId> = graph
                    .readers_overlapping(write)
                    .into_iter()
                    .filter(|id| *id != unit.id || self_reads)
                    .collect();
                graph.fixed[unit.id] = dependents
                    .iter()
                    .copied()
                    .filter(|id| units[*id].reads_fixed(write))
                    .collect();
                graph.dependents[unit.id] = dependents;
            }
        }

        graph.detect_cycles(units)?;
        graph.order = graph.topological_order();
        for (pos, id) in graph.order.iter().enumerate() {
            graph.rank[*id] = pos;
        }

        let edges: usize = graph.dependents.iter().map(Vec::len).sum();
        log::debug!(
            "dependency graph: {} units, {} read keys, {} edges",
            units.len(),
            graph.readers.len(),
            edges
        );
        Ok(graph)
    }

    /// Units whose reads overlap `path`: readers of `path` itself, of any
    /// ancestor (including the whole root) and of any descendant.
    pub fn readers_overlapping(&self, path: &DataPath) -> BTreeSet<UnitId> {
        let mut out = BTreeSet::new();
        for ancestor in path.ancestors() {
            if let Some(ids) = self.readers.get(&ancestor.to_string()) {
                out.extend(ids.iter().copied());
            }
        }
        if path.is_root() {
            for ids in self.readers.values() {
                out.extend(ids.iter().copied());
            }
        } else {
            let prefix = format!("{}.", path);
            for (_, ids) in self
                .readers
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
            {
                out.extend(ids.iter().copied());
            }
        }
        out
    }

    /// Direct dependents of a writer unit.
    pub fn dependents(&self, unit: UnitId) -> &[UnitId] {
        self.dependents.get(unit).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every unit in evaluation order.
    pub fn order(&self) -> &[UnitId] {
        &self.order
    }

    pub fn rank(&self, unit: UnitId) -> usize {
        self.rank.get(unit).copied().unwrap_or(usize::MAX)
    }

    pub fn scope_of(&self, unit: UnitId) -> Option<NodeId> {
        self.scopes.get(unit).copied().flatten()
    }

    /// Units evaluated in `scope`, in evaluation order.
    pub fn order_in(&self, scope: Option<NodeId>) -> Vec<UnitId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.scopes.get(*id).copied().flatten() == scope)
            .collect()
    }

    /// Transitive closure of the units affected by a change at any of
    /// `changed`, across all scopes, in evaluation order.
    pub fn affected_units(&self, changed: &[DataPath]) -> Vec<UnitId> {
        let seeds: BTreeSet<UnitId> = changed
            .iter()
            .flat_map(|p| self.readers_overlapping(p))
            .collect();
        self.closure(seeds, |_| true)
    }

    /// Like [`affected_units`](Self::affected_units), restricted to units
    /// evaluated in `scope`. Propagation does not pass through units of
    /// other scopes since those are not run by a scoped pass.
    pub fn affected_units_in(&self, changed: &[DataPath], scope: Option<NodeId>) -> Vec<UnitId> {
        let seeds: BTreeSet<UnitId> = changed
            .iter()
            .flat_map(|p| self.readers_overlapping(p))
            .collect();
        self.closure(seeds, |id| self.scope_of(id) == scope)
    }

    /// Close `seeds` over dependents within `scope`.
    pub fn close<I>(&self, seeds: I, scope: Option<NodeId>) -> Vec<UnitId>
    where
        I: IntoIterator<Item = UnitId>,
    {
        self.closure(seeds, |id| self.scope_of(id) == scope)
    }

    fn closure<I, F>(&self, seeds: I, keep: F) -> Vec<UnitId>
    where
        I: IntoIterator<Item = UnitId>,
        F: Fn(UnitId) -> bool,
    {
        let mut seen: HashSet<UnitId> = HashSet::new();
        let mut queue: VecDeque<UnitId> = VecDeque::new();
        for id in seeds {
            if keep(id) && seen.insert(id) {
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            for &next in self.dependents(id) {
                if keep(next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let mut out: Vec<UnitId> = seen.into_iter().collect();
        out.sort_by_key(|id| self.rank(*id));
        out
    }

    // ── Cycle detection ──────────────────────────────────────────────

    /// Depth-first search over fixed edges with an explicit stack, so long
    /// chains of computed values cannot exhaust the thread stack.
    fn detect_cycles(&self, units: &[EvalUnit]) -> Result<(), SchemaError> {
        let mut mark = vec![Mark::New; units.len()];
        let mut stack: Vec<(UnitId, usize)> = Vec::new();
        for start in 0..units.len() {
            if mark[start] != Mark::New {
                continue;
            }
            mark[start] = Mark::Open;
            stack.push((start, 0));
            while let Some(&(id, next)) = stack.last() {
                let Some(&child) = self.fixed[id].get(next) else {
                    mark[id] = Mark::Done;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match mark[child] {
                    Mark::New => {
                        mark[child] = Mark::Open;
                        stack.push((child, 0));
                    }
                    Mark::Open => return Err(cycle_error(units, &stack, child)),
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over every edge, smallest id first. Edges through
    /// computed paths may still close a loop; when nothing is ready the
    /// first unit whose fixed inputs are all placed goes next.
    fn topological_order(&self) -> Vec<UnitId> {
        let n = self.dependents.len();
        let mut pending = vec![0usize; n];
        let mut pending_fixed = vec![0usize; n];
        for targets in &self.dependents {
            for &t in targets {
                pending[t] += 1;
            }
        }
        for targets in &self.fixed {
            for &t in targets {
                pending_fixed[t] += 1;
            }
        }

        let mut placed = vec![false; n];
        let mut ready: BTreeSet<UnitId> = (0..n).filter(|id| pending[*id] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let next = match ready.pop_first() {
                Some(id) => id,
                None => match (0..n).find(|id| !placed[*id] && pending_fixed[*id] == 0) {
                    Some(id) => {
                        log::debug!("dependency loop through a computed path broken at unit {}", id);
                        id
                    }
                    None => break,
                },
            };
            if placed[next] {
                continue;
            }
            placed[next] = true;
            order.push(next);
            for &t in &self.dependents[next] {
                pending[t] -= 1;
                if pending[t] == 0 && !placed[t] {
                    ready.insert(t);
                }
            }
            for &t in &self.fixed[next] {
                pending_fixed[t] -= 1;
            }
        }
        order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Open,
    Done,
}

fn cycle_error(units: &[EvalUnit], stack: &[(UnitId, usize)], back_to: UnitId) -> SchemaError {
    let pos = stack.iter().position(|(u, _)| *u == back_to).unwrap_or(0);
    let mut cycle: Vec<&str> = stack[pos..]
        .iter()
        .map(|(u, _)| units[*u].label.as_str())
        .collect();
    cycle.push(units[back_to].label.as_str());
    SchemaError::new(
        units[back_to].node_path.to_string(),
        format!("cyclic dependency: {}", cycle.join(" \u{2192} ")),
    )
}
