//! Dependency graph construction
//!
//! Turns a set of extensions into levels: level `n` holds every kind whose
//! dependencies all sit in levels `0..n`. Kinds in one level are mutually
//! independent. Within a level, kinds keep the order of the input list so
//! builds are reproducible.
//!
//! Computed level assignments are memoized in a [`DependencyGraphCache`]
//! keyed by the canonical (sorted) shape of the graph, and projected back
//! onto each caller's own input order.

pub mod cache;

pub use cache::{CacheStats, DependencyGraphCache};

use crate::error::{ComposeError, ComposeResult};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Ordered list of levels, each an ordered list of kinds
pub type Levels = Vec<Vec<String>>;

/// One vertex: a kind and the kinds it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub kind: String,
    pub depends_on: Vec<String>,
}

impl GraphNode {
    pub fn new<I, S>(kind: impl Into<String>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        }
    }
}

/// Canonical identity of a graph: sorted kinds, each with its sorted
/// in-graph dependencies. Two node lists that differ only in order share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphKey(Vec<(String, Vec<String>)>);

impl GraphKey {
    fn from_nodes(nodes: &[GraphNode]) -> Self {
        let mut entries: Vec<(String, Vec<String>)> = nodes
            .iter()
            .map(|n| {
                let mut deps = n.depends_on.clone();
                deps.sort();
                deps.dedup();
                (n.kind.clone(), deps)
            })
            .collect();
        entries.sort();
        Self(entries)
    }

    /// The sorted kind set
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Short content hash of the key, for logs and plan output
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (kind, deps) in &self.0 {
            hasher.update(kind.as_bytes());
            hasher.update([0u8]);
            for dep in deps {
                hasher.update(dep.as_bytes());
                hasher.update([1u8]);
            }
            hasher.update([2u8]);
        }
        let hash = hex::encode(hasher.finalize());
        hash[..12].to_string()
    }
}

/// Cycle-free level ordering of a set of kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    levels: Levels,
    key: GraphKey,
    cache_hit: bool,
}

impl DependencyGraph {
    /// Build the graph for `nodes`.
    ///
    /// Dependencies for which `is_external` returns true (already built in
    /// this container or an ancestor) are satisfied and do not constrain the
    /// ordering. Any other dependency absent from `nodes` is an error.
    pub fn build(nodes: &[GraphNode], is_external: impl Fn(&str) -> bool) -> ComposeResult<Self> {
        let nodes = internal_nodes(nodes, is_external)?;
        let key = GraphKey::from_nodes(&nodes);
        let levels = compute_levels(&nodes)?;
        Ok(Self {
            levels,
            key,
            cache_hit: false,
        })
    }

    /// Like [`DependencyGraph::build`], memoized through `cache`.
    ///
    /// A hit yields exactly the levels a fresh computation would.
    pub fn build_cached(
        nodes: &[GraphNode],
        is_external: impl Fn(&str) -> bool,
        cache: &DependencyGraphCache,
    ) -> ComposeResult<Self> {
        let nodes = internal_nodes(nodes, is_external)?;
        let key = GraphKey::from_nodes(&nodes);

        let (canonical, cache_hit) = cache.get_or_compute(&key, || {
            let mut sorted = nodes.clone();
            sorted.sort_by(|a, b| a.kind.cmp(&b.kind));
            compute_levels(&sorted).map(Arc::new)
        })?;

        debug!(
            "Graph {} ({} kinds, {} levels, cache {})",
            key.fingerprint(),
            nodes.len(),
            canonical.len(),
            if cache_hit { "hit" } else { "miss" }
        );

        Ok(Self {
            levels: project(&canonical, &nodes),
            key,
            cache_hit,
        })
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn into_levels(self) -> Levels {
        self.levels
    }

    pub fn key(&self) -> &GraphKey {
        &self.key
    }

    /// Whether the levels came from the cache
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    pub fn level_of(&self, kind: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|k| k == kind))
    }

    pub fn kind_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Validate dependencies and drop edges to external kinds
fn internal_nodes(
    nodes: &[GraphNode],
    is_external: impl Fn(&str) -> bool,
) -> ComposeResult<Vec<GraphNode>> {
    let present: HashSet<&str> = nodes.iter().map(|n| n.kind.as_str()).collect();

    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut deps = Vec::with_capacity(node.depends_on.len());
        for dep in &node.depends_on {
            if *dep == node.kind {
                return Err(ComposeError::SelfDependency {
                    kind: node.kind.clone(),
                });
            }
            if present.contains(dep.as_str()) {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            } else if !is_external(dep) {
                return Err(ComposeError::MissingDependency {
                    kind: dep.clone(),
                    requested_by: node.kind.clone(),
                });
            }
        }
        out.push(GraphNode {
            kind: node.kind.clone(),
            depends_on: deps,
        });
    }
    Ok(out)
}

/// Breadth-first layering (Kahn). All dependencies must be in `nodes`.
fn compute_levels(nodes: &[GraphNode]) -> ComposeResult<Levels> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.kind.as_str(), i))
        .collect();

    let mut pending: Vec<usize> = nodes.iter().map(|n| n.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.depends_on {
            dependents[index[dep.as_str()]].push(i);
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &i in &current {
            for &d in &dependents[i] {
                pending[d] -= 1;
                if pending[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        levels.push(current.iter().map(|&i| nodes[i].kind.clone()).collect());
        current = next;
    }

    if placed < nodes.len() {
        let unplaced: Vec<bool> = pending.iter().map(|&p| p > 0).collect();
        return Err(ComposeError::Cycle {
            path: find_cycle(nodes, &index, &unplaced),
        });
    }

    Ok(levels)
}

/// Walk unresolved dependencies from the first unplaced node until a kind
/// repeats. Every unplaced node has at least one unplaced dependency, so the
/// walk always closes a cycle.
fn find_cycle(nodes: &[GraphNode], index: &HashMap<&str, usize>, unplaced: &[bool]) -> Vec<String> {
    let Some(start) = unplaced.iter().position(|&u| u) else {
        return Vec::new();
    };

    let mut walk: Vec<usize> = Vec::new();
    let mut seen_at: HashMap<usize, usize> = HashMap::new();
    let mut cursor = start;

    loop {
        if let Some(&pos) = seen_at.get(&cursor) {
            let mut path: Vec<String> = walk[pos..].iter().map(|&i| nodes[i].kind.clone()).collect();
            path.push(nodes[cursor].kind.clone());
            return path;
        }
        seen_at.insert(cursor, walk.len());
        walk.push(cursor);

        let next = nodes[cursor]
            .depends_on
            .iter()
            .map(|d| index[d.as_str()])
            .find(|&i| unplaced[i]);
        match next {
            Some(i) => cursor = i,
            None => return walk.iter().map(|&i| nodes[i].kind.clone()).collect(),
        }
    }
}

/// Reorder each canonical level by the caller's node order
fn project(canonical: &Levels, nodes: &[GraphNode]) -> Levels {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.kind.as_str(), i))
        .collect();

    canonical
        .iter()
        .map(|level| {
            let mut level = level.clone();
            level.sort_by_key(|k| position.get(k.as_str()).copied().unwrap_or(usize::MAX));
            level
        })
        .collect()
}
