//! Arena-backed dependency graph.
//!
//! Vertices live in a slot vector and are addressed by [`VertexId`]; each is
//! also interned by its key string so transforms can find vertices by
//! address. An edge `from -> to` means `from` depends on `to`: `to` must
//! finish before `from` starts.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::error::GraphError;

/// Anything that can be stored in a [`Graph`].
pub trait Vertex {
    /// Unique key of the vertex within its graph.
    fn key(&self) -> String;
}

/// Index of a vertex in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

impl VertexId {
    /// Raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    key: String,
    vertex: V,
    dependencies: BTreeSet<VertexId>,
    dependents: BTreeSet<VertexId>,
}

/// Directed graph of vertices keyed by string.
#[derive(Debug, Clone)]
pub struct Graph<V> {
    slots: Vec<Option<Slot<V>>>,
    index: HashMap<String, VertexId>,
}

impl<V> Default for Graph<V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V: Vertex> Graph<V> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex, returning the existing id if one with the same key is
    /// already present.
    pub fn add(&mut self, vertex: V) -> VertexId {
        let key = vertex.key();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = VertexId(self.slots.len());
        self.index.insert(key.clone(), id);
        self.slots.push(Some(Slot {
            key,
            vertex,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
        }));
        id
    }

    /// Swaps the vertex stored at `id`, keeping its edges. Returns the old
    /// vertex.
    pub fn replace(&mut self, id: VertexId, vertex: V) -> Option<V> {
        let key = vertex.key();
        let slot = self.slots.get_mut(id.0)?.as_mut()?;
        if slot.key != key {
            self.index.remove(&slot.key);
            self.index.insert(key.clone(), id);
            slot.key = key;
        }
        Some(std::mem::replace(&mut slot.vertex, vertex))
    }

    /// Removes a vertex and every edge touching it.
    pub fn remove(&mut self, id: VertexId) -> Option<V> {
        let slot = self.slots.get_mut(id.0)?.take()?;
        self.index.remove(&slot.key);
        for dep in &slot.dependencies {
            if let Some(Some(other)) = self.slots.get_mut(dep.0) {
                other.dependents.remove(&id);
            }
        }
        for dependent in &slot.dependents {
            if let Some(Some(other)) = self.slots.get_mut(dependent.0) {
                other.dependencies.remove(&id);
            }
        }
        Some(slot.vertex)
    }

    /// Makes `from` depend on `to`. Unknown ids are ignored.
    pub fn connect(&mut self, from: VertexId, to: VertexId) {
        if !self.contains(from) || !self.contains(to) {
            return;
        }
        if let Some(Some(slot)) = self.slots.get_mut(from.0) {
            slot.dependencies.insert(to);
        }
        if let Some(Some(slot)) = self.slots.get_mut(to.0) {
            slot.dependents.insert(from);
        }
    }

    /// Removes the edge `from -> to` if present.
    pub fn disconnect(&mut self, from: VertexId, to: VertexId) {
        if let Some(Some(slot)) = self.slots.get_mut(from.0) {
            slot.dependencies.remove(&to);
        }
        if let Some(Some(slot)) = self.slots.get_mut(to.0) {
            slot.dependents.remove(&from);
        }
    }

    /// Returns true if `from` directly depends on `to`.
    #[must_use]
    pub fn has_edge(&self, from: VertexId, to: VertexId) -> bool {
        self.slot(from).is_some_and(|s| s.dependencies.contains(&to))
    }

    /// Returns true if `id` names a live vertex.
    #[must_use]
    pub fn contains(&self, id: VertexId) -> bool {
        self.slot(id).is_some()
    }

    /// The vertex at `id`.
    #[must_use]
    pub fn get(&self, id: VertexId) -> Option<&V> {
        self.slot(id).map(|s| &s.vertex)
    }

    /// Mutable access to the vertex at `id`.
    ///
    /// The vertex key must not change through this reference; use
    /// [`Graph::replace`] for that.
    pub fn get_mut(&mut self, id: VertexId) -> Option<&mut V> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|s| &mut s.vertex)
    }

    /// Id of the vertex with `key`.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<VertexId> {
        self.index.get(key).copied()
    }

    /// Key of the vertex at `id`.
    #[must_use]
    pub fn key(&self, id: VertexId) -> Option<&str> {
        self.slot(id).map(|s| s.key.as_str())
    }

    /// Ids of all live vertices in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<VertexId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| VertexId(i))
            .collect()
    }

    /// Live vertices with their ids, in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &V)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|s| (VertexId(i), &s.vertex)))
    }

    /// Number of live vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the graph has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every edge as `(dependent, dependency)`.
    #[must_use]
    pub fn edges(&self) -> Vec<(VertexId, VertexId)> {
        self.vertices()
            .flat_map(|(id, _)| {
                self.dependencies_of(id)
                    .into_iter()
                    .map(move |dep| (id, dep))
            })
            .collect()
    }

    /// Direct dependencies of `id`.
    #[must_use]
    pub fn dependencies_of(&self, id: VertexId) -> Vec<VertexId> {
        self.slot(id)
            .map(|s| s.dependencies.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `id`.
    #[must_use]
    pub fn dependents_of(&self, id: VertexId) -> Vec<VertexId> {
        self.slot(id)
            .map(|s| s.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Everything `id` transitively depends on, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: VertexId) -> BTreeSet<VertexId> {
        let mut seen: BTreeSet<VertexId> = self.depth_first_walk(&[id]).into_iter().collect();
        if !self.has_edge(id, id) {
            seen.remove(&id);
        }
        seen
    }

    /// Everything that transitively depends on `id`, excluding `id` itself.
    #[must_use]
    pub fn descendants(&self, id: VertexId) -> BTreeSet<VertexId> {
        let mut seen: BTreeSet<VertexId> =
            self.reverse_depth_first_walk(&[id]).into_iter().collect();
        if !self.has_edge(id, id) {
            seen.remove(&id);
        }
        seen
    }

    /// Pre-order depth-first walk from `start` along dependency edges.
    #[must_use]
    pub fn depth_first_walk(&self, start: &[VertexId]) -> Vec<VertexId> {
        self.walk(start, |s| &s.dependencies)
    }

    /// Pre-order depth-first walk from `start` along dependent edges.
    #[must_use]
    pub fn reverse_depth_first_walk(&self, start: &[VertexId]) -> Vec<VertexId> {
        self.walk(start, |s| &s.dependents)
    }

    fn walk(&self, start: &[VertexId], next: impl Fn(&Slot<V>) -> &BTreeSet<VertexId>) -> Vec<VertexId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<VertexId> = start.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(slot) = self.slot(id) else { continue };
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            stack.extend(next(slot).iter().rev().copied().filter(|n| !seen.contains(n)));
        }
        order
    }

    /// Vertices ordered so that every dependency comes before its dependents.
    /// Ties are broken by key.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] naming the vertices that could not be
    /// ordered.
    pub fn topological_order(&self) -> Result<Vec<VertexId>, GraphError> {
        let mut pending: HashMap<VertexId, usize> = self
            .vertices()
            .map(|(id, _)| (id, self.dependencies_of(id).len()))
            .collect();
        let mut ready: BTreeSet<(&str, VertexId)> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .filter_map(|(id, _)| self.key(*id).map(|k| (k, *id)))
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(next) = ready.pop_first() {
            let id = next.1;
            pending.remove(&id);
            order.push(id);
            for dependent in self.dependents_of(id) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0
                        && let Some(key) = self.key(dependent)
                    {
                        ready.insert((key, dependent));
                    }
                }
            }
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            let mut vertices: Vec<String> = pending
                .keys()
                .filter_map(|id| self.key(*id).map(str::to_string))
                .collect();
            vertices.sort();
            Err(GraphError::Cycle { vertices })
        }
    }

    /// Strongly connected components that form cycles, including single
    /// vertices with a self-edge.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<VertexId>> {
        let mut tarjan = Tarjan {
            graph: self,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for id in self.ids() {
            if !tarjan.index.contains_key(&id) {
                tarjan.connect(id);
            }
        }
        tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1 || c.first().is_some_and(|id| self.has_edge(*id, *id)))
            .collect()
    }

    /// Checks the graph is acyclic. Every cycle is reported; a self-edge is
    /// reported as a self reference.
    #[must_use]
    pub fn validate(&self) -> Vec<GraphError> {
        self.cycles()
            .into_iter()
            .map(|component| {
                let mut vertices: Vec<String> = component
                    .iter()
                    .filter_map(|id| self.key(*id).map(str::to_string))
                    .collect();
                vertices.sort();
                if vertices.len() == 1 {
                    GraphError::SelfReference {
                        vertex: vertices.remove(0),
                    }
                } else {
                    GraphError::Cycle { vertices }
                }
            })
            .collect()
    }

    /// Removes every edge `u -> w` that is implied by a longer path
    /// `u -> v -> ... -> w`. Reachability is unchanged. Cyclic graphs are left
    /// untouched.
    pub fn transitive_reduction(&mut self) {
        if !self.cycles().is_empty() {
            return;
        }
        for u in self.ids() {
            let direct = self.dependencies_of(u);
            for v in &direct {
                let reachable: Vec<VertexId> = self
                    .depth_first_walk(&self.dependencies_of(*v))
                    .into_iter()
                    .collect();
                for w in reachable {
                    if self.has_edge(u, w) {
                        self.disconnect(u, w);
                    }
                }
            }
        }
    }

    /// Renders the graph in Graphviz dot syntax, vertices sorted by key.
    #[must_use]
    pub fn to_dot(&self, name: &str) -> String {
        let mut vertices: Vec<(&str, VertexId)> = self
            .vertices()
            .filter_map(|(id, _)| self.key(id).map(|k| (k, id)))
            .collect();
        vertices.sort_unstable();

        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{name}\" {{");
        let _ = writeln!(out, "  compound = \"true\"");
        let _ = writeln!(out, "  newrank = \"true\"");
        for (key, _) in &vertices {
            let _ = writeln!(out, "  \"{key}\"");
        }
        for (key, id) in &vertices {
            let mut deps: Vec<&str> = self
                .dependencies_of(*id)
                .into_iter()
                .filter_map(|d| self.key(d))
                .collect();
            deps.sort_unstable();
            for dep in deps {
                let _ = writeln!(out, "  \"{key}\" -> \"{dep}\"");
            }
        }
        out.push('}');
        out.push('\n');
        out
    }

    fn slot(&self, id: VertexId) -> Option<&Slot<V>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }
}

struct Tarjan<'g, V> {
    graph: &'g Graph<V>,
    next_index: usize,
    index: HashMap<VertexId, usize>,
    lowlink: HashMap<VertexId, usize>,
    stack: Vec<VertexId>,
    on_stack: BTreeSet<VertexId>,
    components: Vec<Vec<VertexId>>,
}

impl<V: Vertex> Tarjan<'_, V> {
    fn connect(&mut self, id: VertexId) {
        self.index.insert(id, self.next_index);
        self.lowlink.insert(id, self.next_index);
        self.next_index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        for dep in self.graph.dependencies_of(id) {
            if !self.index.contains_key(&dep) {
                self.connect(dep);
                let low = self.lowlink[&id].min(self.lowlink[&dep]);
                self.lowlink.insert(id, low);
            } else if self.on_stack.contains(&dep) {
                let low = self.lowlink[&id].min(self.index[&dep]);
                self.lowlink.insert(id, low);
            }
        }

        if self.lowlink[&id] == self.index[&id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                component.push(member);
                if member == id {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Vertex for String {
        fn key(&self) -> String {
            self.clone()
        }
    }

    fn graph(edges: &[(&str, &str)]) -> Graph<String> {
        let mut g = Graph::new();
        for (from, to) in edges {
            let a = g.add((*from).to_string());
            let b = g.add((*to).to_string());
            g.connect(a, b);
        }
        g
    }

    fn id(g: &Graph<String>, key: &str) -> VertexId {
        g.find(key).expect("vertex exists")
    }

    fn keys(g: &Graph<String>, ids: impl IntoIterator<Item = VertexId>) -> Vec<String> {
        ids.into_iter()
            .filter_map(|i| g.key(i).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_add_is_idempotent_by_key() {
        let mut g: Graph<String> = Graph::new();
        let a = g.add("a".to_string());
        assert_eq!(g.add("a".to_string()), a);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_remove_cascades_edges() {
        let mut g = graph(&[("a", "b"), ("b", "c")]);
        let b = id(&g, "b");
        g.remove(b);
        assert!(g.find("b").is_none());
        assert!(g.dependencies_of(id(&g, "a")).is_empty());
        assert!(g.dependents_of(id(&g, "c")).is_empty());
        assert!(g.edges().is_empty());
    }

    #[test]
    fn test_replace_keeps_edges() {
        let mut g = graph(&[("a", "b")]);
        let b = id(&g, "b");
        let old = g.replace(b, "b2".to_string());
        assert_eq!(old.as_deref(), Some("b"));
        assert_eq!(g.find("b2"), Some(b));
        assert!(g.find("b").is_none());
        assert!(g.has_edge(id(&g, "a"), b));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let g = graph(&[("a", "b"), ("b", "c"), ("d", "c")]);
        assert_eq!(keys(&g, g.ancestors(id(&g, "a"))), vec!["b", "c"]);
        let mut desc = keys(&g, g.descendants(id(&g, "c")));
        desc.sort();
        assert_eq!(desc, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let g = graph(&[("web", "net"), ("db", "net"), ("app", "web"), ("app", "db")]);
        let order = keys(&g, g.topological_order().expect("acyclic"));
        assert_eq!(order, vec!["net", "db", "web", "app"]);
    }

    #[test]
    fn test_validate_reports_cycles() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("d", "a")]);
        let errors = g.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "Cycle: a, b, c");
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn test_self_edge_is_reported() {
        let g = graph(&[("a", "a")]);
        let errors = g.validate();
        assert!(matches!(&errors[..], [GraphError::SelfReference { vertex }] if vertex == "a"));
    }

    #[test]
    fn test_transitive_reduction_preserves_reachability() {
        let mut g = graph(&[("a", "b"), ("b", "c"), ("a", "c"), ("a", "d")]);
        let before: Vec<_> = g.ids().iter().map(|i| g.ancestors(*i)).collect();
        g.transitive_reduction();
        let after: Vec<_> = g.ids().iter().map(|i| g.ancestors(*i)).collect();
        assert_eq!(before, after);
        assert!(!g.has_edge(id(&g, "a"), id(&g, "c")));
        assert!(g.has_edge(id(&g, "a"), id(&g, "d")));
    }

    #[test]
    fn test_to_dot() {
        let g = graph(&[("a", "b")]);
        let dot = g.to_dot("plan");
        assert!(dot.starts_with("digraph \"plan\" {"));
        assert!(dot.contains("  \"a\" -> \"b\"\n"));
    }
}
