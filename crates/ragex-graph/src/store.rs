use std::collections::HashMap;

use parking_lot::RwLock;
use ragex_core::{EntityId, Function, Module};
use serde::{Deserialize, Serialize};

/// Node payload held by the store. Graph algorithms and retrieval only
/// ever need the id plus a couple of display fields, but editors/refactor
/// discovery want the full entity, so the store keeps both variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeData {
    Module(Module),
    Function(Function),
}

impl NodeData {
    pub fn id(&self) -> EntityId {
        match self {
            NodeData::Module(m) => EntityId::Module(m.id.clone()),
            NodeData::Function(f) => EntityId::Function(f.id.clone()),
        }
    }

    pub fn file(&self) -> &str {
        match self {
            NodeData::Module(m) => &m.file,
            NodeData::Function(f) => &f.file,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NodeData::Module(m) => &m.name,
            NodeData::Function(f) => &f.id.name,
        }
    }

    pub fn qualified_name(&self) -> String {
        match self {
            NodeData::Module(m) => m.id.qualified_name.clone(),
            NodeData::Function(f) => format!("{}.{}", f.id.module.qualified_name, f.id.name),
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            NodeData::Module(m) => m.doc.as_deref(),
            NodeData::Function(f) => f.doc.as_deref(),
        }
    }

    /// Type priority used to break ties in graph/keyword search (§4.6):
    /// function ranks above module.
    pub fn type_priority(&self) -> u8 {
        match self {
            NodeData::Function(_) => 0,
            NodeData::Module(_) => 1,
        }
    }

    pub fn node_type(&self) -> &'static str {
        match self {
            NodeData::Module(_) => "module",
            NodeData::Function(_) => "function",
        }
    }
}

/// An edge type the graph indexes (§3 "Edge types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Defines,
    Calls,
    Imports,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Defines => "defines",
            EdgeType::Calls => "calls",
            EdgeType::Imports => "imports",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: EntityId,
    pub to: EntityId,
    pub edge_type: EdgeType,
}

#[derive(Debug, Default)]
struct Tables {
    /// Insertion-ordered node ids per type so `list_nodes` can return
    /// "insertion order of the most recent insert of that id" (§4.2).
    nodes: HashMap<EntityId, NodeData>,
    node_order: Vec<EntityId>,
    /// `from -> Vec<edge index>` and `to -> Vec<edge index>`, both pointing
    /// into a single edge vec so outgoing/incoming are O(deg).
    edges: Vec<Edge>,
    by_from: HashMap<EntityId, Vec<usize>>,
    by_to: HashMap<EntityId, Vec<usize>>,
    /// Used for `add_edge` idempotence: same (from, to, type) triple is
    /// never duplicated.
    edge_keys: std::collections::HashSet<(EntityId, EntityId, EdgeType)>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub by_type: HashMap<&'static str, usize>,
}

/// The Graph Store (C2): typed node/edge tables with bidirectional
/// indices, guarded by a single-writer/many-readers lock. No lock is ever
/// held across an external call (§4.2 Concurrency).
#[derive(Default)]
pub struct GraphStore {
    tables: RwLock<Tables>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a node (§4.2 `add_node`).
    pub fn add_node(&self, data: NodeData) {
        let id = data.id();
        let mut t = self.tables.write();
        if !t.nodes.contains_key(&id) {
            t.node_order.push(id.clone());
        }
        t.nodes.insert(id, data);
    }

    pub fn find_node(&self, id: &EntityId) -> Option<NodeData> {
        self.tables.read().nodes.get(id).cloned()
    }

    /// Returns nodes filtered by an optional predicate on `NodeData`, in
    /// insertion order, truncated to `limit` if given. An unknown/empty
    /// filter simply yields an empty list, never an error (§4.2 failure
    /// semantics).
    pub fn list_nodes(
        &self,
        filter: impl Fn(&NodeData) -> bool,
        limit: Option<usize>,
    ) -> Vec<NodeData> {
        let t = self.tables.read();
        let mut out: Vec<NodeData> = t
            .node_order
            .iter()
            .filter_map(|id| t.nodes.get(id))
            .filter(|n| filter(n))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn total_count(&self, filter: impl Fn(&NodeData) -> bool) -> usize {
        let t = self.tables.read();
        t.node_order
            .iter()
            .filter_map(|id| t.nodes.get(id))
            .filter(|n| filter(n))
            .count()
    }

    /// Adds an edge; idempotent, and accepted even if either endpoint does
    /// not (yet) exist as a node (§4.2 failure semantics — streaming
    /// analysis support).
    pub fn add_edge(&self, from: EntityId, to: EntityId, edge_type: EdgeType) {
        let mut t = self.tables.write();
        let key = (from.clone(), to.clone(), edge_type);
        if t.edge_keys.contains(&key) {
            return;
        }
        let idx = t.edges.len();
        t.edges.push(Edge {
            from: from.clone(),
            to: to.clone(),
            edge_type,
        });
        t.by_from.entry(from).or_default().push(idx);
        t.by_to.entry(to).or_default().push(idx);
        t.edge_keys.insert(key);
    }

    pub fn outgoing(&self, node: &EntityId, edge_type: Option<EdgeType>) -> Vec<Edge> {
        let t = self.tables.read();
        t.by_from
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|&i| t.edges.get(i))
            .filter(|e| edge_type.map(|et| et == e.edge_type).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn incoming(&self, node: &EntityId, edge_type: Option<EdgeType>) -> Vec<Edge> {
        let t = self.tables.read();
        t.by_to
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|&i| t.edges.get(i))
            .filter(|e| edge_type.map(|et| et == e.edge_type).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn out_degree(&self, node: &EntityId) -> usize {
        self.tables.read().by_from.get(node).map_or(0, |v| v.len())
    }

    pub fn in_degree(&self, node: &EntityId) -> usize {
        self.tables.read().by_to.get(node).map_or(0, |v| v.len())
    }

    /// Removes a node along with every incident edge and delegates
    /// embedding removal to the caller (invariant 5 in §3 is an atomic
    /// step across Graph Store + Embedding Store, which this crate cannot
    /// enforce alone; `ragex-indexer` composes the two under one write).
    pub fn remove_node(&self, id: &EntityId) {
        let mut t = self.tables.write();
        t.nodes.remove(id);
        t.node_order.retain(|n| n != id);
        let stale: Vec<usize> = t
            .by_from
            .get(id)
            .cloned()
            .into_iter()
            .flatten()
            .chain(t.by_to.get(id).cloned().into_iter().flatten())
            .collect();
        for idx in stale {
            if let Some(edge) = t.edges.get(idx).cloned() {
                let key = (edge.from.clone(), edge.to.clone(), edge.edge_type);
                t.edge_keys.remove(&key);
            }
        }
        t.by_from.remove(id);
        t.by_to.remove(id);
        // Any edge referencing `id` from the other side must also be
        // dropped from that side's index.
        let to_prune: Vec<EntityId> = t
            .by_from
            .iter()
            .filter(|(_, idxs)| idxs.iter().any(|&i| t.edges.get(i).map_or(false, |e| &e.to == id)))
            .map(|(k, _)| k.clone())
            .collect();
        for other in to_prune {
            if let Some(idxs) = t.by_from.get_mut(&other) {
                idxs.retain(|&i| t.edges.get(i).map_or(true, |e| &e.to != id));
            }
        }
        let from_prune: Vec<EntityId> = t
            .by_to
            .iter()
            .filter(|(_, idxs)| {
                idxs.iter()
                    .any(|&i| t.edges.get(i).map_or(false, |e| &e.from == id))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for other in from_prune {
            if let Some(idxs) = t.by_to.get_mut(&other) {
                idxs.retain(|&i| t.edges.get(i).map_or(true, |e| &e.from != id));
            }
        }
    }

    pub fn stats(&self) -> GraphStats {
        let t = self.tables.read();
        let mut by_type: HashMap<&'static str, usize> = HashMap::new();
        for n in t.nodes.values() {
            *by_type.entry(n.node_type()).or_insert(0) += 1;
        }
        GraphStats {
            nodes: t.nodes.len(),
            edges: t.edge_keys.len(),
            by_type,
        }
    }

    pub fn clear(&self) {
        let mut t = self.tables.write();
        *t = Tables::default();
    }

    pub fn all_entity_ids(&self) -> Vec<EntityId> {
        self.tables.read().node_order.clone()
    }

    /// Exports every node in insertion order, for persistence (§4.1).
    pub fn export_nodes(&self) -> Vec<NodeData> {
        let t = self.tables.read();
        t.node_order
            .iter()
            .filter_map(|id| t.nodes.get(id))
            .cloned()
            .collect()
    }

    /// Exports every distinct edge, for persistence (§4.1).
    pub fn export_edges(&self) -> Vec<Edge> {
        self.tables.read().edges.clone()
    }

    /// Rebuilds the store from a previously exported node/edge set,
    /// replacing whatever was there before. Used by `ragex-cache::load()`.
    pub fn import(&self, nodes: Vec<NodeData>, edges: Vec<Edge>) {
        self.clear();
        for n in nodes {
            self.add_node(n);
        }
        for e in edges {
            self.add_edge(e.from, e.to, e.edge_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragex_core::{FunctionId, Language, ModuleId, ModuleKind, Visibility};
    use std::collections::HashMap as StdHashMap;

    fn module(name: &str) -> NodeData {
        NodeData::Module(Module {
            id: ModuleId::new(Language::Elixir, name),
            name: name.into(),
            file: format!("{name}.ex"),
            line: 1,
            doc: None,
            kind: ModuleKind::Module,
        })
    }

    fn function(module_name: &str, name: &str, arity: u16) -> NodeData {
        NodeData::Function(Function {
            id: FunctionId::new(ModuleId::new(Language::Elixir, module_name), name, arity),
            file: format!("{module_name}.ex"),
            line: 2,
            doc: None,
            visibility: Visibility::Public,
            metadata: StdHashMap::new(),
        })
    }

    #[test]
    fn add_and_find_node_round_trips() {
        let store = GraphStore::new();
        let m = module("M");
        let id = m.id();
        store.add_node(m);
        assert!(store.find_node(&id).is_some());
    }

    #[test]
    fn unknown_node_returns_none_not_error() {
        let store = GraphStore::new();
        let id = EntityId::Module(ModuleId::new(Language::Elixir, "Ghost"));
        assert!(store.find_node(&id).is_none());
    }

    #[test]
    fn add_edge_is_idempotent() {
        let store = GraphStore::new();
        let f1 = function("M", "foo", 1).id();
        let f2 = function("M", "bar", 0).id();
        store.add_edge(f1.clone(), f2.clone(), EdgeType::Calls);
        store.add_edge(f1.clone(), f2.clone(), EdgeType::Calls);
        assert_eq!(store.outgoing(&f1, None).len(), 1);
        assert_eq!(store.stats().edges, 1);
    }

    #[test]
    fn dangling_edge_endpoints_are_accepted() {
        let store = GraphStore::new();
        let a = EntityId::Module(ModuleId::new(Language::Elixir, "A"));
        let b = EntityId::Module(ModuleId::new(Language::Elixir, "B"));
        store.add_edge(a.clone(), b.clone(), EdgeType::Imports);
        assert_eq!(store.outgoing(&a, None).len(), 1);
        assert!(store.find_node(&a).is_none());
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let store = GraphStore::new();
        let f1 = function("M", "foo", 1);
        let f2 = function("M", "bar", 0);
        let id1 = f1.id();
        let id2 = f2.id();
        store.add_node(f1);
        store.add_node(f2);
        store.add_edge(id1.clone(), id2.clone(), EdgeType::Calls);
        store.remove_node(&id1);
        assert!(store.find_node(&id1).is_none());
        assert_eq!(store.incoming(&id2, None).len(), 0);
    }

    #[test]
    fn list_nodes_respects_limit_and_filter() {
        let store = GraphStore::new();
        store.add_node(module("A"));
        store.add_node(module("B"));
        store.add_node(function("A", "f", 0));
        let modules = store.list_nodes(|n| matches!(n, NodeData::Module(_)), None);
        assert_eq!(modules.len(), 2);
        let limited = store.list_nodes(|_| true, Some(1));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn clear_wipes_all_tables() {
        let store = GraphStore::new();
        store.add_node(module("A"));
        store.clear();
        assert_eq!(store.stats().nodes, 0);
    }
}
