use ragex_core::{EntityId, FunctionId, ModuleId};
use ragex_graph::{EdgeType, GraphStore};

/// Every entity with a `Calls` edge pointing at `entity`, ascending by id
/// for deterministic output (§4.6).
pub fn find_callers(graph: &GraphStore, entity: &EntityId) -> Vec<EntityId> {
    let mut callers: Vec<EntityId> = graph
        .incoming(entity, Some(EdgeType::Calls))
        .into_iter()
        .map(|e| e.from)
        .collect();
    callers.sort();
    callers.dedup();
    callers
}

/// Every entity `entity` has a `Calls` edge pointing at, ascending by id.
pub fn find_callees(graph: &GraphStore, entity: &EntityId) -> Vec<EntityId> {
    let mut callees: Vec<EntityId> = graph
        .outgoing(entity, Some(EdgeType::Calls))
        .into_iter()
        .map(|e| e.to)
        .collect();
    callees.sort();
    callees.dedup();
    callees
}

/// Every function a module `Defines`, ascending by id.
pub fn functions_in_module(graph: &GraphStore, module: &ModuleId) -> Vec<FunctionId> {
    let id = EntityId::Module(module.clone());
    let mut functions: Vec<FunctionId> = graph
        .outgoing(&id, Some(EdgeType::Defines))
        .into_iter()
        .filter_map(|e| match e.to {
            EntityId::Function(f) => Some(f),
            EntityId::Module(_) => None,
        })
        .collect();
    functions.sort();
    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragex_core::Language;

    fn fid(module: &str, name: &str) -> FunctionId {
        FunctionId::new(ModuleId::new(Language::Elixir, module), name, 0)
    }

    #[test]
    fn find_callers_and_callees_round_trip() {
        let graph = GraphStore::new();
        let a = EntityId::Function(fid("M", "a"));
        let b = EntityId::Function(fid("M", "b"));
        graph.add_edge(a.clone(), b.clone(), EdgeType::Calls);
        assert_eq!(find_callers(&graph, &b), vec![a.clone()]);
        assert_eq!(find_callees(&graph, &a), vec![b]);
    }

    #[test]
    fn find_callers_on_uncalled_entity_is_empty() {
        let graph = GraphStore::new();
        let a = EntityId::Function(fid("M", "a"));
        assert!(find_callers(&graph, &a).is_empty());
    }

    #[test]
    fn functions_in_module_filters_by_defines_edges() {
        let graph = GraphStore::new();
        let m = ModuleId::new(Language::Elixir, "M");
        let f1 = fid("M", "a");
        let f2 = fid("M", "b");
        graph.add_edge(
            EntityId::Module(m.clone()),
            EntityId::Function(f1.clone()),
            EdgeType::Defines,
        );
        graph.add_edge(
            EntityId::Module(m.clone()),
            EntityId::Function(f2.clone()),
            EdgeType::Defines,
        );
        let functions = functions_in_module(&graph, &m);
        assert_eq!(functions, vec![f1, f2]);
    }
}
