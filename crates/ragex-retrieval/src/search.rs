use std::cmp::Ordering;
use std::collections::HashMap;

use ragex_core::{Embedder, EntityId, RagexError, Result};
use ragex_graph::GraphStore;
use ragex_vector::EmbeddingStore;

/// Structural/keyword search over the graph (§4.6 "Graph search"): substring
/// match against an entity's `name`/`qualified_name`, optionally restricted
/// to one node type (`"module"` or `"function"`).
pub fn graph_search(
    graph: &GraphStore,
    query: &str,
    kind: Option<&str>,
    limit: usize,
) -> Vec<(EntityId, f32)> {
    let q = query.to_lowercase();
    let mut scored: Vec<(EntityId, f32, u8)> = graph
        .list_nodes(|n| kind.map(|k| n.node_type() == k).unwrap_or(true), None)
        .into_iter()
        .filter_map(|n| {
            let name = n.name().to_lowercase();
            let qualified = n.qualified_name().to_lowercase();
            let doc = n.doc().unwrap_or("").to_lowercase();
            let score = if !q.is_empty() && name.starts_with(&q) {
                3.0
            } else if !q.is_empty() && (name.contains(&q) || qualified.contains(&q)) {
                2.0
            } else if !q.is_empty() && doc.contains(&q) {
                1.0
            } else {
                return None;
            };
            Some((n.id(), score, n.type_priority()))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(id, score, _)| (id, score)).collect()
}

/// Embeds `query` and delegates to the Embedding Store's kNN search
/// (§4.6 "Semantic search").
pub async fn semantic_search(
    embeddings: &EmbeddingStore,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
    threshold: Option<f32>,
) -> Result<Vec<(EntityId, f32)>> {
    let vectors = embedder.embed(&[query.to_string()]).await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| RagexError::Invalid("embedder returned no vector for query".into()))?;
    Ok(embeddings.search(&vector, k, threshold))
}

/// Reciprocal Rank Fusion over an arbitrary number of ranked lists (§9
/// GLOSSARY "RRF"): `score(e) = Σ 1/(k + rank_i(e))`, ranks are 1-based.
/// Entities absent from a list simply don't contribute that term.
pub fn rrf_fuse(lists: &[Vec<EntityId>], k: u32, limit: usize) -> Vec<(EntityId, f64)> {
    let mut scores: HashMap<EntityId, f64> = HashMap::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k as f64 + rank as f64 + 1.0);
        }
    }
    let mut scored: Vec<(EntityId, f64)> = scores.into_iter().collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(limit);
    scored
}

/// Fuses semantic and structural search into one ranked list (§4.6
/// "Hybrid (RRF fusion)"). Each candidate list is widened to `limit.max(50)`
/// before fusion so entities that only rank well structurally (or only
/// semantically) still get a fair shot at the final top-`limit`.
pub async fn hybrid_search(
    graph: &GraphStore,
    embeddings: &EmbeddingStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
    k: u32,
) -> Result<Vec<(EntityId, f64)>> {
    let candidate_pool = limit.max(50);
    let semantic = semantic_search(embeddings, embedder, query, candidate_pool, None).await?;
    let graph_list = graph_search(graph, query, None, candidate_pool);

    let semantic_ids: Vec<EntityId> = semantic.into_iter().map(|(id, _)| id).collect();
    let graph_ids: Vec<EntityId> = graph_list.into_iter().map(|(id, _)| id).collect();

    Ok(rrf_fuse(&[semantic_ids, graph_ids], k, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragex_core::{FunctionId, Language, Module, ModuleId, ModuleKind};
    use ragex_graph::NodeData;

    fn module_node(name: &str) -> NodeData {
        NodeData::Module(Module {
            id: ModuleId::new(Language::Elixir, name),
            name: name.into(),
            file: format!("{name}.ex"),
            line: 1,
            doc: Some(format!("docs about {name}")),
            kind: ModuleKind::Module,
        })
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> u16 {
            2
        }
        fn model_id(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn graph_search_ranks_prefix_above_contains() {
        let store = GraphStore::new();
        store.add_node(module_node("Parser"));
        store.add_node(module_node("JsonParser"));
        let results = graph_search(&store, "parser", None, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, EntityId::Module(ModuleId::new(Language::Elixir, "Parser")));
    }

    #[test]
    fn graph_search_empty_query_matches_nothing() {
        let store = GraphStore::new();
        store.add_node(module_node("Parser"));
        assert!(graph_search(&store, "", None, 10).is_empty());
    }

    #[test]
    fn rrf_fuse_preserves_order_for_single_list() {
        let ids: Vec<EntityId> = vec![
            EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), "a", 0)),
            EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), "b", 0)),
        ];
        let fused = rrf_fuse(&[ids.clone()], 60, 10);
        assert_eq!(fused[0].0, ids[0]);
        assert_eq!(fused[1].0, ids[1]);
        assert!(fused.iter().all(|(_, score)| *score > 0.0));
    }

    #[test]
    fn rrf_fuse_rewards_entities_present_in_both_lists() {
        let a = EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), "a", 0));
        let b = EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), "b", 0));
        let list1 = vec![a.clone(), b.clone()];
        let list2 = vec![b.clone(), a.clone()];
        let fused = rrf_fuse(&[list1, list2], 60, 10);
        // both ranked 1 and 2 across two lists -> tied scores; `a` wins by id.
        assert_eq!(fused[0].0, a);
    }

    #[tokio::test]
    async fn semantic_search_embeds_query_then_delegates() {
        let embeddings = EmbeddingStore::new();
        let id = EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), "a", 0));
        embeddings.put("stub", id.clone(), vec![1.0, 0.0], [0u8; 32]).unwrap();
        let results = semantic_search(&embeddings, &StubEmbedder, "query", 10, None)
            .await
            .unwrap();
        assert_eq!(results[0].0, id);
    }
}
