use std::collections::HashMap;

use parking_lot::RwLock;
use ragex_core::{EmbeddingRecord, EntityId, RagexError, Result};

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    text_hash: [u8; 32],
}

#[derive(Debug, Clone, Default)]
struct Model {
    model_id: String,
    dimensions: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VectorStats {
    pub count: usize,
    pub dimension: u16,
}

/// The Embedding Store (C3): dense vectors keyed by entity id, normalized
/// at insertion so cosine similarity search becomes a dot product.
/// Records `(model_id, dimensions)` on first insertion; later inserts with
/// a different dimension fail with `Invalid` (the spec's `DimensionMismatch`).
#[derive(Default)]
pub struct EmbeddingStore {
    entries: RwLock<HashMap<EntityId, Entry>>,
    model: RwLock<Option<Model>>,
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers/validates the model identity before inserting. Called
    /// implicitly by `put` on the first insertion.
    fn ensure_model(&self, model_id: &str, dimensions: u16) -> Result<()> {
        let mut model = self.model.write();
        match model.as_ref() {
            None => {
                *model = Some(Model {
                    model_id: model_id.to_string(),
                    dimensions,
                });
                Ok(())
            }
            Some(m) if m.dimensions == dimensions => Ok(()),
            Some(m) => Err(RagexError::Invalid(format!(
                "dimension mismatch: store is configured for {} dims (model {}), got {} dims",
                m.dimensions, m.model_id, dimensions
            ))),
        }
    }

    pub fn put(
        &self,
        model_id: &str,
        entity_id: EntityId,
        vector: Vec<f32>,
        text_hash: [u8; 32],
    ) -> Result<()> {
        self.ensure_model(model_id, vector.len() as u16)?;
        let vector = normalize(vector);
        self.entries
            .write()
            .insert(entity_id, Entry { vector, text_hash });
        Ok(())
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<Vec<f32>> {
        self.entries.read().get(entity_id).map(|e| e.vector.clone())
    }

    pub fn text_hash(&self, entity_id: &EntityId) -> Option<[u8; 32]> {
        self.entries.read().get(entity_id).map(|e| e.text_hash)
    }

    pub fn delete(&self, entity_id: &EntityId) {
        self.entries.write().remove(entity_id);
    }

    /// Exact kNN by linear scan over cosine similarity (already a dot
    /// product since vectors are stored normalized). Ties are broken by
    /// ascending entity id for determinism (§4.3).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
    ) -> Vec<(EntityId, f32)> {
        let query = normalize(query.to_vec());
        let entries = self.entries.read();
        let mut scored: Vec<(EntityId, f32)> = entries
            .iter()
            .map(|(id, e)| {
                let score: f32 = e.vector.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (id.clone(), score)
            })
            .filter(|(_, score)| threshold.map(|t| *score >= t).unwrap_or(true))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn stats(&self) -> VectorStats {
        VectorStats {
            count: self.entries.read().len(),
            dimension: self.model.read().as_ref().map_or(0, |m| m.dimensions),
        }
    }

    pub fn dimension(&self) -> Option<u16> {
        self.model.read().as_ref().map(|m| m.dimensions)
    }

    /// Clears both the vector table and the model-compatibility lock, so
    /// callers switching embedding models can start fresh (§4.3).
    pub fn clear(&self) {
        self.entries.write().clear();
        *self.model.write() = None;
    }

    pub fn all_entity_ids(&self) -> Vec<EntityId> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn model_id(&self) -> Option<String> {
        self.model.read().as_ref().map(|m| m.model_id.clone())
    }

    /// Exports every record for persistence (§4.1).
    pub fn export(&self) -> Vec<EmbeddingRecord> {
        self.entries
            .read()
            .iter()
            .map(|(id, e)| EmbeddingRecord {
                entity_id: id.clone(),
                vector: e.vector.clone(),
                text_hash: e.text_hash,
            })
            .collect()
    }

    /// Rebuilds the store from a previously exported record set. The
    /// vectors are assumed already normalized (they were normalized before
    /// export) so this bypasses `put`'s re-normalization.
    pub fn import(&self, model_id: &str, dimensions: u16, records: Vec<EmbeddingRecord>) {
        let mut entries = self.entries.write();
        entries.clear();
        for r in records {
            entries.insert(
                r.entity_id,
                Entry {
                    vector: r.vector,
                    text_hash: r.text_hash,
                },
            );
        }
        *self.model.write() = Some(Model {
            model_id: model_id.to_string(),
            dimensions,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ragex_core::{FunctionId, Language, ModuleId};

    fn fid(name: &str) -> EntityId {
        EntityId::Function(FunctionId::new(ModuleId::new(Language::Elixir, "M"), name, 0))
    }

    #[test]
    fn put_and_get_round_trip_normalized() {
        let store = EmbeddingStore::new();
        store
            .put("model-a", fid("foo"), vec![3.0, 4.0], [0u8; 32])
            .unwrap();
        let v = store.get(&fid("foo")).unwrap();
        assert_abs_diff_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn dimension_mismatch_fails() {
        let store = EmbeddingStore::new();
        store.put("model-a", fid("foo"), vec![1.0, 0.0], [0u8; 32]).unwrap();
        let err = store
            .put("model-a", fid("bar"), vec![1.0, 0.0, 0.0], [0u8; 32])
            .unwrap_err();
        assert_eq!(err.kind(), "invalid");
    }

    #[test]
    fn search_orders_by_cosine_then_id_and_respects_threshold() {
        let store = EmbeddingStore::new();
        store.put("m", fid("a"), vec![1.0, 0.0], [0u8; 32]).unwrap();
        store.put("m", fid("b"), vec![0.0, 1.0], [0u8; 32]).unwrap();
        store.put("m", fid("c"), vec![1.0, 0.0], [0u8; 32]).unwrap();
        let results = store.search(&[1.0, 0.0], 10, None);
        assert_eq!(results[0].0, fid("a"));
        assert_eq!(results[1].0, fid("c"));
        let filtered = store.search(&[1.0, 0.0], 10, Some(0.99));
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn clear_resets_model_lock() {
        let store = EmbeddingStore::new();
        store.put("m1", fid("a"), vec![1.0, 0.0], [0u8; 32]).unwrap();
        store.clear();
        store
            .put("m2", fid("a"), vec![1.0, 0.0, 0.0], [0u8; 32])
            .unwrap();
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn export_then_import_round_trips() {
        let store = EmbeddingStore::new();
        store.put("m1", fid("a"), vec![3.0, 4.0], [7u8; 32]).unwrap();
        let records = store.export();
        let restored = EmbeddingStore::new();
        restored.import("m1", 2, records);
        assert_eq!(restored.get(&fid("a")), store.get(&fid("a")));
        assert_eq!(restored.text_hash(&fid("a")), Some([7u8; 32]));
        assert_eq!(restored.dimension(), Some(2));
    }

    #[test]
    fn empty_query_on_empty_store_returns_empty() {
        let store = EmbeddingStore::new();
        assert!(store.search(&[1.0], 5, None).is_empty());
    }
}
