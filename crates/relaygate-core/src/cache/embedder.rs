use async_trait::async_trait;
use relaygate_protocol::GatewayError;

/// External collaborator (spec §1: "the embedding-vector cache backend" is
/// out of scope) that turns cacheable text into an embedding vector for
/// semantic-mode lookups.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;
}

/// Nearest-neighbor lookup over previously-cached embeddings. Also an
/// external collaborator; this crate only needs the trait surface plus an
/// illustrative brute-force implementation for tests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, key: String, vector: Vec<f32>);
    /// Nearest neighbor by cosine similarity, if the store is non-empty.
    async fn query_nearest(&self, vector: &[f32]) -> Option<(String, f64)>;
}

/// Brute-force in-memory vector store: fine for tests and small
/// deployments, never meant to replace a real ANN index.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: tokio::sync::RwLock<Vec<(String, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, key: String, vector: Vec<f32>) {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = vector;
        } else {
            entries.push((key, vector));
        }
    }

    async fn query_nearest(&self, vector: &[f32]) -> Option<(String, f64)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(key, candidate)| (key.clone(), cosine_similarity(vector, candidate)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_nearest_by_cosine_similarity() {
        let store = InMemoryVectorStore::new();
        store.upsert("paris".into(), vec![1.0, 0.0]).await;
        store.upsert("tokyo".into(), vec![0.0, 1.0]).await;

        let (key, similarity) = store.query_nearest(&[0.99, 0.1]).await.unwrap();
        assert_eq!(key, "paris");
        assert!(similarity > 0.9);
    }
}
