/// Vector store primitive
use super::{VectorHit, VectorRecord};
use crate::error::Result;

/// Storage backend for named passage collections.
///
/// Collection-level calls on a collection that does not exist return
/// [`crate::error::KbError::CollectionMissing`], except `delete_collection`
/// and `has_collection` which report absence through their return value.
pub trait VectorStore: Send + Sync {
    /// Create an empty collection; fails with `CollectionExists` if taken
    fn create_collection(&self, name: &str) -> Result<()>;

    /// Drop a collection and all its passages. Returns false if it did not exist.
    fn delete_collection(&self, name: &str) -> Result<bool>;

    fn has_collection(&self, name: &str) -> Result<bool>;

    fn list_collections(&self) -> Result<Vec<String>>;

    /// Insert passages, replacing any with the same id
    fn add(&self, name: &str, records: &[VectorRecord]) -> Result<()>;

    /// Ids of all passages whose metadata names `document_id`
    fn ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>>;

    /// Passages of one document ordered by chunk index
    fn get_by_document(&self, name: &str, document_id: &str) -> Result<Vec<VectorRecord>>;

    /// Delete passages by id; unknown ids are ignored. Returns the number removed.
    fn delete_ids(&self, name: &str, ids: &[String]) -> Result<usize>;

    /// Passages in insertion order, `limit` at a time
    fn get_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<VectorRecord>>;

    /// All passage texts in insertion order
    fn texts(&self, name: &str) -> Result<Vec<String>>;

    /// Up to `k` nearest passages by cosine distance, nearest first
    fn query(&self, name: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    fn count(&self, name: &str) -> Result<usize>;

    /// Embedding width fixed by the first insert, `None` while never written
    fn dimension(&self, name: &str) -> Result<Option<usize>>;
}

/// Cosine distance in `[0, 2]`; zero vectors are treated as orthogonal
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - dot / (mag_a * mag_b)
    }
}

/// Rank candidates by distance and keep the `k` nearest.
///
/// Ties keep the candidates' input order.
pub(crate) fn nearest(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }
}
