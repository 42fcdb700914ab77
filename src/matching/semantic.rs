use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::{MatchLayer, MatchResult};
use crate::domain::{Capability, Requirement, Term};

/// Turns text into a vector for similarity comparison.
///
/// Implementations must be deterministic: equal text yields equal vectors.
pub trait Embedder: Send + Sync {
    /// A short name for logs and explanations.
    fn name(&self) -> &str;

    /// Embed normalized text.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// A dependency-free embedder based on feature hashing.
///
/// Words and padded character trigrams are hashed into a fixed number of
/// buckets. Words carry twice the weight of trigrams, so shared vocabulary
/// dominates while shared word stems still register.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 512 }
    }
}

impl HashingEmbedder {
    /// An embedder with `dimensions` buckets (at least one).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut prefix = [0; 8];
        prefix.copy_from_slice(&digest[..8]);
        // the remainder is below `dimensions`, which is a usize
        #[allow(clippy::cast_possible_truncation)]
        let index = (u64::from_be_bytes(prefix) % self.dimensions as u64) as usize;
        index
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];
        for word in text.split_whitespace() {
            vector[self.bucket(word)] += 1.0;

            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                vector[self.bucket(&trigram)] += 0.5;
            }
        }
        vector
    }
}

/// Cosine similarity between two vectors.
///
/// Vectors of different length, empty vectors and zero vectors have a
/// similarity of zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

const CACHE_LIMIT: usize = 10_000;

/// The semantic layer: embedding similarity with a shared cache.
pub struct SemanticLayer {
    embedder: Arc<dyn Embedder>,
    cache: RwLock<HashMap<String, Arc<[f32]>>>,
}

impl std::fmt::Debug for SemanticLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticLayer")
            .field("embedder", &self.embedder.name())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl Default for SemanticLayer {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

impl SemanticLayer {
    /// A layer backed by `embedder`.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn embedding(&self, text: &str) -> Arc<[f32]> {
        let key = Term::new(text).as_str().to_string();
        if let Some(vector) = self.cache.read().get(&key) {
            return Arc::clone(vector);
        }

        let vector: Arc<[f32]> = self.embedder.embed(&key).into();
        let mut cache = self.cache.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, Arc::clone(&vector));
        vector
    }

    /// Similarity of two texts, clamped to `[0, 1]`.
    #[must_use]
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let similarity = cosine_similarity(&self.embedding(a), &self.embedding(b));
        f64::from(similarity).clamp(0.0, 1.0)
    }

    /// Compare the descriptions of a pair; a match needs a similarity of at
    /// least `threshold`.
    pub(super) fn evaluate(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        threshold: f64,
    ) -> MatchResult {
        let similarity =
            self.similarity(&requirement.semantic_text(), &capability.semantic_text());
        if similarity >= threshold {
            MatchResult::hit(
                requirement,
                capability,
                MatchLayer::Semantic,
                similarity,
                format!(
                    "{} similarity {similarity:.2} >= {threshold:.2}",
                    self.embedder.name()
                ),
            )
        } else {
            MatchResult::miss(
                requirement,
                capability,
                MatchLayer::Semantic,
                format!(
                    "{} similarity {similarity:.2} < {threshold:.2}",
                    self.embedder.name()
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn identical_text_is_fully_similar() {
        let layer = SemanticLayer::default();
        let similarity = layer.similarity("precision sheet metal bending", "Precision  sheet metal bending");
        assert!((similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unrelated_text_is_dissimilar() {
        let layer = SemanticLayer::default();
        assert!(layer.similarity("sourdough proofing", "anodized aluminium") < 0.3);
    }

    #[test]
    fn abbreviations_fall_below_the_default_threshold() {
        let layer = SemanticLayer::default();
        let similarity = layer.similarity("CNC machining", "Computer Numerical Control machining");
        assert!(similarity > 0.0);
        assert!(similarity < 0.75);
    }

    #[test]
    fn empty_text_has_zero_similarity() {
        let layer = SemanticLayer::default();
        assert!(layer.similarity("", "milling").abs() < f64::EPSILON);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
    }

    #[test]
    fn descriptions_extend_labels() {
        let domain = Domain::new("manufacturing");
        let requirement = Requirement::new("r1", "enclosure", domain.clone(), "housing")
            .with_description("injection moulded polycarbonate enclosure");
        let capability = Capability::new("c1", "fab-01", "moulding", domain)
            .with_description("injection moulded polycarbonate enclosure");

        let result = SemanticLayer::default().evaluate(&requirement, &capability, 0.75);
        assert!(result.matched());
        assert_eq!(result.layer(), MatchLayer::Semantic);
    }

    #[test]
    fn buckets_are_fixed_across_builds() {
        let embedder = HashingEmbedder::default();
        assert_eq!(embedder.bucket("milling"), 159);
        assert_eq!(embedder.bucket("#mi"), 421);
        assert_eq!(HashingEmbedder::new(8).bucket("milling"), 7);
        assert!(embedder.embed("milling")[159] >= 1.0);
    }
}
