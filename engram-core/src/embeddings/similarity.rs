//! Vector similarity helpers.

/// Cosine similarity between two vectors, normalized from [-1, 1] to [0, 1].
///
/// Mismatched dimensions and zero-magnitude vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (magnitude_a * magnitude_b);
    (similarity + 1.0) / 2.0
}

/// Fit an embedding to the target dimension: truncate when longer, zero-pad
/// when shorter. Masks provider/model mismatches on purpose; the caller logs
/// when it fires.
#[must_use]
pub fn adjust_dimension(mut embedding: Vec<f32>, target: usize) -> Vec<f32> {
    if embedding.len() > target {
        embedding.truncate(target);
    } else if embedding.len() < target {
        embedding.resize(target, 0.0);
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let similarity = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((similarity - 0.5).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let similarity = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!(similarity.abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn adjust_truncates_and_pads() {
        assert_eq!(adjust_dimension(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(adjust_dimension(vec![1.0], 3), vec![1.0, 0.0, 0.0]);
        assert_eq!(adjust_dimension(vec![1.0, 2.0], 2), vec![1.0, 2.0]);
    }
}
