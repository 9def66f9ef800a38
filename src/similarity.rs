//! Cosine similarity and recency-discounted scoring.

/// Cosine similarity between two vectors, in [-1, 1].
/// Empty, mismatched, or zero-norm input scores 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// `sim * exp(-age / (3600 * half_life_hours))`.
///
/// Recent near-duplicates outrank old ones of equal similarity. Negative
/// ages (clock skew) count as zero.
pub fn time_decayed_score(sim: f64, age_secs: f64, half_life_hours: f64) -> f64 {
    let age = age_secs.max(0.0);
    sim * (-age / (3600.0 * half_life_hours)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_same_vec() {
        let v: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn cosine_perpendicular() {
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-10);
    }

    #[test]
    fn cosine_opposite() {
        assert!((cosine(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-10);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn decay_at_zero_age_is_identity() {
        assert_eq!(time_decayed_score(0.8, 0.0, 1.0), 0.8);
    }

    #[test]
    fn decay_one_half_life_is_e_inverse() {
        let s = time_decayed_score(1.0, 3600.0, 1.0);
        assert!((s - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn decay_is_monotone_in_age() {
        let a = time_decayed_score(0.9, 10.0, 1.0);
        let b = time_decayed_score(0.9, 100.0, 1.0);
        let c = time_decayed_score(0.9, 10_000.0, 1.0);
        assert!(a > b && b > c);
    }

    #[test]
    fn longer_half_life_discounts_less() {
        assert!(time_decayed_score(0.9, 3600.0, 6.0) > time_decayed_score(0.9, 3600.0, 1.0));
    }

    #[test]
    fn negative_age_clamped() {
        assert_eq!(time_decayed_score(0.7, -50.0, 1.0), 0.7);
    }
}
