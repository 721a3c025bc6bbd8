//! Min-max score normalization

use super::ScoredId;

/// Rescale scores to [0, 1] with `(score - min) / (max - min)`.
///
/// When every score is equal (including a single result) each element maps
/// to 1.0 so a uniform channel keeps its signal. Order is preserved and
/// empty input yields empty output.
pub fn normalize(results: &[ScoredId]) -> Vec<ScoredId> {
    if results.is_empty() {
        return Vec::new();
    }

    let min = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
    let max = results.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    results
        .iter()
        .map(|r| ScoredId {
            chunk_id: r.chunk_id.clone(),
            score: if range > 0.0 {
                (r.score - min) / range
            } else {
                1.0
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(pairs: &[(&str, f64)]) -> Vec<ScoredId> {
        pairs.iter().map(|(id, s)| ScoredId::new(*id, *s)).collect()
    }

    #[test]
    fn test_min_max() {
        let out = normalize(&scored(&[("a", 2.0), ("b", 4.0), ("c", 3.0)]));
        assert_eq!(out, scored(&[("a", 0.0), ("b", 1.0), ("c", 0.5)]));
    }

    #[test]
    fn test_degenerate_maps_to_one() {
        let out = normalize(&scored(&[("a", 5.0), ("b", 5.0)]));
        assert_eq!(out, scored(&[("a", 1.0), ("b", 1.0)]));

        let single = normalize(&scored(&[("only", 0.2)]));
        assert_eq!(single, scored(&[("only", 1.0)]));
    }

    #[test]
    fn test_idempotent_on_normalized_input() {
        let input = scored(&[("a", 0.0), ("b", 0.25), ("c", 1.0), ("d", 0.6)]);
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn test_negative_scores() {
        let out = normalize(&scored(&[("a", -1.0), ("b", 1.0)]));
        assert_eq!(out, scored(&[("a", 0.0), ("b", 1.0)]));
    }

    #[test]
    fn test_empty() {
        assert!(normalize(&[]).is_empty());
    }
}
