use serde::{Deserialize, Serialize};

/// String metric used to compare entity names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Ratcliff/Obershelp gestalt pattern matching, `2·M / T`.
    #[default]
    Gestalt,
    /// Jaro–Winkler, favouring shared prefixes.
    JaroWinkler,
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Similarity in [0, 1] between two entity names. Blank names never match.
pub fn name_similarity(a: &str, b: &str, metric: SimilarityMetric) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    normalized_similarity(&a, &b, metric)
}

/// Same as [`name_similarity`] for names that are already normalized.
pub(crate) fn normalized_similarity(a: &str, b: &str, metric: SimilarityMetric) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    match metric {
        SimilarityMetric::Gestalt => gestalt_ratio(a, b),
        SimilarityMetric::JaroWinkler => {
            // Canonical order keeps the score symmetric under floating-point rounding.
            let (x, y) = if a <= b { (a, b) } else { (b, a) };
            strsim::jaro_winkler(x, y)
        }
    }
}

/// Ratcliff/Obershelp ratio. Arguments are put in a canonical order first: tie-breaking
/// between equally long matches otherwise makes the ratio depend on argument order.
pub fn gestalt_ratio(a: &str, b: &str) -> f64 {
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

/// Sum of the lengths of the recursively found longest common substrings.
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, len) = longest_match(&a[alo..ahi], &b[blo..bhi]);
        if len == 0 {
            continue;
        }
        matched += len;
        let (i, j) = (alo + i, blo + j);
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + len < ahi && j + len < bhi {
            pending.push((i + len, ahi, j + len, bhi));
        }
    }

    matched
}

/// Longest common substring as `(start_in_a, start_in_b, len)`, earliest in `a` on ties.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let len = cur[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_score_one() {
        assert_eq!(name_similarity("Acme Ltd", "  acme ltd ", SimilarityMetric::Gestalt), 1.0);
    }

    #[test]
    fn gestalt_matches_reference_values() {
        // 2 * 5 / 13
        let r = gestalt_ratio("marco", "marco d.");
        assert!((r - 10.0 / 13.0).abs() < 1e-12);
        // "abcd" vs "bcde": "bcd" matched, 2 * 3 / 8
        assert!((gestalt_ratio("abcd", "bcde") - 0.75).abs() < 1e-12);
        assert_eq!(gestalt_ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let names = [
            "Marco Rossi",
            "Rossi, Marco",
            "M. Rossi",
            "abab",
            "baba",
            "Acme Holdings",
            "Holdings Acme",
        ];
        for a in names {
            for b in names {
                for metric in [SimilarityMetric::Gestalt, SimilarityMetric::JaroWinkler] {
                    assert_eq!(
                        name_similarity(a, b, metric),
                        name_similarity(b, a, metric),
                        "{a} / {b}"
                    );
                }
            }
        }
    }

    #[test]
    fn blank_names_never_match() {
        assert_eq!(name_similarity("", "", SimilarityMetric::Gestalt), 0.0);
        assert_eq!(name_similarity("   ", "x", SimilarityMetric::JaroWinkler), 0.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let r = name_similarity("Jonathan Smythe", "Jon Smith", SimilarityMetric::Gestalt);
        assert!((0.0..=1.0).contains(&r));
        let r = name_similarity("Jonathan Smythe", "Jon Smith", SimilarityMetric::JaroWinkler);
        assert!((0.0..=1.0).contains(&r));
    }
}
