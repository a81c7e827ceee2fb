//! Lexical similarity between normalized keys
//!
//! The score blends two views of the same pair of keys:
//! - character edit distance ratio, which tolerates typos ("brazil" / "brasil")
//! - token Jaccard overlap, which tolerates reordered or extra words
//!
//! Both halves are symmetric and bounded to [0, 1], so the mean is too.
//! Identical keys score exactly 1.0.

use std::collections::HashSet;

use super::normalize::tokens;

/// Weight of the edit distance ratio; the token overlap gets the rest
const EDIT_WEIGHT: f64 = 0.5;

/// Similarity score in [0, 1] between two normalized keys
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let score = EDIT_WEIGHT * edit_ratio(a, b) + (1.0 - EDIT_WEIGHT) * token_jaccard(a, b);
    score.clamp(0.0, 1.0)
}

/// 1 - levenshtein(a, b) / max(len(a), len(b)), over chars
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// |A ∩ B| / |A ∪ B| over whitespace tokens
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let a_tokens: HashSet<&str> = tokens(a).collect();
    let b_tokens: HashSet<&str> = tokens(b).collect();
    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        return 1.0;
    }
    a_tokens.intersection(&b_tokens).count() as f64 / union as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row dynamic programming table
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_is_one() {
        assert_eq!(similarity("qual a capital do brasil", "qual a capital do brasil"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_disjoint_is_low() {
        assert!(similarity("quem descobriu a penicilina", "qual a capital do brasil") < 0.5);
        assert_eq!(similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_typo_scores_above_default_threshold() {
        let score = similarity("qual a capital do brazil", "qual a capital do brasil");
        assert!(score >= 0.75, "score was {}", score);
    }

    #[test]
    fn test_levenshtein_distances() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("flaw"), &chars("lawn")), 2);
    }

    #[test]
    fn test_token_jaccard() {
        assert_eq!(token_jaccard("a b c", "c b a"), 1.0);
        assert_eq!(token_jaccard("a b", "c d"), 0.0);
        assert!((token_jaccard("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_symmetric_and_bounded(a in "[a-e ]{0,16}", b in "[a-e ]{0,16}") {
            let ab = similarity(&a, &b);
            let ba = similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
