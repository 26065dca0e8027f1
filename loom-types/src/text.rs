//! Text utilities: keyword extraction, Jaccard similarity, and
//! rune-safe truncation. Shared by the memory recall/capture hooks.

use std::collections::HashSet;

/// Keyword extraction never returns more than this many keywords.
pub const MAX_KEYWORDS: usize = 10;

/// Tokens shorter than this (in bytes) are dropped. Measured in bytes,
/// not scalar values, so single CJK ideographs (3 bytes each) survive
/// the filter while one-letter Latin tokens do not.
pub const MIN_KEYWORD_LEN: usize = 2;

/// Default Jaccard similarity threshold for memory-capture dedup.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "and", "or", "but",
    "if", "then", "to", "of", "in", "on", "at", "for", "with", "as", "by", "this", "that",
    "it", "from", "has", "have", "had", "do", "does", "did", "can", "could", "will", "would",
    "should", "i", "you", "he", "she", "we", "they", "not", "what", "which", "who", "how",
];

const CJK_STOPWORDS: &[&str] = &[
    "的", "了", "和", "是", "在", "我", "有", "他", "这", "你", "们", "就",
    "不", "人", "都", "一", "个", "也", "而", "及", "与", "着", "或", "等",
];

fn is_stopword(token: &str) -> bool {
    let lower = token.to_lowercase();
    ENGLISH_STOPWORDS.contains(&lower.as_str()) || CJK_STOPWORDS.contains(&token)
}

/// Split input into candidate tokens, treating runs of CJK characters
/// as individual single-character tokens (CJK has no whitespace between
/// words) and runs of ASCII/Latin word characters as single tokens.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            tokens.push(std::mem::take(current));
        }
    };

    for ch in input.chars() {
        if is_cjk(ch) {
            flush(&mut current, &mut tokens);
            tokens.push(ch.to_string());
        } else if ch.is_alphanumeric() {
            current.push(ch);
        } else {
            flush(&mut current, &mut tokens);
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn is_cjk(ch: char) -> bool {
    let c = ch as u32;
    (0x4E00..=0x9FFF).contains(&c)   // CJK Unified Ideographs
        || (0x3040..=0x30FF).contains(&c) // Hiragana/Katakana
        || (0xAC00..=0xD7A3).contains(&c) // Hangul syllables
}

/// Extract lower-cased keywords from `input`, filtering stop words
/// (English + CJK) and tokens under [`MIN_KEYWORD_LEN`], deduplicated,
/// capped at [`MAX_KEYWORDS`].
pub fn extract_keywords(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for token in tokenize(input) {
        if is_stopword(&token) {
            continue;
        }
        let lower = token.to_lowercase();
        if lower.len() < MIN_KEYWORD_LEN {
            continue;
        }
        if seen.insert(lower.clone()) {
            keywords.push(lower);
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }

    keywords
}

/// Jaccard similarity over the lower-cased, stop-filtered token set of
/// two content strings. Always in `[0, 1]`; for strings with at least
/// one shared token and no tokens unique to either side, returns
/// `1.0`.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = extract_keywords(a).into_iter().collect();
    let tokens_b: HashSet<String> = extract_keywords(b).into_iter().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Truncate `input` to at most `max_chars` Unicode scalar values,
/// never splitting inside a multi-byte character. Appends no ellipsis —
/// callers that want one add it themselves.
pub fn truncate_runes(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_lowercase_deduped_and_capped() {
        let kws = extract_keywords("Deploy Deploy the API Gateway to Production Production Now Please Immediately");
        assert!(kws.iter().all(|k| k.chars().all(|c| !c.is_uppercase())));
        assert!(kws.len() <= MAX_KEYWORDS);
        let unique: HashSet<_> = kws.iter().collect();
        assert_eq!(unique.len(), kws.len());
    }

    #[test]
    fn keywords_filter_stopwords_and_short_tokens() {
        let kws = extract_keywords("the a an is to of deployment");
        assert_eq!(kws, vec!["deployment".to_string()]);
    }

    #[test]
    fn cjk_keywords_are_individual_characters() {
        let kws = extract_keywords("部署网关");
        assert!(kws.contains(&"部".to_string()));
        assert!(kws.contains(&"署".to_string()));
    }

    #[test]
    fn similarity_in_unit_range() {
        let s = jaccard_similarity("deploy the api gateway", "deploy the api gateway now");
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn similarity_is_one_for_fully_overlapping_tokens() {
        let s = jaccard_similarity("deploy gateway", "gateway deploy");
        assert_eq!(s, 1.0);
    }

    #[test]
    fn similarity_is_zero_for_disjoint_tokens() {
        let s = jaccard_similarity("deploy gateway", "restart database");
        assert_eq!(s, 0.0);
    }

    #[test]
    fn truncate_runes_never_splits_multibyte_chars() {
        let s = "héllo wörld 世界";
        let truncated = truncate_runes(s, 5);
        assert_eq!(truncated.chars().count(), 5);
        assert!(String::from_utf8(truncated.clone().into_bytes()).is_ok());
    }

    #[test]
    fn truncate_runes_is_noop_when_short_enough() {
        let s = "short";
        assert_eq!(truncate_runes(s, 100), s);
    }
}
