use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"\S+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Canonicalize a raw token: decompose, lowercase, keep ASCII alphanumerics, stem.
/// Returns `None` when the token has no alphanumeric content.
pub fn normalize(token: &str) -> Option<String> {
    let folded: String = token
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if folded.is_empty() {
        return None;
    }
    Some(STEMMER.stem(&folded).into_owned())
}

/// Split text on whitespace and normalize every token, dropping empty ones.
/// No stopword filtering: every word is indexed.
pub fn tokenize(text: &str) -> Vec<String> {
    RE.find_iter(text).filter_map(|m| normalize(m.as_str())).collect()
}
