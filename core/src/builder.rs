use crate::index::{DocId, Posting};
use std::collections::BTreeMap;

/// Collapse one document's terms into a posting per distinct term.
///
/// Counts are raw occurrence counts; emphasis weighting is left to the
/// consumer. Terms come out in ascending order.
pub fn build_postings(
    doc_id: DocId,
    emphasized: &[String],
    body: &[String],
) -> BTreeMap<String, Posting> {
    let mut postings: BTreeMap<String, Posting> = BTreeMap::new();
    for term in emphasized {
        postings
            .entry(term.clone())
            .or_insert_with(|| Posting::new(doc_id, 0, 0))
            .frequency
            .emphasized += 1;
    }
    for term in body {
        postings
            .entry(term.clone())
            .or_insert_with(|| Posting::new(doc_id, 0, 0))
            .frequency
            .body += 1;
    }
    postings
}
