use serde::{Deserialize, Serialize};

pub type DocId = u32;
pub type Term = String;

/// Multiplier a scoring layer applies to emphasized occurrences.
pub const EMPHASIS_WEIGHT: u32 = 10;

/// A document accepted by the ingest loop. `id` is assigned at ingest time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocId,
    pub locator: String,
}

/// Raw occurrence counts of a term inside one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub emphasized: u32,
    pub body: u32,
}

impl Frequency {
    /// Combined score with emphasized occurrences multiplied by `weight`.
    pub fn weighted(&self, weight: u32) -> u32 {
        self.emphasized.saturating_mul(weight).saturating_add(self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub document_id: DocId,
    pub frequency: Frequency,
}

impl Posting {
    pub fn new(document_id: DocId, emphasized: u32, body: u32) -> Self {
        Self { document_id, frequency: Frequency { emphasized, body } }
    }
}

/// Postings of one term in merge order (not sorted by document id).
pub type PostingList = Vec<Posting>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_json_shape() {
        let p = Posting::new(2, 1, 1);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"document_id":2,"frequency":{"emphasized":1,"body":1}}"#);
    }

    #[test]
    fn weighted_score_counts_emphasis_tenfold() {
        let f = Frequency { emphasized: 2, body: 3 };
        assert_eq!(f.weighted(EMPHASIS_WEIGHT), 23);
    }
}
