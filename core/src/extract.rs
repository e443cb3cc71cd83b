use crate::error::Result;
use crate::tokenizer::tokenize;
use scraper::Html;

const EMPHASIS_TAGS: &[&str] = &["title", "h1", "h2", "h3", "h4", "h5", "h6", "b", "strong"];
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript"];

/// Normalized terms of one document, split by weight class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTerms {
    pub emphasized: Vec<String>,
    pub body: Vec<String>,
}

impl ExtractedTerms {
    pub fn is_empty(&self) -> bool {
        self.emphasized.is_empty() && self.body.is_empty()
    }
}

pub trait TermExtractor {
    fn extract(&self, content: &str) -> Result<ExtractedTerms>;
}

/// Extracts terms from HTML. Text under `title`, headings, `b` and `strong` is
/// emphasized; text under `body` is body text. A bold word inside the body
/// therefore counts in both streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl TermExtractor for HtmlExtractor {
    fn extract(&self, content: &str) -> Result<ExtractedTerms> {
        let doc = Html::parse_document(content);
        let mut terms = ExtractedTerms::default();

        for node in doc.root_element().descendants() {
            let Some(text) = node.value().as_text() else { continue };
            let mut emphasized = false;
            let mut in_body = false;
            let mut skipped = false;
            for ancestor in node.ancestors() {
                if let Some(el) = ancestor.value().as_element() {
                    let name = el.name();
                    if SKIPPED_TAGS.contains(&name) {
                        skipped = true;
                        break;
                    }
                    emphasized |= EMPHASIS_TAGS.contains(&name);
                    in_body |= name == "body";
                }
            }
            if skipped {
                continue;
            }
            let tokens = tokenize(text);
            if tokens.is_empty() {
                continue;
            }
            if emphasized {
                terms.emphasized.extend(tokens.iter().cloned());
            }
            if in_body {
                terms.body.extend(tokens);
            }
        }
        Ok(terms)
    }
}
