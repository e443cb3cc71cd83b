use crate::builder::build_postings;
use crate::config::IndexerConfig;
use crate::error::Result;
use crate::extract::{HtmlExtractor, TermExtractor};
use crate::index::{DocId, Document};
use crate::merge::IndexMerger;
use crate::persist::{last_doc_id, reset, save_meta, DocLog, IndexPaths, MetaFile};
use crate::report::{generate, write_report, Report};
use crate::segment::{SegmentAccumulator, SegmentWriter};
use std::fs;
use time::format_description::well_known::Rfc3339;

/// Drives one index build: ingest documents, spill when the buffer is full,
/// and merge everything into the buckets on `finalize`.
pub struct Indexer<E = HtmlExtractor> {
    config: IndexerConfig,
    paths: IndexPaths,
    extractor: E,
    accumulator: SegmentAccumulator,
    writer: SegmentWriter,
    merger: IndexMerger,
    doc_log: DocLog,
    last_id: DocId,
    segments_merged: u32,
}

impl Indexer<HtmlExtractor> {
    pub fn open(config: IndexerConfig) -> Result<Self> {
        Self::with_extractor(config, HtmlExtractor)
    }
}

impl<E: TermExtractor> Indexer<E> {
    pub fn with_extractor(config: IndexerConfig, extractor: E) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(&config.index_dir);
        if config.reset {
            reset(&paths)?;
        }
        fs::create_dir_all(&paths.root)?;

        let last_id = last_doc_id(&paths.doc_log())?;
        let writer = SegmentWriter::open(paths.spill_dir())?;
        let merger = IndexMerger::new(paths.buckets_dir(), config.merge_threads)?;
        let doc_log = DocLog::open(paths.doc_log())?;
        if last_id > 0 {
            tracing::info!(last_id, "resuming document ids");
        }

        Ok(Self {
            accumulator: SegmentAccumulator::new(config.spill_threshold),
            config,
            paths,
            extractor,
            writer,
            merger,
            doc_log,
            last_id,
            segments_merged: 0,
        })
    }

    /// Index one document. Empty content is skipped without consuming an id.
    pub fn ingest(&mut self, locator: &str, content: &str) -> Result<Option<DocId>> {
        if content.trim().is_empty() {
            tracing::debug!(locator, "skipping empty document");
            return Ok(None);
        }
        let id = self.last_id + 1;
        self.doc_log.append(&Document { id, locator: locator.to_string() })?;
        self.last_id = id;

        let terms = self.extractor.extract(content).unwrap_or_else(|e| {
            tracing::warn!(locator, error = %e, "term extraction failed, indexing no terms");
            Default::default()
        });
        if terms.is_empty() {
            tracing::debug!(locator, id, "document produced no terms");
        }
        let postings = build_postings(id, &terms.emphasized, &terms.body);
        self.accumulator.add(postings);

        if self.accumulator.should_spill() {
            self.spill()?;
        }
        Ok(Some(id))
    }

    fn spill(&mut self) -> Result<()> {
        // Ids in the segment must be durable in the log before the segment is.
        self.doc_log.sync()?;
        let segment = self.accumulator.drain();
        let handle = self.writer.spill(segment)?;
        if self.config.merge_on_spill && self.merger.merge_segment(&handle)?.is_some() {
            self.segments_merged += 1;
        }
        Ok(())
    }

    /// Spill what is still buffered, merge every segment, persist run metadata
    /// and produce the report.
    pub fn finalize(mut self) -> Result<Report> {
        if !self.accumulator.is_empty() {
            self.spill()?;
        }
        self.doc_log.flush()?;

        let summary = self.merger.merge_all(self.writer.dir())?;
        self.segments_merged += summary.merged.len() as u32;
        if !summary.skipped.is_empty() {
            tracing::warn!(skipped = ?summary.skipped, "some segments were not merged");
        }

        let meta = MetaFile {
            num_docs: self.last_id,
            num_segments: self.segments_merged,
            created_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            version: 1,
        };
        save_meta(&self.paths, &meta)?;

        let report = generate(&self.paths, self.last_id)?;
        write_report(&self.paths, &report)?;
        tracing::info!(
            documents = report.documents,
            unique_terms = report.unique_terms,
            size_kb = report.size_kb(),
            segments = self.segments_merged,
            "index build complete"
        );
        Ok(report)
    }

    pub fn documents(&self) -> DocId {
        self.last_id
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }
}
