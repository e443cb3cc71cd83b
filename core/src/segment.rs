use crate::error::{IndexError, Result};
use crate::index::Posting;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SEGMENT_EXT: &str = "json";
const PARTIAL_EXT: &str = "partial";
const PROGRESS_EXT: &str = "done";

/// Postings produced since the last spill, in arrival order.
pub type Segment = Vec<(String, Posting)>;

/// In-memory buffer of (term, posting) pairs with a spill trigger.
#[derive(Debug)]
pub struct SegmentAccumulator {
    pairs: Segment,
    count: usize,
    threshold: usize,
}

impl SegmentAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self { pairs: Vec::new(), count: 0, threshold }
    }

    /// Append one document's postings. The count grows by distinct terms, not occurrences.
    pub fn add<I>(&mut self, postings: I)
    where
        I: IntoIterator<Item = (String, Posting)>,
    {
        let before = self.pairs.len();
        self.pairs.extend(postings);
        self.count += self.pairs.len() - before;
    }

    pub fn should_spill(&self) -> bool {
        self.count >= self.threshold
    }

    /// Hand the buffered pairs over and start an empty buffer.
    pub fn drain(&mut self) -> Segment {
        self.count = 0;
        std::mem::take(&mut self.pairs)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A spilled segment file, identified by its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHandle {
    pub seq: u64,
    pub path: PathBuf,
}

impl SegmentHandle {
    /// Sidecar listing the buckets this segment has already been committed to.
    pub fn progress_path(&self) -> PathBuf {
        self.path.with_extension(PROGRESS_EXT)
    }
}

/// Writes segments into the spill directory as `<seq>.json`.
#[derive(Debug)]
pub struct SegmentWriter {
    dir: PathBuf,
    next_seq: u64,
}

impl SegmentWriter {
    /// Sequence numbers continue after the highest segment already in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let last = list_segments(&dir)?.last().map(|h| h.seq).unwrap_or(0);
        Ok(Self { dir, next_seq: last + 1 })
    }

    /// Serialize `segment` as a JSON array of `[term, posting]` pairs. The file
    /// only appears under its final name once fully written and synced.
    pub fn spill(&mut self, segment: Segment) -> Result<SegmentHandle> {
        let seq = self.next_seq;
        let path = self.dir.join(format!("{seq}.{SEGMENT_EXT}"));
        let partial = path.with_extension(PARTIAL_EXT);

        let file = File::create(&partial)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, &segment)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);
        let handle = SegmentHandle { seq, path };
        // A progress file left by an earlier segment of the same number is stale.
        if handle.progress_path().exists() {
            fs::remove_file(handle.progress_path())?;
        }
        fs::rename(&partial, &handle.path)?;

        self.next_seq += 1;
        tracing::info!(seq, postings = segment.len(), "spilled segment");
        Ok(handle)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Decode a spilled segment. Any decoding failure, including a truncated
/// file, is reported as `CorruptSegment`.
pub fn read_segment(path: &Path) -> Result<Segment> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| IndexError::CorruptSegment {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Completed segment files in `dir`, ordered by sequence number.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentHandle>> {
    let mut handles = Vec::new();
    if !dir.exists() {
        return Ok(handles);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let seq = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(seq) = seq {
            handles.push(SegmentHandle { seq, path });
        }
    }
    handles.sort_by_key(|h| h.seq);
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair(term: &str, doc: u32) -> (String, Posting) {
        (term.to_string(), Posting::new(doc, 0, 1))
    }

    #[test]
    fn count_tracks_distinct_terms_and_resets_on_drain() {
        let mut acc = SegmentAccumulator::new(3);
        acc.add(vec![pair("a", 1), pair("b", 1)]);
        assert!(!acc.should_spill());
        acc.add(vec![pair("a", 2)]);
        assert!(acc.should_spill());

        let seg = acc.drain();
        assert_eq!(seg.len(), 3);
        assert!(acc.is_empty());
        assert!(!acc.should_spill());

        acc.add(vec![pair("c", 3)]);
        assert_eq!(seg.len(), 3);
        assert_eq!(acc.drain(), vec![pair("c", 3)]);
    }

    #[test]
    fn spill_numbers_from_one_and_round_trips() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::open(dir.path()).unwrap();
        let h1 = writer.spill(vec![pair("cat", 1)]).unwrap();
        let h2 = writer.spill(vec![pair("dog", 2)]).unwrap();
        assert_eq!((h1.seq, h2.seq), (1, 2));
        assert!(h1.path.ends_with("1.json"));

        let raw = fs::read_to_string(&h1.path).unwrap();
        assert_eq!(raw, r#"[["cat",{"document_id":1,"frequency":{"emphasized":0,"body":1}}]]"#);
        assert_eq!(read_segment(&h2.path).unwrap(), vec![pair("dog", 2)]);
    }

    #[test]
    fn writer_resumes_after_existing_segments() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2.json"), "[]").unwrap();
        fs::write(dir.path().join("10.json"), "[]").unwrap();
        fs::write(dir.path().join("11.partial"), "[[").unwrap();
        fs::write(dir.path().join("11.done"), "a\n").unwrap();
        let mut writer = SegmentWriter::open(dir.path()).unwrap();
        let handle = writer.spill(Vec::new()).unwrap();
        assert_eq!(handle.seq, 11);
        assert!(!handle.progress_path().exists());

        let seqs: Vec<u64> = list_segments(dir.path()).unwrap().iter().map(|h| h.seq).collect();
        assert_eq!(seqs, vec![2, 10, 11]);
    }

    #[test]
    fn truncated_segment_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.json");
        fs::write(&path, r#"[["cat",{"document_id":1,"freq"#).unwrap();
        let err = read_segment(&path).unwrap_err();
        assert!(err.is_skippable());
    }
}
