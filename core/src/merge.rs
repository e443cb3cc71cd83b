//! External merge of sorted posting batches into the bucketed on-disk index.
//!
//! Every bucket file is sorted by term with one line per term. A merge streams
//! the existing file against the sorted incoming entries for that bucket into a
//! temp file, then renames the temp file over the original. The rename is the
//! only mutation of a bucket file, so a crash at any earlier point leaves the
//! previous version intact.
//!
//! A segment touches several buckets, each committed on its own. Every commit
//! is recorded in the segment's progress sidecar (`<seq>.done`, one bucket
//! character per line) so a segment retried after a failed pass skips the
//! buckets that already hold its postings.

use crate::bucket::{
    bucket_char, bucket_file_name, bucket_of, parse_line, write_line, BUCKET_COUNT,
};
use crate::error::{IndexError, Result};
use crate::index::{Posting, PostingList};
use crate::segment::{list_segments, read_segment, SegmentHandle};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Incoming entries for one bucket, sorted by term.
pub type BucketBatch = BTreeMap<String, PostingList>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub buckets: usize,
    pub new_terms: usize,
    pub merged_terms: usize,
    pub malformed_lines: usize,
}

impl MergeStats {
    fn absorb(&mut self, other: MergeStats) {
        self.buckets += other.buckets;
        self.new_terms += other.new_terms;
        self.merged_terms += other.merged_terms;
        self.malformed_lines += other.malformed_lines;
    }
}

/// Result of merging every segment found in a spill directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub merged: Vec<u64>,
    pub skipped: Vec<u64>,
    pub stats: MergeStats,
}

/// Group a batch by bucket. Postings for the same term are concatenated in
/// arrival order; terms outside the bucket alphabet are dropped.
pub fn partition<I>(pairs: I) -> Vec<(usize, BucketBatch)>
where
    I: IntoIterator<Item = (String, Posting)>,
{
    let mut groups: Vec<BucketBatch> = (0..BUCKET_COUNT).map(|_| BTreeMap::new()).collect();
    for (term, posting) in pairs {
        match bucket_of(&term) {
            Some(b) => groups[b].entry(term).or_default().push(posting),
            None => tracing::warn!(term = %term, "term has no bucket, dropping"),
        }
    }
    groups.into_iter().enumerate().filter(|(_, g)| !g.is_empty()).collect()
}

/// A fully written temp file waiting to replace its bucket file.
#[derive(Debug)]
pub struct StagedBucket {
    tmp: PathBuf,
    target: PathBuf,
    stats: MergeStats,
}

impl StagedBucket {
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    /// Atomically replace the bucket file with the staged one.
    pub fn commit(self) -> Result<MergeStats> {
        fs::rename(&self.tmp, &self.target)?;
        Ok(self.stats)
    }

    /// Drop the staged file, leaving the bucket untouched.
    pub fn abandon(self) -> Result<()> {
        fs::remove_file(&self.tmp)?;
        Ok(())
    }
}

pub struct IndexMerger {
    dir: PathBuf,
    locks: Vec<Mutex<()>>,
    pool: rayon::ThreadPool,
}

impl IndexMerger {
    /// `threads == 0` sizes the pool to the number of CPUs.
    pub fn new<P: AsRef<Path>>(dir: P, threads: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bucket-merge-{i}"))
            .build()
            .map_err(|e| IndexError::ThreadPool(e.to_string()))?;
        let locks = (0..BUCKET_COUNT).map(|_| Mutex::new(())).collect();
        Ok(Self { dir, locks, pool })
    }

    pub fn bucket_path(&self, bucket: usize) -> PathBuf {
        self.dir.join(bucket_file_name(bucket))
    }

    /// Merge an unsorted batch into the index. Buckets merge in parallel; the
    /// first I/O failure aborts the pass, leaving uncommitted buckets as they were.
    pub fn merge_batch<I>(&self, pairs: I) -> Result<MergeStats>
    where
        I: IntoIterator<Item = (String, Posting)>,
    {
        self.merge_groups(partition(pairs), None)
    }

    fn merge_groups(
        &self,
        groups: Vec<(usize, BucketBatch)>,
        progress: Option<&Mutex<File>>,
    ) -> Result<MergeStats> {
        let results: Vec<MergeStats> = self.pool.install(|| {
            groups
                .into_par_iter()
                .map(|(bucket, batch)| {
                    let stats = self.merge_bucket(bucket, batch)?;
                    if let Some(progress) = progress {
                        record_progress(progress, bucket)?;
                    }
                    Ok(stats)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let mut total = MergeStats::default();
        for s in results {
            total.absorb(s);
        }
        Ok(total)
    }

    /// Merge one bucket's sorted batch and commit it.
    pub fn merge_bucket(&self, bucket: usize, batch: BucketBatch) -> Result<MergeStats> {
        let _guard = self.locks[bucket].lock();
        let staged = self.stage_bucket(bucket, batch)?;
        staged.commit()
    }

    /// Stream the existing bucket file and `batch` into a synced temp file.
    /// The bucket file itself is not modified.
    ///
    /// Callers committing the result must hold the bucket's lock; `merge_bucket` does.
    pub fn stage_bucket(&self, bucket: usize, batch: BucketBatch) -> Result<StagedBucket> {
        let target = self.bucket_path(bucket);
        let tmp = target.with_extension("tmp");

        // An absent bucket is an empty bucket.
        OpenOptions::new().create(true).append(true).open(&target)?;

        let reader = BufReader::new(File::open(&target)?);
        let mut out = BufWriter::new(File::create(&tmp)?);
        let mut stats = MergeStats { buckets: 1, ..Default::default() };
        let mut incoming = batch.into_iter().peekable();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let existing = parse_line(&line);
            if existing.postings.is_none() {
                stats.malformed_lines += 1;
                tracing::warn!(
                    bucket = %bucket_file_name(bucket),
                    line = lineno + 1,
                    term = existing.term,
                    "malformed posting list"
                );
            }

            while let Some((term, postings)) =
                incoming.next_if(|(t, _)| t.as_str() < existing.term)
            {
                write_line(&mut out, &term, &postings)?;
                stats.new_terms += 1;
            }

            match incoming.next_if(|(t, _)| t.as_str() == existing.term) {
                Some((term, postings)) => {
                    let mut merged = existing.postings.unwrap_or_default();
                    merged.extend(postings);
                    write_line(&mut out, &term, &merged)?;
                    stats.merged_terms += 1;
                }
                None => writeln!(out, "{line}")?,
            }
        }

        for (term, postings) in incoming {
            write_line(&mut out, &term, &postings)?;
            stats.new_terms += 1;
        }

        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(StagedBucket { tmp, target, stats })
    }

    /// Merge one spilled segment and delete it. A corrupt segment is left in
    /// place, logged and skipped; `Ok(None)` signals the skip.
    ///
    /// Buckets listed in the segment's progress file are not merged again.
    pub fn merge_segment(&self, handle: &SegmentHandle) -> Result<Option<MergeStats>> {
        let segment = match read_segment(&handle.path) {
            Ok(s) => s,
            Err(e) if e.is_skippable() => {
                tracing::warn!(seq = handle.seq, error = %e, "skipping corrupt segment");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let postings = segment.len();
        let progress_path = handle.progress_path();
        let done = read_progress(&progress_path)?;
        if !done.is_empty() {
            tracing::info!(
                seq = handle.seq,
                buckets = done.len(),
                "resuming partially merged segment"
            );
        }
        let groups: Vec<_> =
            partition(segment).into_iter().filter(|(b, _)| !done.contains(b)).collect();

        let progress = OpenOptions::new().create(true).append(true).open(&progress_path)?;
        let stats = self.merge_groups(groups, Some(&Mutex::new(progress)))?;
        fs::remove_file(&handle.path)?;
        fs::remove_file(&progress_path)?;
        tracing::info!(
            seq = handle.seq,
            postings,
            buckets = stats.buckets,
            new_terms = stats.new_terms,
            merged_terms = stats.merged_terms,
            "merged segment"
        );
        Ok(Some(stats))
    }

    /// Funnel every segment in `spill_dir` through the merge, oldest first.
    pub fn merge_all(&self, spill_dir: &Path) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        for handle in list_segments(spill_dir)? {
            match self.merge_segment(&handle)? {
                Some(stats) => {
                    summary.merged.push(handle.seq);
                    summary.stats.absorb(stats);
                }
                None => summary.skipped.push(handle.seq),
            }
        }
        Ok(summary)
    }
}

/// Buckets already committed for a segment. A missing file means none.
fn read_progress(path: &Path) -> Result<BTreeSet<usize>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let mut done = BTreeSet::new();
    for line in BufReader::new(File::open(path)?).lines() {
        if let Some(bucket) = bucket_of(line?.trim()) {
            done.insert(bucket);
        }
    }
    Ok(done)
}

fn record_progress(progress: &Mutex<File>, bucket: usize) -> Result<()> {
    let mut file = progress.lock();
    writeln!(file, "{}", bucket_char(bucket))?;
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair(term: &str, doc: u32) -> (String, Posting) {
        (term.to_string(), Posting::new(doc, 0, 1))
    }

    fn terms_of(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.split_once(':').unwrap().0.to_string())
            .collect()
    }

    #[test]
    fn partition_folds_repeated_terms_in_arrival_order() {
        let groups =
            partition(vec![pair("cat", 1), pair("apple", 1), pair("cat", 2), pair("9lives", 2)]);
        let buckets: Vec<usize> = groups.iter().map(|(b, _)| *b).collect();
        assert_eq!(buckets, vec![9, 10, 12]);
        let (_, c) = &groups[2];
        assert_eq!(c["cat"].iter().map(|p| p.document_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn first_merge_creates_sorted_bucket() {
        let dir = tempdir().unwrap();
        let merger = IndexMerger::new(dir.path(), 2).unwrap();
        let stats =
            merger.merge_batch(vec![pair("cow", 1), pair("cat", 1), pair("bat", 1)]).unwrap();
        assert_eq!(stats.buckets, 2);
        assert_eq!(stats.new_terms, 3);
        assert_eq!(terms_of(&merger.bucket_path(12)), vec!["cat", "cow"]);
        assert_eq!(terms_of(&merger.bucket_path(11)), vec!["bat"]);
    }

    #[test]
    fn interleaved_merge_keeps_order_and_concatenates() {
        let dir = tempdir().unwrap();
        let merger = IndexMerger::new(dir.path(), 1).unwrap();
        merger.merge_batch(vec![pair("cab", 1), pair("cat", 1), pair("cow", 1)]).unwrap();
        let stats = merger
            .merge_batch(vec![pair("cat", 2), pair("ca", 2), pair("cod", 2), pair("cz", 2)])
            .unwrap();
        assert_eq!(stats.merged_terms, 1);
        assert_eq!(stats.new_terms, 3);

        let path = merger.bucket_path(12);
        assert_eq!(terms_of(&path), vec!["ca", "cab", "cat", "cod", "cow", "cz"]);
        let text = fs::read_to_string(&path).unwrap();
        let cat = text.lines().find(|l| l.starts_with("cat:")).unwrap();
        let list: PostingList = serde_json::from_str(cat.split_once(':').unwrap().1).unwrap();
        assert_eq!(list, vec![Posting::new(1, 0, 1), Posting::new(2, 0, 1)]);
    }

    #[test]
    fn malformed_line_is_replaced_when_merged_and_kept_otherwise() {
        let dir = tempdir().unwrap();
        let merger = IndexMerger::new(dir.path(), 1).unwrap();
        fs::write(merger.bucket_path(12), "cat:[{broken\ncow:also broken\n").unwrap();
        let stats = merger.merge_batch(vec![pair("cat", 5)]).unwrap();
        assert_eq!(stats.malformed_lines, 2);

        let text = fs::read_to_string(merger.bucket_path(12)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"cat:[{"document_id":5,"frequency":{"emphasized":0,"body":1}}]"#);
        assert_eq!(lines[1], "cow:also broken");
    }

    #[test]
    fn staged_merge_does_not_touch_bucket_until_commit() {
        let dir = tempdir().unwrap();
        let merger = IndexMerger::new(dir.path(), 1).unwrap();
        merger.merge_batch(vec![pair("cat", 1)]).unwrap();
        let path = merger.bucket_path(12);
        let before = fs::read(&path).unwrap();

        let batch = || partition(vec![pair("cat", 2)]).remove(0).1;
        let staged = merger.stage_bucket(12, batch()).unwrap();
        assert!(staged.temp_path().exists());
        assert_eq!(fs::read(&path).unwrap(), before);

        staged.commit().unwrap();
        assert_ne!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn abandoned_stage_leaves_bucket_and_no_temp_file() {
        let dir = tempdir().unwrap();
        let merger = IndexMerger::new(dir.path(), 1).unwrap();
        merger.merge_batch(vec![pair("cat", 1)]).unwrap();
        let path = merger.bucket_path(12);
        let before = fs::read(&path).unwrap();

        let staged = merger.stage_bucket(12, partition(vec![pair("cow", 2)]).remove(0).1).unwrap();
        let tmp = staged.temp_path().to_path_buf();
        staged.abandon().unwrap();
        assert!(!tmp.exists());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn failed_segment_retry_skips_committed_buckets() {
        let dir = tempdir().unwrap();
        let spill = dir.path().join("segments");
        fs::create_dir_all(&spill).unwrap();
        let segment = vec![pair("apple", 1), pair("bat", 1), pair("avocado", 2)];
        fs::write(spill.join("1.json"), serde_json::to_string(&segment).unwrap()).unwrap();

        let merger = IndexMerger::new(dir.path().join("buckets"), 1).unwrap();
        // A directory where b.txt should be makes that bucket fail.
        fs::create_dir(merger.bucket_path(11)).unwrap();
        assert!(merger.merge_all(&spill).is_err());
        assert!(spill.join("1.json").exists());

        fs::remove_dir(merger.bucket_path(11)).unwrap();
        let summary = merger.merge_all(&spill).unwrap();
        assert_eq!(summary.merged, vec![1]);
        assert_eq!(terms_of(&merger.bucket_path(10)), vec!["apple", "avocado"]);
        assert_eq!(terms_of(&merger.bucket_path(11)), vec!["bat"]);
        let a = fs::read_to_string(merger.bucket_path(10)).unwrap();
        assert_eq!(a.matches("document_id").count(), 2);
        assert!(!spill.join("1.json").exists());
        assert!(!spill.join("1.done").exists());
    }

    #[test]
    fn progress_file_marks_buckets_already_merged() {
        let dir = tempdir().unwrap();
        let spill = dir.path().join("segments");
        fs::create_dir_all(&spill).unwrap();
        let segment = vec![pair("apple", 1), pair("bat", 1)];
        fs::write(spill.join("1.json"), serde_json::to_string(&segment).unwrap()).unwrap();
        fs::write(spill.join("1.done"), "a\n").unwrap();

        let merger = IndexMerger::new(dir.path().join("buckets"), 1).unwrap();
        let summary = merger.merge_all(&spill).unwrap();
        assert_eq!(summary.stats.buckets, 1);
        assert!(!merger.bucket_path(10).exists());
        assert_eq!(terms_of(&merger.bucket_path(11)), vec!["bat"]);
    }

    #[test]
    fn corrupt_segment_is_skipped_and_kept() {
        let dir = tempdir().unwrap();
        let spill = dir.path().join("segments");
        fs::create_dir_all(&spill).unwrap();
        let cat = r#"[["cat",{"document_id":1,"frequency":{"emphasized":0,"body":1}}]]"#;
        fs::write(spill.join("1.json"), cat).unwrap();
        fs::write(spill.join("2.json"), r#"[["dog",{"docu"#).unwrap();

        let merger = IndexMerger::new(dir.path().join("buckets"), 1).unwrap();
        let summary = merger.merge_all(&spill).unwrap();
        assert_eq!(summary.merged, vec![1]);
        assert_eq!(summary.skipped, vec![2]);
        assert!(!spill.join("1.json").exists());
        assert!(spill.join("2.json").exists());
        assert!(!merger.bucket_path(13).exists());
    }
}
