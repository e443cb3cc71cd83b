use crate::bucket::{bucket_file_name, BUCKET_COUNT};
use crate::error::Result;
use crate::persist::IndexPaths;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub documents: u32,
    pub unique_terms: u64,
    pub size_bytes: u64,
}

impl Report {
    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Indexed documents: {}", self.documents)?;
        writeln!(f, "Unique tokens: {}", self.unique_terms)?;
        writeln!(f, "Index size: {:.2} KB", self.size_kb())
    }
}

/// Scan the bucket files. Read-only; missing buckets count as empty.
pub fn generate(paths: &IndexPaths, documents: u32) -> Result<Report> {
    let mut report = Report { documents, unique_terms: 0, size_bytes: 0 };
    let dir = paths.buckets_dir();
    for bucket in 0..BUCKET_COUNT {
        let path = dir.join(bucket_file_name(bucket));
        if !path.exists() {
            continue;
        }
        report.size_bytes += fs::metadata(&path)?.len();
        for line in BufReader::new(File::open(&path)?).lines() {
            if !line?.is_empty() {
                report.unique_terms += 1;
            }
        }
    }
    Ok(report)
}

pub fn write_report(paths: &IndexPaths, report: &Report) -> Result<()> {
    fs::write(paths.report(), report.to_string())?;
    Ok(())
}
