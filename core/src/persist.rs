use crate::error::Result;
use crate::index::{DocId, Document};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_segments: u32,
    pub created_at: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn buckets_dir(&self) -> PathBuf { self.root.join("buckets") }
    pub fn spill_dir(&self) -> PathBuf { self.root.join("segments") }
    pub fn doc_log(&self) -> PathBuf { self.root.join("doc_ids.txt") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn report(&self) -> PathBuf { self.root.join("report.txt") }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    fs::create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Remove every artifact of a previous run under `paths.root`.
pub fn reset(paths: &IndexPaths) -> Result<()> {
    for dir in [paths.buckets_dir(), paths.spill_dir()] {
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
    }
    for file in [paths.doc_log(), paths.meta(), paths.report()] {
        if file.exists() {
            fs::remove_file(&file)?;
        }
    }
    tracing::info!(root = %paths.root.display(), "reset index state");
    Ok(())
}

/// Append-only id-to-locator log: the id on one line, the locator on the next.
pub struct DocLog {
    writer: BufWriter<File>,
}

impl DocLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    pub fn append(&mut self, doc: &Document) -> Result<()> {
        writeln!(self.writer, "{}", doc.id)?;
        writeln!(self.writer, "{}", doc.locator)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync, so every id handed out so far survives a crash.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Visit every complete pair in the log without holding it in memory. A
/// trailing half-written pair or a non-numeric id line ends the read.
fn scan_doc_log<F: FnMut(Document)>(path: &Path, mut visit: F) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let mut lines = BufReader::new(File::open(path)?).lines();
    while let (Some(id), Some(locator)) = (lines.next(), lines.next()) {
        let (id, locator) = (id?, locator?);
        match id.trim().parse::<DocId>() {
            Ok(id) => visit(Document { id, locator }),
            Err(_) => {
                tracing::warn!(line = %id, "unreadable id in document log, stopping");
                break;
            }
        }
    }
    Ok(())
}

pub fn read_doc_log(path: &Path) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    scan_doc_log(path, |doc| docs.push(doc))?;
    Ok(docs)
}

/// Highest id recorded in the log, or 0 when nothing was ingested yet.
pub fn last_doc_id(path: &Path) -> Result<DocId> {
    let mut last = 0;
    scan_doc_log(path, |doc| last = last.max(doc.id))?;
    Ok(last)
}
