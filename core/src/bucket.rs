//! Bucket naming and the `term:<json posting list>` line format.

use crate::index::{Posting, PostingList};
use std::io::{self, Write};

/// `0`-`9` then `a`-`z`.
pub const BUCKET_COUNT: usize = 36;
pub const BUCKET_EXT: &str = "txt";

/// Bucket index for a term, keyed by its first character.
pub fn bucket_of(term: &str) -> Option<usize> {
    let c = term.chars().next()?;
    match c {
        '0'..='9' => Some(c as usize - '0' as usize),
        'a'..='z' => Some(10 + c as usize - 'a' as usize),
        _ => None,
    }
}

pub fn bucket_char(bucket: usize) -> char {
    if bucket < 10 {
        (b'0' + bucket as u8) as char
    } else {
        (b'a' + (bucket - 10) as u8) as char
    }
}

pub fn bucket_file_name(bucket: usize) -> String {
    format!("{}.{BUCKET_EXT}", bucket_char(bucket))
}

/// One line of a bucket file. `postings` is `None` when the list failed to decode.
#[derive(Debug)]
pub struct BucketLine<'a> {
    pub term: &'a str,
    pub postings: Option<PostingList>,
}

pub fn parse_line(line: &str) -> BucketLine<'_> {
    match line.split_once(':') {
        Some((term, json)) => BucketLine { term, postings: serde_json::from_str(json).ok() },
        None => BucketLine { term: line, postings: None },
    }
}

pub fn write_line<W: Write>(out: &mut W, term: &str, postings: &[Posting]) -> io::Result<()> {
    out.write_all(term.as_bytes())?;
    out.write_all(b":")?;
    serde_json::to_writer(&mut *out, postings)?;
    out.write_all(b"\n")
}
