//! # File Store
//!
//! Numbered append-only blockfiles (`blockfile_000000`, `blockfile_000001`,
//! ...) inside a ledger directory.
//!
//! - `writer` - the single owned handle on the active file
//! - `reader` - random-access reads by location
//! - `scanner` - sequential record scan used by recovery and index replay

mod reader;
mod scanner;
mod writer;

#[cfg(test)]
mod tests;

use std::io;
use std::path::{Path, PathBuf};

pub use reader::BlockfileReader;
pub use scanner::{RecordScanner, ScannedRecord};
pub use writer::BlockfileWriter;

/// File name prefix of every blockfile.
pub const BLOCKFILE_PREFIX: &str = "blockfile_";

/// Path of blockfile `suffix` in `dir`.
pub fn blockfile_path(dir: &Path, suffix: u32) -> PathBuf {
    dir.join(format!("{BLOCKFILE_PREFIX}{suffix:06}"))
}

/// Suffix encoded in a blockfile name.
pub fn parse_suffix(file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(BLOCKFILE_PREFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest blockfile suffix present in `dir`.
pub fn highest_suffix(dir: &Path) -> io::Result<Option<u32>> {
    let mut highest = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(suffix) = entry.file_name().to_str().and_then(parse_suffix) {
            highest = highest.max(Some(suffix));
        }
    }
    Ok(highest)
}
