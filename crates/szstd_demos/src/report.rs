// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! How well each cached dictionary compresses a set of files

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use szstd::{Codec, CodecError, Snapshot};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("unable to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("unable to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to compress {}: {source}", .path.display())]
    Compress { path: PathBuf, source: CodecError },
}

/// Compressed sizes of one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub original: usize,
    pub plain: usize,
    /// `(dictionary id, compressed size)`, smallest first; ties keep id order.
    pub with_dictionary: Vec<(String, usize)>,
    /// Dictionaries the match table would offer for this file's path.
    pub routed: Vec<String>,
}

impl FileReport {
    pub fn best(&self) -> Option<&(String, usize)> {
        self.with_dictionary.first()
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} bytes, zstd {} ({})",
            self.path.display(),
            self.original,
            self.plain,
            Ratio(self.original, self.plain),
        )?;
        if let Some((id, size)) = self.best() {
            write!(f, ", best {id} {size} ({})", Ratio(self.original, *size))?;
        }
        if !self.routed.is_empty() {
            write!(f, ", routed to {}", self.routed.join(", "))?;
        }
        Ok(())
    }
}

struct Ratio(usize, usize);

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            0 => f.write_str("-"),
            compressed => write!(f, "{:.2}x", self.0 as f64 / compressed as f64),
        }
    }
}

/// Measure every file under `root`, in path order.
///
/// A file's match-table URL is its path relative to `root`, with a leading `/`.
pub fn measure_directory(
    snapshot: &Snapshot,
    root: &Path,
) -> Result<Vec<FileReport>, ReportError> {
    let mut ids: Vec<&str> = snapshot.dictionaries().ids().collect();
    ids.sort_unstable();
    let codec = snapshot.codec();

    let mut reports = vec![];
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ReportError::Walk {
            path: root.to_owned(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let contents = std::fs::read(path).map_err(|source| ReportError::Read {
            path: path.to_owned(),
            source,
        })?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        let url = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
        reports.push(measure(snapshot, &codec, &ids, path, &url, &contents)?);
    }
    Ok(reports)
}

fn measure(
    snapshot: &Snapshot,
    codec: &Codec,
    ids: &[&str],
    path: &Path,
    url: &str,
    contents: &[u8],
) -> Result<FileReport, ReportError> {
    let compress_err = |source| ReportError::Compress {
        path: path.to_owned(),
        source,
    };
    let plain = codec.compress_to_vec(contents, None).map_err(compress_err)?.len();

    let mut with_dictionary = vec![];
    for &id in ids {
        let Some(dictionary) = snapshot.dictionaries().lookup(id) else {
            continue;
        };
        let compressed = codec
            .compress_to_vec(contents, Some(&**dictionary))
            .map_err(compress_err)?;
        with_dictionary.push((id.to_owned(), compressed.len()));
    }
    with_dictionary.sort_by_key(|&(_, size)| size);

    Ok(FileReport {
        path: path.to_owned(),
        original: contents.len(),
        plain,
        with_dictionary,
        routed: snapshot
            .candidate_ids(url)
            .into_iter()
            .map(str::to_owned)
            .collect(),
    })
}
