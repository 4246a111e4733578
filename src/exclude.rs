// Laminate layer builder.

//! The exclude/include path algebra that drives the external archiver.
//!
//! Callers walk a diff stream and announce each path as kept or dropped.
//! `ExcludeSet` keeps the resulting exclusion list both minimal and free of
//! the subtree-exclusion hazard: excluding a directory implies excluding
//! everything beneath it, so excluding an ancestor of something we've
//! promised to keep would silently drop it.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Accumulates include/exclude decisions over absolute host paths and
/// renders them as an archiver exclusion list.
///
/// Invariants, enforced by the API rather than merely observed:
///
/// - (I1) No path in `exclude` is a prefix, in the directory-hierarchy
///   sense, of any path in `include`.
/// - (I2) No path in `include` is a strict ancestor directory of another
///   path in `include`.
#[derive(Debug, Default, Clone)]
pub struct ExcludeSet {
    exclude: BTreeSet<PathBuf>,
    include: Vec<PathBuf>,
}

impl ExcludeSet {
    pub fn new() -> ExcludeSet {
        ExcludeSet::default()
    }

    /// Mark `p` for omission from the archive. A no-op if any already
    /// included path has `p` as a directory-hierarchy prefix.
    pub fn add_exclude(&mut self, p: impl AsRef<Path>) {
        let p = p.as_ref();
        if self.include.iter().any(|inc| is_prefix(p, inc)) {
            return;
        }
        self.exclude.insert(p.to_path_buf());
    }

    /// Record that `orig` has been explicitly retained. `is_dir` says
    /// whether `orig` itself is a directory.
    ///
    /// Walks upward from `orig` (if a directory) or `orig`'s parent
    /// (otherwise), removing each ancestor from the exclude set, since only
    /// ancestors — never `orig` itself — could have been excluded already.
    pub fn add_include(&mut self, orig: impl AsRef<Path>, is_dir: bool) {
        let orig = orig.as_ref();
        let mut p = if is_dir {
            Some(orig.to_path_buf())
        } else {
            orig.parent().map(|p| p.to_path_buf())
        };
        while let Some(cur) = p {
            if cur.as_os_str().is_empty() || cur == Path::new("/") {
                break;
            }
            self.exclude.remove(&cur);
            p = cur.parent().map(|p| p.to_path_buf());
        }
        if !self.include.iter().any(|i| i == orig) {
            self.include.push(orig.to_path_buf());
        }
    }

    /// Render the exclude paths as the archiver's list-file text: one
    /// newline-separated path per line, terminated by a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for p in &self.exclude {
            let _ = writeln!(out, "{}", p.display());
        }
        out.push('\n');
        out
    }

    pub fn is_empty(&self) -> bool {
        self.exclude.is_empty()
    }

    pub fn exclude_paths(&self) -> impl Iterator<Item = &Path> {
        self.exclude.iter().map(PathBuf::as_path)
    }

    pub fn include_paths(&self) -> impl Iterator<Item = &Path> {
        self.include.iter().map(PathBuf::as_path)
    }
}

/// True if `ancestor` is `descendant` or a directory-hierarchy prefix of it.
fn is_prefix(ancestor: &Path, descendant: &Path) -> bool {
    descendant == ancestor || descendant.starts_with(ancestor)
}
