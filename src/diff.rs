// Laminate layer builder.

//! Walk a rootfs, compare it against a prior manifest, and produce a stream
//! of typed diff entries.
//!
//! The walk itself is a thin, hand-rolled BFS (no external directory-walking
//! crate is pulled in): entries in a directory are visited before its
//! subdirectories, each level sorted by apath.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::apath::Apath;
use crate::error::{Error, Result};
use crate::manifest::{sha256_hex, EntryKind, Manifest, ManifestEntry};

/// One change between a prior manifest and the current rootfs state.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffEntry {
    Modified {
        apath: Apath,
        old_is_dir: bool,
        new_is_dir: bool,
    },
    Extra {
        apath: Apath,
        new_is_dir: bool,
    },
    Missing {
        apath: Apath,
        old_is_dir: bool,
    },
    Same {
        apath: Apath,
        is_dir: bool,
    },
}

impl DiffEntry {
    pub fn apath(&self) -> &Apath {
        match self {
            DiffEntry::Modified { apath, .. }
            | DiffEntry::Extra { apath, .. }
            | DiffEntry::Missing { apath, .. }
            | DiffEntry::Same { apath, .. } => apath,
        }
    }

    /// Is-directory on the side that survives into the current rootfs
    /// (`Extra`/`Modified`/`Same`), or `None` for `Missing`.
    pub fn new_is_dir(&self) -> Option<bool> {
        match self {
            DiffEntry::Modified { new_is_dir, .. } => Some(*new_is_dir),
            DiffEntry::Extra { new_is_dir, .. } => Some(*new_is_dir),
            DiffEntry::Same { is_dir, .. } => Some(*is_dir),
            DiffEntry::Missing { .. } => None,
        }
    }

    /// Is-directory on the prior-manifest side (`Missing`/`Modified`/`Same`),
    /// or `None` for `Extra`.
    pub fn old_is_dir(&self) -> Option<bool> {
        match self {
            DiffEntry::Modified { old_is_dir, .. } => Some(*old_is_dir),
            DiffEntry::Missing { old_is_dir, .. } => Some(*old_is_dir),
            DiffEntry::Same { is_dir, .. } => Some(*is_dir),
            DiffEntry::Extra { .. } => None,
        }
    }
}

/// Walk `rootfs_path`, recording the manifest keyword set for every entry.
///
/// `rootless` tolerates the common case where the process can't read a
/// file's own contents (but can stat it) due to a privilege drop: the entry
/// is still recorded, with its content digest omitted rather than the whole
/// walk failing.
pub fn walk_rootfs(rootfs_path: &Path, rootless: bool) -> Result<Manifest> {
    let mut manifest = Manifest::new();
    let root_meta = fs::symlink_metadata(rootfs_path).map_err(|e| Error::walk(rootfs_path, e))?;
    manifest.insert(entry_from_metadata(
        Apath::from("/"),
        rootfs_path,
        &root_meta,
        rootless,
    )?);

    let mut dirs: VecDeque<Apath> = VecDeque::new();
    dirs.push_back(Apath::from("/"));
    while let Some(dir_apath) = dirs.pop_front() {
        let host_dir = dir_apath.host_path(rootfs_path);
        let read_dir = match fs::read_dir(&host_dir) {
            Ok(rd) => rd,
            Err(e) if rootless && e.kind() == io::ErrorKind::PermissionDenied => continue,
            Err(e) => return Err(Error::walk(&host_dir, e)),
        };
        let mut names: Vec<String> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::walk(&host_dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        for name in names {
            let child_apath = if dir_apath.is_root() {
                Apath::from(format!("/{name}"))
            } else {
                Apath::from(format!("{dir_apath}/{name}"))
            };
            let host_path = child_apath.host_path(rootfs_path);
            let meta = fs::symlink_metadata(&host_path).map_err(|e| Error::walk(&host_path, e))?;
            let is_dir = meta.is_dir();
            manifest.insert(entry_from_metadata(
                child_apath.clone(),
                &host_path,
                &meta,
                rootless,
            )?);
            if is_dir {
                dirs.push_back(child_apath);
            }
        }
    }
    Ok(manifest)
}

fn entry_from_metadata(
    apath: Apath,
    host_path: &Path,
    meta: &fs::Metadata,
    rootless: bool,
) -> Result<ManifestEntry> {
    let file_type = meta.file_type();
    let (kind, size, sha256digest, link) = if file_type.is_dir() {
        (EntryKind::Dir, None, None, None)
    } else if file_type.is_symlink() {
        let target = fs::read_link(host_path)
            .map_err(|e| Error::walk(host_path, e))?
            .to_string_lossy()
            .into_owned();
        (EntryKind::Symlink, None, None, Some(target))
    } else if is_whiteout_chardev(meta) {
        (EntryKind::CharDevice, None, None, None)
    } else {
        let digest = match fs::File::open(host_path) {
            Ok(mut f) => Some(sha256_hex(&mut f)?),
            Err(e) if rootless && e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::debug!(path = %host_path.display(), "skipping content digest: permission denied");
                None
            }
            Err(e) => return Err(Error::walk(host_path, e)),
        };
        (EntryKind::File, Some(meta.len()), digest, None)
    };
    Ok(ManifestEntry {
        apath,
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        size,
        sha256digest,
        link,
    })
}

#[cfg(unix)]
fn is_whiteout_chardev(meta: &fs::Metadata) -> bool {
    use nix::sys::stat::{major, minor, SFlag};
    let mode = meta.mode();
    (mode & SFlag::S_IFMT.bits()) == SFlag::S_IFCHR.bits()
        && major(meta.rdev()) == 0
        && minor(meta.rdev()) == 0
}

/// Compare the prior manifest against a freshly-walked current manifest,
/// producing one [`DiffEntry`] per distinct apath in the union, with the
/// root-ignore and simplify filters already applied.
pub fn diff_manifests(prior: &Manifest, current: &Manifest) -> Vec<DiffEntry> {
    let raw = merge_manifests(prior, current);
    simplify(root_ignore(raw))
}

fn merge_manifests(prior: &Manifest, current: &Manifest) -> Vec<DiffEntry> {
    let mut prior_iter = prior.iter().peekable();
    let mut current_iter = current.iter().peekable();
    let mut out = Vec::new();
    loop {
        match (prior_iter.peek(), current_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => {
                let p = prior_iter.next().unwrap();
                out.push(DiffEntry::Missing {
                    apath: p.apath.clone(),
                    old_is_dir: p.kind.is_dir(),
                });
            }
            (None, Some(_)) => {
                let c = current_iter.next().unwrap();
                out.push(DiffEntry::Extra {
                    apath: c.apath.clone(),
                    new_is_dir: c.kind.is_dir(),
                });
            }
            (Some(p), Some(c)) => match p.apath.cmp(&c.apath) {
                std::cmp::Ordering::Equal => {
                    let p = prior_iter.next().unwrap();
                    let c = current_iter.next().unwrap();
                    if entries_equal(p, c) {
                        out.push(DiffEntry::Same {
                            apath: p.apath.clone(),
                            is_dir: p.kind.is_dir(),
                        });
                    } else {
                        out.push(DiffEntry::Modified {
                            apath: p.apath.clone(),
                            old_is_dir: p.kind.is_dir(),
                            new_is_dir: c.kind.is_dir(),
                        });
                    }
                }
                std::cmp::Ordering::Less => {
                    let p = prior_iter.next().unwrap();
                    out.push(DiffEntry::Missing {
                        apath: p.apath.clone(),
                        old_is_dir: p.kind.is_dir(),
                    });
                }
                std::cmp::Ordering::Greater => {
                    let c = current_iter.next().unwrap();
                    out.push(DiffEntry::Extra {
                        apath: c.apath.clone(),
                        new_is_dir: c.kind.is_dir(),
                    });
                }
            },
        }
    }
    out
}

fn entries_equal(a: &ManifestEntry, b: &ManifestEntry) -> bool {
    a.kind == b.kind
        && a.mode == b.mode
        && a.uid == b.uid
        && a.gid == b.gid
        && a.size == b.size
        && a.sha256digest == b.sha256digest
        && a.link == b.link
}

/// Drop the entry for the rootfs root itself: metadata changes on `/` must
/// never force a layer.
fn root_ignore(entries: Vec<DiffEntry>) -> Vec<DiffEntry> {
    entries
        .into_iter()
        .filter(|e| !e.apath().is_root())
        .collect()
}

/// If a directory and all of its direct and transitive children carry the
/// same change kind, collapse them to just the directory entry — the
/// children are redundant information for the archiver's purposes.
fn simplify(mut entries: Vec<DiffEntry>) -> Vec<DiffEntry> {
    entries.sort_by(|a, b| a.apath().as_str().cmp(b.apath().as_str()));
    let mut kept: Vec<DiffEntry> = Vec::with_capacity(entries.len());
    'outer: for entry in entries {
        if same_kind_as_last_dir(&kept, &entry) {
            continue 'outer;
        }
        kept.push(entry);
    }
    kept
}

fn same_kind_as_last_dir(kept: &[DiffEntry], entry: &DiffEntry) -> bool {
    // Find the nearest ancestor already retained that is itself a Same
    // (unchanged) directory; if it and this entry agree, this entry is
    // redundant. We only collapse the `Same` case: `Modified`/`Extra`/
    // `Missing` still need their own exclude/include decision per-path
    // because the archiver has no notion of "subtree changed".
    if !matches!(entry, DiffEntry::Same { .. }) {
        return false;
    }
    kept.iter().rev().any(|k| {
        matches!(k, DiffEntry::Same { is_dir: true, .. }) && entry.apath().starts_with(k.apath())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;

    fn dir(apath: &str) -> ManifestEntry {
        ManifestEntry {
            apath: Apath::from(apath),
            kind: EntryKind::Dir,
            mode: 0o755,
            uid: 0,
            gid: 0,
            size: None,
            sha256digest: None,
            link: None,
        }
    }

    fn file(apath: &str, digest: &str) -> ManifestEntry {
        ManifestEntry {
            apath: Apath::from(apath),
            kind: EntryKind::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            size: Some(3),
            sha256digest: Some(digest.to_string()),
            link: None,
        }
    }

    #[test]
    fn identical_manifests_produce_only_same() {
        let mut m = Manifest::new();
        m.insert(dir("/"));
        m.insert(dir("/etc"));
        m.insert(file("/etc/hosts", "aaa"));
        let diffs = diff_manifests(&m, &m.clone());
        assert!(diffs.iter().all(|e| matches!(e, DiffEntry::Same { .. })));
    }

    #[test]
    fn modified_file_under_unchanged_dir_is_isolated() {
        let mut prior = Manifest::new();
        prior.insert(dir("/"));
        prior.insert(dir("/usr"));
        prior.insert(dir("/usr/bin"));
        prior.insert(file("/usr/bin/ls", "old"));

        let mut current = Manifest::new();
        current.insert(dir("/"));
        current.insert(dir("/usr"));
        current.insert(dir("/usr/bin"));
        current.insert(file("/usr/bin/ls", "new"));

        let diffs = diff_manifests(&prior, &current);
        let modified: Vec<_> = diffs
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .collect();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].apath().as_str(), "/usr/bin/ls");
    }

    #[test]
    fn root_metadata_change_is_dropped() {
        let mut prior = Manifest::new();
        prior.insert(ManifestEntry { mode: 0o755, ..dir("/") });
        let mut current = Manifest::new();
        current.insert(ManifestEntry { mode: 0o700, ..dir("/") });
        let diffs = diff_manifests(&prior, &current);
        assert!(diffs.is_empty());
    }

    #[test]
    fn added_and_removed_are_extra_and_missing() {
        let mut prior = Manifest::new();
        prior.insert(dir("/"));
        prior.insert(file("/etc/hosts", "aaa"));

        let mut current = Manifest::new();
        current.insert(dir("/"));
        current.insert(file("/etc/hello", "bbb"));

        let diffs = diff_manifests(&prior, &current);
        assert!(diffs
            .iter()
            .any(|e| matches!(e, DiffEntry::Missing { apath, .. } if apath.as_str() == "/etc/hosts")));
        assert!(diffs
            .iter()
            .any(|e| matches!(e, DiffEntry::Extra { apath, .. } if apath.as_str() == "/etc/hello")));
    }

    #[test]
    fn unchanged_subtree_collapses_to_directory() {
        let mut m = Manifest::new();
        m.insert(dir("/"));
        m.insert(dir("/usr"));
        m.insert(file("/usr/a", "a"));
        m.insert(file("/usr/b", "b"));
        let diffs = diff_manifests(&m, &m.clone());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].apath().as_str(), "/usr");
    }
}
