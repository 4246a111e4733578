// Laminate layer builder.

//! The on-disk filesystem manifest: a flat, sorted list of entries keyed by
//! apath, each carrying the keyword set needed to detect changes (`type`,
//! `mode`, `uid`, `gid`, `size`, `sha256digest`, `link`).
//!
//! The format is a simple mtree-like text format: one entry per line, a
//! leading `#mtree` marker line, and `key=value` keywords separated by
//! spaces. It is not intended to be a byte-compatible implementation of BSD
//! mtree, only to carry the keyword set this differ needs in a format that
//! is easy to read, diff, and hand-inspect.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::apath::Apath;
use crate::error::{Error, Result};

const HEADER: &str = "#mtree";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// An overlay-convention whiteout marker: a character device with
    /// major/minor 0/0.
    CharDevice,
}

impl EntryKind {
    fn as_keyword(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "link",
            EntryKind::CharDevice => "chardev",
        }
    }

    fn from_keyword(s: &str) -> Result<EntryKind> {
        match s {
            "file" => Ok(EntryKind::File),
            "dir" => Ok(EntryKind::Dir),
            "link" => Ok(EntryKind::Symlink),
            "chardev" => Ok(EntryKind::CharDevice),
            other => Err(Error::input(format!("unknown manifest entry type {other:?}"))),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Dir)
    }
}

/// One entry in a filesystem manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestEntry {
    pub apath: Apath,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Regular files only.
    pub size: Option<u64>,
    /// Regular files only; hex-encoded sha256 of the file contents.
    pub sha256digest: Option<String>,
    /// Symlinks only.
    pub link: Option<String>,
}

impl ManifestEntry {
    fn render(&self) -> String {
        let mut out = String::new();
        write!(
            out,
            "{} type={} mode={:o} uid={} gid={}",
            self.apath,
            self.kind.as_keyword(),
            self.mode,
            self.uid,
            self.gid,
        )
        .unwrap();
        if let Some(size) = self.size {
            write!(out, " size={size}").unwrap();
        }
        if let Some(digest) = &self.sha256digest {
            write!(out, " sha256digest={digest}").unwrap();
        }
        if let Some(link) = &self.link {
            write!(out, " link={link}").unwrap();
        }
        out
    }

    fn parse(line: &str) -> Result<ManifestEntry> {
        let mut parts = line.split(' ');
        let apath_str = parts
            .next()
            .ok_or_else(|| Error::input("empty manifest line"))?;
        if !Apath::is_valid(apath_str) {
            return Err(Error::input(format!("invalid apath in manifest: {apath_str:?}")));
        }
        let mut kind = None;
        let mut mode = None;
        let mut uid = 0u32;
        let mut gid = 0u32;
        let mut size = None;
        let mut sha256digest = None;
        let mut link = None;
        for kw in parts {
            let (key, value) = kw
                .split_once('=')
                .ok_or_else(|| Error::input(format!("malformed keyword {kw:?}")))?;
            match key {
                "type" => kind = Some(EntryKind::from_keyword(value)?),
                "mode" => {
                    mode = Some(
                        u32::from_str_radix(value, 8)
                            .map_err(|e| Error::input(format!("bad mode {value:?}: {e}")))?,
                    )
                }
                "uid" => uid = value.parse().unwrap_or(0),
                "gid" => gid = value.parse().unwrap_or(0),
                "size" => size = value.parse().ok(),
                "sha256digest" => sha256digest = Some(value.to_string()),
                "link" => link = Some(value.to_string()),
                _ => {} // forward-compatible: ignore unknown keywords
            }
        }
        Ok(ManifestEntry {
            apath: Apath::from(apath_str),
            kind: kind.ok_or_else(|| Error::input(format!("missing type keyword on {line:?}")))?,
            mode: mode.unwrap_or(0),
            uid,
            gid,
            size,
            sha256digest,
            link,
        })
    }
}

/// A parsed filesystem manifest: entries keyed and ordered by apath.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    entries: BTreeMap<Apath, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Manifest {
        Manifest::default()
    }

    pub fn insert(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.apath.clone(), entry);
    }

    pub fn get(&self, apath: &Apath) -> Option<&ManifestEntry> {
        self.entries.get(apath)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        for entry in self.entries.values() {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Manifest> {
        let mut manifest = Manifest::new();
        for line in text.lines() {
            if line.is_empty() || line == HEADER || line.starts_with('#') {
                continue;
            }
            manifest.insert(ManifestEntry::parse(line)?);
        }
        Ok(manifest)
    }

    pub fn read(path: &Path) -> Result<Manifest> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::input(format!("missing prior manifest {path:?}: {e}"))
            } else {
                Error::walk(path, e)
            }
        })?;
        Manifest::parse(&text)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        crate::bundle::atomic_write(path, self.render().as_bytes())
    }
}

/// Compute the sha256 digest of a readable's full contents, hex-encoded.
pub fn sha256_hex(reader: &mut dyn Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The manifest filename derived from a descriptor's digest:
/// `<digest_with_colon_replaced_by_underscore>.mtree`.
pub fn manifest_filename(digest: &str) -> String {
    format!("{}.mtree", digest.replace(':', "_"))
}
