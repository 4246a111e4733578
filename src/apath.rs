// Laminate layer builder.

//! "Apaths" (archive paths): absolute, normalized, UTF-8 POSIX paths used to
//! index manifest entries and diff results.
//!
//! Apaths are:
//!
//!  * Case-sensitive.
//!  * Components separated by `/`.
//!  * Rooted at `/`, which is represented by the string `"/"` itself.
//!  * Free of `.`, `..`, and empty components (other than the root).
//!
//! There is a total ordering on apaths such that all the direct children of
//! a directory sort before its subdirectories, matching the order entries
//! are visited during a top-down walk.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// A rootfs-relative path, always starting with `/`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Apath(String);

impl Apath {
    pub const ROOT: &'static str = "/";

    /// Build an apath from a string, without validating it. Callers that
    /// accept untrusted input should call [`Apath::is_valid`] first.
    pub fn new(s: impl Into<String>) -> Apath {
        Apath(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// True if this apath is well-formed: rooted, no `.`/`..` components, no
    /// repeated or trailing slashes (other than the root itself), and no
    /// embedded NUL bytes.
    pub fn is_valid(s: &str) -> bool {
        if s == Self::ROOT {
            return true;
        }
        if !s.starts_with('/') {
            return false;
        }
        for part in s[1..].split('/') {
            if part.is_empty() || part == "." || part == ".." || part.contains('\0') {
                return false;
            }
        }
        true
    }

    /// The parent directory's apath, or `None` if this is the root.
    pub fn parent(&self) -> Option<Apath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Apath::new("/")),
            Some(i) => Some(Apath::new(self.0[..i].to_string())),
            None => None,
        }
    }

    /// Join this rootfs-relative apath onto a host rootfs path, producing an
    /// absolute host path.
    pub fn host_path(&self, rootfs_path: &Path) -> PathBuf {
        if self.is_root() {
            rootfs_path.to_path_buf()
        } else {
            rootfs_path.join(&self.0[1..])
        }
    }

    /// True if `maybe_ancestor` is a prefix of `self` in the directory
    /// hierarchy sense: either equal, or followed by a `/` boundary.
    pub fn starts_with(&self, maybe_ancestor: &Apath) -> bool {
        if maybe_ancestor.is_root() {
            return true;
        }
        let a = maybe_ancestor.as_str();
        let s = self.as_str();
        s == a || (s.starts_with(a) && s.as_bytes().get(a.len()) == Some(&b'/'))
    }
}

impl From<&str> for Apath {
    fn from(s: &str) -> Apath {
        Apath::new(s.to_string())
    }
}

impl From<String> for Apath {
    fn from(s: String) -> Apath {
        Apath::new(s)
    }
}

impl fmt::Display for Apath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Apath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compare two apath strings such that all direct children of a directory
/// sort before any of its subdirectories' contents.
pub fn apath_cmp(a: &str, b: &str) -> Ordering {
    let mut ait = a.split('/').peekable();
    let mut bit = b.split('/').peekable();
    loop {
        match (ait.next(), bit.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ac), Some(bc)) => match (ait.peek().is_none(), bit.peek().is_none()) {
                (true, true) => return ac.cmp(bc),
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                (false, false) => match ac.cmp(bc) {
                    Ordering::Equal => continue,
                    o => return o,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_apaths() {
        for v in ["/", "/a", "/a/b", "/a/.config", "/a/...", "/kleine Katze Fuß"] {
            assert!(Apath::is_valid(v), "{v:?} should be valid");
        }
    }

    #[test]
    fn invalid_apaths() {
        for v in ["", "a", "/a/", "/a//b", "/./a", "/../a", "/a/.", "/a/.."] {
            assert!(!Apath::is_valid(v), "{v:?} should be invalid");
        }
    }

    #[test]
    fn parent_of_root_is_none() {
        assert_eq!(Apath::from("/").parent(), None);
    }

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(Apath::from("/etc").parent(), Some(Apath::from("/")));
    }

    #[test]
    fn parent_of_nested() {
        assert_eq!(
            Apath::from("/usr/bin/ls").parent(),
            Some(Apath::from("/usr/bin"))
        );
    }

    #[test]
    fn host_path_join() {
        let root = Path::new("/tmp/bundle/rootfs");
        assert_eq!(Apath::from("/").host_path(root), root);
        assert_eq!(
            Apath::from("/etc/hosts").host_path(root),
            root.join("etc/hosts")
        );
    }

    #[test]
    fn direct_children_sort_before_subdirectories() {
        let mut v = vec!["/usr/bin", "/usr/bin/ls", "/usr", "/usr/local"];
        v.sort_by(|a, b| apath_cmp(a, b));
        assert_eq!(v, vec!["/usr", "/usr/bin", "/usr/local", "/usr/bin/ls"]);
    }

    #[test]
    fn starts_with_respects_boundaries() {
        assert!(Apath::from("/usr/bin").starts_with(&Apath::from("/usr")));
        assert!(!Apath::from("/usrbin").starts_with(&Apath::from("/usr")));
        assert!(Apath::from("/usr").starts_with(&Apath::from("/usr")));
        assert!(Apath::from("/etc").starts_with(&Apath::from("/")));
    }
}
