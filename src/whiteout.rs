// Laminate layer builder.

//! Materialize overlay-compatible deletion markers for `Missing` diff
//! entries, falling back to the AUFS sidecar convention when the process
//! lacks `CAP_MKNOD`.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::{mknod, Mode, SFlag};

use crate::error::{Error, Result};
use crate::exclude::ExcludeSet;

/// Tracks whiteout device nodes created so far, so they can be removed
/// again once the archiver has captured them. Sidecar files are
/// deliberately *not* tracked here: per the source behavior this encoder
/// mirrors, a `.wh.` sidecar is left behind after archiving.
#[derive(Debug, Default)]
pub struct WhiteoutEncoder {
    device_cleanup: Vec<PathBuf>,
}

impl WhiteoutEncoder {
    pub fn new() -> WhiteoutEncoder {
        WhiteoutEncoder::default()
    }

    /// Place a whiteout marker for the deleted entry at host path `p`,
    /// registering the corresponding include decision in `excludes` so the
    /// archiver captures it.
    ///
    /// - Device-node form is attempted first: a character device with
    ///   major/minor 0/0 at `p` itself.
    /// - `EACCES`/`EPERM` (unprivileged mode) falls back to an empty regular
    ///   file `parent(p)/.wh.<basename(p)>`.
    /// - `ENOENT`/`ENOTDIR` means an ancestor of `p` was already removed
    ///   higher in the tree (the simplify filter didn't collapse it away);
    ///   this is silently skipped, since that ancestor's own marker already
    ///   covers the deletion.
    /// - Any other error is fatal.
    pub fn encode(&mut self, p: &Path, excludes: &mut ExcludeSet) -> Result<()> {
        match mknod(p, SFlag::S_IFCHR, Mode::empty(), 0) {
            Ok(()) => {
                tracing::debug!(path = %p.display(), "created device-node whiteout");
                self.device_cleanup.push(p.to_path_buf());
                excludes.add_include(p, false);
                Ok(())
            }
            Err(Errno::EACCES) | Err(Errno::EPERM) => {
                let sidecar = sidecar_path(p)?;
                tracing::debug!(
                    path = %p.display(),
                    sidecar = %sidecar.display(),
                    "mknod not permitted, falling back to sidecar whiteout"
                );
                std::fs::File::create(&sidecar)
                    .map_err(|e| Error::whiteout(&sidecar, e.to_string()))?;
                excludes.add_include(&sidecar, false);
                Ok(())
            }
            Err(Errno::ENOENT) | Err(Errno::ENOTDIR) => {
                tracing::debug!(
                    path = %p.display(),
                    "ancestor already removed; skipping redundant whiteout"
                );
                Ok(())
            }
            Err(e) => Err(Error::whiteout(p, e.to_string())),
        }
    }

    /// Remove every device-node marker created by `encode`, in LIFO order.
    /// Errors are logged, not propagated: cleanup runs on every exit path,
    /// including after a primary error, and must not mask it.
    pub fn drain_cleanup(&mut self) {
        while let Some(p) = self.device_cleanup.pop() {
            if let Err(e) = std::fs::remove_file(&p) {
                tracing::warn!(path = %p.display(), error = %e, "failed to remove whiteout device node");
            }
        }
    }
}

impl Drop for WhiteoutEncoder {
    fn drop(&mut self) {
        if !self.device_cleanup.is_empty() {
            self.drain_cleanup();
        }
    }
}

fn sidecar_path(p: &Path) -> Result<PathBuf> {
    let parent = p
        .parent()
        .ok_or_else(|| Error::whiteout(p, "path has no parent"))?;
    let basename = p
        .file_name()
        .ok_or_else(|| Error::whiteout(p, "path has no file name"))?;
    let mut name = std::ffi::OsString::from(".wh.");
    name.push(basename);
    Ok(parent.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sidecar_path_is_dot_wh_prefixed() {
        let p = Path::new("/etc/hosts");
        assert_eq!(sidecar_path(p).unwrap(), Path::new("/etc/.wh.hosts"));
    }

    #[test]
    fn enoent_ancestor_already_removed_is_skipped() {
        let dir = tempdir().unwrap();
        let missing_parent = dir.path().join("gone/deeper/file");
        let mut excludes = ExcludeSet::new();
        let mut encoder = WhiteoutEncoder::new();
        // Neither "gone" nor "gone/deeper" exist, so mknod fails ENOENT.
        encoder.encode(&missing_parent, &mut excludes).unwrap();
        assert!(excludes.include_paths().next().is_none());
    }

    #[test]
    fn unprivileged_fallback_creates_sidecar_when_mknod_denied() {
        // We can't force EACCES deterministically without root/non-root
        // split test infra, so this test instead exercises the sidecar
        // helper used by that path directly for the S4 scenario's shape.
        let dir = tempdir().unwrap();
        let target = dir.path().join("etc/hosts");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        let sidecar = sidecar_path(&target).unwrap();
        std::fs::File::create(&sidecar).unwrap();
        assert!(sidecar.exists());
        assert_eq!(sidecar.file_name().unwrap(), ".wh.hosts");
    }
}
