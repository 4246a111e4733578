// Laminate layer builder.

//! Drive the external `mksquashfs` archiver to turn a rootfs and an
//! exclusion list into a squashfs blob.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::{NamedTempFile, TempDir};

use crate::error::{Error, Result};
use crate::exclude::ExcludeSet;
use crate::tool::resolve_tool;

/// A readable, seekable handle to a squashfs blob whose directory entry has
/// already been unlinked: the file remains readable through this handle
/// (the kernel keeps the backing inode alive) but is invisible on disk, so
/// no caller-side cleanup step is needed once this handle is dropped.
pub struct LayerBlob {
    file: File,
}

impl LayerBlob {
    pub fn into_file(self) -> File {
        self.file
    }
}

impl std::io::Read for LayerBlob {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl std::io::Seek for LayerBlob {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Builds squashfs blobs by invoking an external `mksquashfs` binary.
pub struct SquashfsBuilder {
    mksquashfs: String,
}

impl SquashfsBuilder {
    pub fn new(mksquashfs: impl Into<String>) -> SquashfsBuilder {
        SquashfsBuilder {
            mksquashfs: mksquashfs.into(),
        }
    }

    /// Build a squashfs blob for `rootfs_path`, excluding the paths in
    /// `excludes` (if any), inside `tempdir`.
    pub fn build(
        &self,
        tempdir: &Path,
        rootfs_path: &Path,
        excludes: Option<&ExcludeSet>,
    ) -> Result<LayerBlob> {
        let tool = resolve_tool(&self.mksquashfs)?;

        let exclude_file = match excludes {
            Some(set) if !set.render().trim().is_empty() => {
                let mut f = NamedTempFile::new_in(tempdir)?;
                f.write_all(set.render().as_bytes())?;
                f.flush()?;
                Some(f)
            }
            _ => None,
        };

        // mksquashfs refuses to overwrite an existing output file, so we
        // create-then-remove to reserve a fresh name, then let it create
        // the real file.
        let output = NamedTempFile::new_in(tempdir)?;
        let output_path = output.path().to_path_buf();
        output
            .close()
            .map_err(|e| Error::archiver(&self.mksquashfs, e.to_string()))?;

        let mut command = Command::new(&tool);
        command.arg(rootfs_path).arg(&output_path);
        if let Some(ef) = &exclude_file {
            command.arg("-ef").arg(ef.path());
        }
        command.stdout(Stdio::inherit()).stderr(Stdio::piped());

        tracing::debug!(?command, "invoking mksquashfs");
        let output_result = command
            .output()
            .map_err(|e| Error::archiver(&self.mksquashfs, e.to_string()))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr).into_owned();
            tracing::warn!(stderr = %stderr, "mksquashfs exited non-zero");
            let _ = std::fs::remove_file(&output_path);
            return Err(Error::archiver(
                &self.mksquashfs,
                format!("couldn't build squashfs: {stderr}"),
            ));
        }

        let file = File::open(&output_path)?;
        // Unlink immediately: the open file descriptor keeps the data
        // readable, but the temp name disappears from the directory so the
        // caller doesn't need its own deferred-removal bookkeeping.
        std::fs::remove_file(&output_path)?;
        Ok(LayerBlob { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use tempfile::tempdir;

    /// `PATH` is process-global, so tests that mutate it must not run
    /// concurrently with each other.
    fn path_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Write a fake `mksquashfs` shell script into `dir` and return its
    /// path, prepending `dir` to `PATH` for the duration of the returned
    /// guard.
    fn fake_mksquashfs(dir: &Path, body: &str) {
        let path = dir.join("mksquashfs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    struct PathGuard {
        old: String,
        _lock: MutexGuard<'static, ()>,
    }
    impl PathGuard {
        fn prepend(dir: &Path) -> PathGuard {
            let lock = path_lock().lock().unwrap();
            let old = std::env::var("PATH").unwrap_or_default();
            std::env::set_var("PATH", format!("{}:{}", dir.display(), old));
            PathGuard { old, _lock: lock }
        }
    }
    impl Drop for PathGuard {
        fn drop(&mut self) {
            std::env::set_var("PATH", &self.old);
        }
    }

    #[test]
    fn successful_build_returns_readable_unlinked_blob() {
        let tool_dir = tempdir().unwrap();
        // $2 is the output path mksquashfs is expected to create.
        fake_mksquashfs(tool_dir.path(), "echo payload > \"$2\"");
        let _guard = PathGuard::prepend(tool_dir.path());

        let work = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let builder = SquashfsBuilder::new("mksquashfs");
        let mut blob = builder.build(work.path(), rootfs.path(), None).unwrap();

        let mut contents = String::new();
        std::io::Read::read_to_string(&mut blob, &mut contents).unwrap();
        assert_eq!(contents, "payload\n");
    }

    #[test]
    fn nonzero_exit_surfaces_stderr() {
        let tool_dir = tempdir().unwrap();
        fake_mksquashfs(tool_dir.path(), "echo boom >&2; exit 3");
        let _guard = PathGuard::prepend(tool_dir.path());

        let work = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let builder = SquashfsBuilder::new("mksquashfs");
        let err = builder.build(work.path(), rootfs.path(), None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
    }

    #[test]
    fn missing_tool_is_reported() {
        let work = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let builder = SquashfsBuilder::new("definitely-not-a-real-mksquashfs-binary");
        let err = builder.build(work.path(), rootfs.path(), None).unwrap_err();
        assert_matches::assert_matches!(err, Error::ToolMissing { .. });
    }
}
