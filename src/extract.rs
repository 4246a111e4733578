// Laminate layer builder.

//! `LayerExtractor`: unpack a squashfs layer blob into a storage backend's
//! working directory, dispatching on which backend is in play.

use std::path::Path;
use std::process::{Command, Stdio};

use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::tool::resolve_tool;

/// The storage backend a bundle's rootfs lives on. Only btrfs needs a
/// dedicated extraction tool: its snapshots are real files on disk, so
/// whiteouts, device nodes, sockets, and ownership all need to be
/// materialized faithfully. Other backends (e.g. overlay-based ones) use
/// the stock `unsquashfs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    Btrfs,
    Overlay,
}

const SQUASHTOOL_SOURCE_URL: &str = "https://github.com/facebookincubator/antlir";

pub struct LayerExtractor {
    backend: StorageBackend,
    unsquashfs: String,
    squashtool: String,
}

impl LayerExtractor {
    pub fn new(backend: StorageBackend) -> LayerExtractor {
        LayerExtractor {
            backend,
            unsquashfs: "unsquashfs".to_string(),
            squashtool: "squashtool".to_string(),
        }
    }

    pub fn with_tool_names(
        backend: StorageBackend,
        unsquashfs: impl Into<String>,
        squashtool: impl Into<String>,
    ) -> LayerExtractor {
        LayerExtractor {
            backend,
            unsquashfs: unsquashfs.into(),
            squashtool: squashtool.into(),
        }
    }

    /// Extract the squashfs blob at `file` into `dir`. `dir` is created by
    /// the underlying tool; on a hard error nothing is guaranteed to have
    /// been written there.
    pub fn extract(&self, file: &Path, dir: &Path) -> Result<()> {
        let span = tracing::info_span!("extract_layer", backend = %self.backend, file = %file.display(), dir = %dir.display());
        let _enter = span.enter();

        match self.backend {
            StorageBackend::Btrfs => self.extract_with_squashtool(file, dir),
            StorageBackend::Overlay => self.extract_with_unsquashfs(file, dir),
        }
    }

    fn extract_with_squashtool(&self, file: &Path, dir: &Path) -> Result<()> {
        let tool = resolve_tool(&self.squashtool).map_err(|_| {
            Error::tool_missing(
                self.squashtool.clone(),
                format!("install it from {SQUASHTOOL_SOURCE_URL} and ensure it is on PATH"),
            )
        })?;

        let mut command = Command::new(&tool);
        command
            .arg("extract")
            .arg("--whiteouts")
            .arg("--perms")
            .arg("--devs")
            .arg("--sockets")
            .arg("--owners")
            .arg(file)
            .arg(dir);
        run_extractor(&self.squashtool, command)
    }

    fn extract_with_unsquashfs(&self, file: &Path, dir: &Path) -> Result<()> {
        let tool = resolve_tool(&self.unsquashfs)?;
        let mut command = Command::new(&tool);
        command.arg("-f").arg("-d").arg(dir).arg(file);
        run_extractor(&self.unsquashfs, command)
    }
}

fn run_extractor(tool_name: &str, mut command: Command) -> Result<()> {
    command.stdout(Stdio::inherit()).stderr(Stdio::piped());
    tracing::debug!(?command, "invoking extractor");
    let output = command
        .output()
        .map_err(|e| Error::archiver(tool_name, e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(Error::archiver(tool_name, format!("extraction failed: {stderr}")));
    }
    Ok(())
}
