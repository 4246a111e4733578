// Laminate layer builder.

//! `LayerGenerator`: orchestrates the end-to-end layer build for one bundle.

use std::path::{Path, PathBuf};

use oci_spec::image::Descriptor;
use tempfile::TempDir;

use crate::bundle::BundleMeta;
use crate::diff::{diff_manifests, walk_rootfs, DiffEntry};
use crate::error::{Error, Result};
use crate::exclude::ExcludeSet;
use crate::manifest::{manifest_filename, Manifest};
use crate::squashfs::SquashfsBuilder;
use crate::store::ContentStore;
use crate::whiteout::WhiteoutEncoder;

/// Inputs shared by every layer generation run.
pub struct LayerGenerator<'a> {
    pub layer_name: String,
    pub bundle_path: PathBuf,
    pub store: &'a dyn ContentStore,
    pub squashfs: SquashfsBuilder,
}

/// What happened as a result of a [`LayerGenerator::generate`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// The rootfs was unchanged (after filtering); nothing was touched.
    NoChange,
    /// A new layer was added with this descriptor.
    LayerAdded { digest: String },
}

impl<'a> LayerGenerator<'a> {
    pub fn new(
        layer_name: impl Into<String>,
        bundle_path: impl Into<PathBuf>,
        store: &'a dyn ContentStore,
        squashfs: SquashfsBuilder,
    ) -> Self {
        LayerGenerator {
            layer_name: layer_name.into(),
            bundle_path: bundle_path.into(),
            store,
            squashfs,
        }
    }

    /// Run the full generation algorithm (spec §4.5) against
    /// `rootfs_path`, a directory that is a sibling of, or the same as,
    /// `bundle_path`'s own rootfs.
    pub fn generate(&self, rootfs_path: &Path) -> Result<GenerateOutcome> {
        let span = tracing::info_span!("generate_layer", bundle = %self.bundle_path.display(), layer = %self.layer_name);
        let _enter = span.enter();

        let mut meta = BundleMeta::read(&self.bundle_path)?;
        let prior_digest = meta.current_digest()?.to_string();
        let prior_manifest_path = self.bundle_path.join(manifest_filename(&prior_digest));
        let prior_manifest = Manifest::read(&prior_manifest_path)?;

        let current_manifest = walk_rootfs(rootfs_path, true)?;
        let diffs = diff_manifests(&prior_manifest, &current_manifest);

        let mut needs_layer = false;
        let mut excludes = ExcludeSet::new();
        let mut whiteouts = WhiteoutEncoder::new();

        let result = (|| -> Result<GenerateOutcome> {
            for entry in &diffs {
                match entry {
                    DiffEntry::Modified { apath, new_is_dir, .. } => {
                        needs_layer = true;
                        let host = apath.host_path(rootfs_path);
                        excludes.add_include(&host, *new_is_dir);
                    }
                    DiffEntry::Extra { apath, new_is_dir } => {
                        needs_layer = true;
                        let host = apath.host_path(rootfs_path);
                        excludes.add_include(&host, *new_is_dir);
                    }
                    DiffEntry::Missing { apath, old_is_dir } => {
                        needs_layer = true;
                        let host = apath.host_path(rootfs_path);
                        excludes.add_include(&host, *old_is_dir);
                        whiteouts.encode(&host, &mut excludes)?;
                    }
                    DiffEntry::Same { apath, .. } => {
                        let host = apath.host_path(rootfs_path);
                        excludes.add_exclude(&host);
                    }
                }
            }

            if !needs_layer {
                return Ok(GenerateOutcome::NoChange);
            }

            let tempdir = TempDir::new()?;
            let mut blob = self
                .squashfs
                .build(tempdir.path(), rootfs_path, Some(&excludes))?;

            let descriptor: Descriptor = self
                .store
                .add_blob_no_compression(&self.layer_name, &mut blob)?;

            let new_manifest = walk_rootfs(rootfs_path, true)?;
            let new_digest = descriptor.digest().to_string();
            let new_manifest_path = self.bundle_path.join(manifest_filename(&new_digest));
            new_manifest.write(&new_manifest_path)?;

            // Only remove the old manifest after the new one is durably on
            // disk: a crash between the two writes must leave at least one
            // valid manifest behind.
            let _ = std::fs::remove_file(&prior_manifest_path);

            meta.set_single_descriptor(&descriptor);
            meta.write(&self.bundle_path)?;

            tracing::info!(digest = %new_digest, "layer generated");
            Ok(GenerateOutcome::LayerAdded { digest: new_digest })
        })();

        whiteouts.drain_cleanup();
        result
    }
}
