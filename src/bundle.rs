// Laminate layer builder.

//! Bundle metadata: the descriptor chain that produced a bundle's rootfs,
//! and the manifest filename derived from its tip.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use oci_spec::image::Descriptor;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

const BUNDLE_META_FILENAME: &str = "bundle.json";

/// The descriptor chain that produced a bundle, and anything else the
/// enclosing builder persists alongside it. The core only reads and
/// rewrites the `from` chain; everything else round-trips untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BundleMeta {
    pub from: FromChain,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FromChain {
    #[serde(rename = "Walk")]
    pub walk: Vec<DescriptorRecord>,
}

/// A serializable mirror of [`oci_spec::image::Descriptor`]'s fields that we
/// actually persist; round-tripping the whole `oci_spec` type through serde
/// works too, but this keeps the bundle file stable if that crate adds
/// fields we don't care about.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DescriptorRecord {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

impl DescriptorRecord {
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl From<&Descriptor> for DescriptorRecord {
    fn from(d: &Descriptor) -> Self {
        DescriptorRecord {
            media_type: d.media_type().to_string(),
            digest: d.digest().to_string(),
            size: d.size() as u64,
        }
    }
}

impl BundleMeta {
    pub fn read(bundle_path: &Path) -> Result<BundleMeta> {
        let path = bundle_path.join(BUNDLE_META_FILENAME);
        let text = fs::read_to_string(&path).map_err(|e| Error::input(format!("reading {path:?}: {e}")))?;
        serde_json::from_str(&text).map_err(|e| Error::input(format!("parsing {path:?}: {e}")))
    }

    pub fn write(&self, bundle_path: &Path) -> Result<()> {
        let path = bundle_path.join(BUNDLE_META_FILENAME);
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::input(format!("serializing bundle meta: {e}")))?;
        atomic_write(&path, text.as_bytes())
    }

    /// The digest of the descriptor chain's tip, i.e. the manifest that
    /// describes the bundle's current rootfs state.
    pub fn current_digest(&self) -> Result<&str> {
        self.from
            .walk
            .last()
            .map(|d| d.digest())
            .ok_or_else(|| Error::input("bundle has an empty descriptor chain"))
    }

    /// Replace the descriptor chain with a single new descriptor, as
    /// required after generating a layer (spec: `meta.from.Walk` becomes a
    /// one-element sequence holding the new descriptor).
    pub fn set_single_descriptor(&mut self, descriptor: &Descriptor) {
        self.from.walk = vec![DescriptorRecord::from(descriptor)];
    }
}

/// Write `contents` to `path` by writing to a sibling temp file and
/// renaming it into place, so a crash mid-write never leaves `path`
/// truncated or partially written.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::input(format!("{path:?} has no parent directory")))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_descriptor() -> Descriptor {
        oci_spec::image::DescriptorBuilder::default()
            .media_type(oci_spec::image::MediaType::Other(
                "application/vnd.laminate.image.layer.v1.squashfs".to_string(),
            ))
            .digest("sha256:deadbeef")
            .size(42i64)
            .build()
            .unwrap()
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempdir().unwrap();
        let mut meta = BundleMeta::default();
        meta.set_single_descriptor(&sample_descriptor());
        meta.write(dir.path()).unwrap();
        let read_back = BundleMeta::read(dir.path()).unwrap();
        assert_eq!(read_back.current_digest().unwrap(), "sha256:deadbeef");
    }

    #[test]
    fn empty_chain_is_input_error() {
        let meta = BundleMeta::default();
        assert!(meta.current_digest().is_err());
    }

    #[test]
    fn set_single_descriptor_replaces_whole_chain() {
        let mut meta = BundleMeta::default();
        meta.from.walk.push(DescriptorRecord {
            media_type: "application/vnd.laminate.image.layer.v1.squashfs".to_string(),
            digest: "sha256:old".to_string(),
            size: 1,
        });
        meta.from.walk.push(DescriptorRecord {
            media_type: "application/vnd.laminate.image.layer.v1.squashfs".to_string(),
            digest: "sha256:older".to_string(),
            size: 1,
        });
        meta.set_single_descriptor(&sample_descriptor());
        assert_eq!(meta.from.walk.len(), 1);
        assert_eq!(meta.current_digest().unwrap(), "sha256:deadbeef");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        atomic_write(&path, b"hello").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }
}
