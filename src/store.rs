// Laminate layer builder.

//! The `ContentStore` interface the core consumes, plus a content-addressed
//! local-filesystem implementation usable in tests and small deployments.
//!
//! The core never assumes blobs live on the local filesystem: production
//! callers are expected to supply their own `ContentStore` backed by the
//! real OCI content store. `FsContentStore` exists so the rest of the core
//! (and its tests) has something concrete to drive.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Custom media type for an uncompressed squashfs layer. OCI doesn't define
/// one natively, so — as other squashfs-based builders do — we mint our
/// own rather than mislabeling it as a tar layer.
pub const SQUASHFS_LAYER_MEDIA_TYPE: &str = "application/vnd.laminate.image.layer.v1.squashfs";

/// The interface `LayerGenerator` needs from an OCI content store. The core
/// never computes digests itself: the store is the authority on the
/// descriptor it hands back.
pub trait ContentStore {
    /// Stream `reader` into the store under a human-readable `name` hint,
    /// without additional compression (squashfs output is already
    /// compressed), returning the descriptor the store assigned it.
    fn add_blob_no_compression(&self, name: &str, reader: &mut dyn Read) -> Result<Descriptor>;
}

/// A content-addressed store on the local filesystem, sharded by the first
/// three hex characters of the blob's sha256 digest.
pub struct FsContentStore {
    root: PathBuf,
}

const SUBDIR_NAME_CHARS: usize = 3;

impl FsContentStore {
    pub fn open(root: impl Into<PathBuf>) -> FsContentStore {
        FsContentStore { root: root.into() }
    }

    fn blob_path(&self, digest_hex: &str) -> PathBuf {
        self.root.join(&digest_hex[..SUBDIR_NAME_CHARS]).join(digest_hex)
    }

    pub fn read_blob(&self, digest_hex: &str) -> Result<fs::File> {
        fs::File::open(self.blob_path(digest_hex)).map_err(|e| Error::store(e.to_string()))
    }
}

impl ContentStore for FsContentStore {
    fn add_blob_no_compression(&self, _name: &str, reader: &mut dyn Read) -> Result<Descriptor> {
        fs::create_dir_all(&self.root).map_err(|e| Error::store(e.to_string()))?;
        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| Error::store(e.to_string()))?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| Error::store(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])
                .map_err(|e| Error::store(e.to_string()))?;
            size += n as u64;
        }
        let digest_hex = hex::encode(hasher.finalize());
        let dest = self.blob_path(&digest_hex);
        fs::create_dir_all(dest.parent().unwrap()).map_err(|e| Error::store(e.to_string()))?;
        tmp.persist(&dest)
            .map_err(|e| Error::store(e.error.to_string()))?;

        DescriptorBuilder::default()
            .media_type(MediaType::Other(SQUASHFS_LAYER_MEDIA_TYPE.to_string()))
            .digest(format!("sha256:{digest_hex}"))
            .size(size as i64)
            .build()
            .map_err(|e| Error::store(e.to_string()))
    }
}

/// Where a blob's host path would live within a bundle-owned layout; used by
/// tests that want to assert on the sharding scheme without going through
/// the trait object.
pub fn blob_subdir(digest_hex: &str) -> &str {
    &digest_hex[..SUBDIR_NAME_CHARS]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stores_blob_and_returns_sha256_descriptor() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::open(dir.path());
        let mut data: &[u8] = b"hello world";
        let descriptor = store.add_blob_no_compression("layer", &mut data).unwrap();
        assert_eq!(descriptor.size(), 11);
        assert!(descriptor.digest().starts_with("sha256:"));
        assert_eq!(
            descriptor.media_type(),
            &MediaType::Other(SQUASHFS_LAYER_MEDIA_TYPE.to_string())
        );
    }

    #[test]
    fn stored_blob_is_readable_back_by_digest() {
        let dir = tempdir().unwrap();
        let store = FsContentStore::open(dir.path());
        let mut data: &[u8] = b"payload";
        let descriptor = store.add_blob_no_compression("layer", &mut data).unwrap();
        let digest_hex = descriptor.digest().trim_start_matches("sha256:");
        let mut read_back = store.read_blob(digest_hex).unwrap();
        let mut contents = String::new();
        read_back.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "payload");
    }

    #[test]
    fn blob_subdir_is_hash_prefix() {
        assert_eq!(blob_subdir("abcdef1234"), "abc");
    }
}
