// Laminate layer builder.
// Copyright 2026 Laminate Contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! `laminate`: incremental layer differ and squashfs-layer generator for a
//! container-image builder.
//!
//! Given a bundle whose rootfs has been mutated since its last recorded
//! manifest, [`layer::LayerGenerator`] computes what changed, materializes
//! whiteout markers for anything removed, and produces a new squashfs layer
//! blob covering only the delta. [`extract::LayerExtractor`] does the
//! reverse: unpacking a layer blob onto a storage backend's working
//! directory.

pub mod apath;
pub mod bundle;
pub mod config;
pub mod diff;
pub mod error;
pub mod exclude;
pub mod extract;
pub mod layer;
pub mod logging;
pub mod manifest;
pub mod squashfs;
pub mod store;
pub mod tool;
pub mod whiteout;

pub use apath::Apath;
pub use bundle::BundleMeta;
pub use config::LayerConfig;
pub use diff::{diff_manifests, walk_rootfs, DiffEntry};
pub use error::{Error, Result};
pub use exclude::ExcludeSet;
pub use extract::{LayerExtractor, StorageBackend};
pub use layer::{GenerateOutcome, LayerGenerator};
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use squashfs::{LayerBlob, SquashfsBuilder};
pub use store::{ContentStore, FsContentStore};
pub use whiteout::WhiteoutEncoder;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
