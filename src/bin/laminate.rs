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

//! Command-line entry point for the layer differ and squashfs generator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use laminate::bundle::BundleMeta;
use laminate::manifest::{manifest_filename, Manifest};
use laminate::{
    DiffEntry, FsContentStore, LayerConfig, LayerExtractor, LayerGenerator, SquashfsBuilder,
    StorageBackend,
};

#[derive(Debug, Parser)]
#[clap(
    name = "laminate",
    about = "Incremental rootfs differ and squashfs layer generator <https://github.com/laminate-build/laminate/>",
    author,
    version
)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Emit structured JSON logs instead of plain text.
    #[clap(long, global = true)]
    json_logs: bool,

    /// Set the log level (error, warn, info, debug, trace).
    #[clap(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute what changed in a bundle's rootfs and, if anything did,
    /// generate and store a new squashfs layer.
    Generate {
        /// Path to the bundle directory (holds bundle.json and manifests).
        bundle: PathBuf,
        /// Path to the bundle's rootfs, if different from `bundle/rootfs`.
        #[clap(long)]
        rootfs: Option<PathBuf>,
        /// Content store directory to write the layer blob into.
        #[clap(long)]
        store: PathBuf,
        /// A human-readable name for the layer blob, used as a hint only.
        #[clap(long, default_value = "layer")]
        name: String,
    },
    /// Show what diff_manifests would report for a bundle without
    /// generating a layer.
    Diff {
        bundle: PathBuf,
        #[clap(long)]
        rootfs: Option<PathBuf>,
    },
    /// Unpack a squashfs layer blob into a storage backend's directory.
    Extract {
        /// Which storage backend's conventions to extract with.
        #[clap(value_enum)]
        backend: CliBackend,
        /// Path to the squashfs blob.
        file: PathBuf,
        /// Destination directory.
        dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliBackend {
    Btrfs,
    Overlay,
}

impl From<CliBackend> for StorageBackend {
    fn from(b: CliBackend) -> StorageBackend {
        match b {
            CliBackend::Btrfs => StorageBackend::Btrfs,
            CliBackend::Overlay => StorageBackend::Overlay,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    laminate::logging::init(&args.log_level, args.json_logs);

    let result = match args.command {
        Command::Generate {
            bundle,
            rootfs,
            store,
            name,
        } => run_generate(&bundle, rootfs.as_deref(), &store, &name),
        Command::Diff { bundle, rootfs } => run_diff(&bundle, rootfs.as_deref()),
        Command::Extract { backend, file, dir } => run_extract(backend.into(), &file, &dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "laminate failed");
            ExitCode::FAILURE
        }
    }
}

fn rootfs_path(bundle: &std::path::Path, rootfs: Option<&std::path::Path>) -> PathBuf {
    rootfs.map(PathBuf::from).unwrap_or_else(|| bundle.join("rootfs"))
}

fn run_generate(
    bundle: &std::path::Path,
    rootfs: Option<&std::path::Path>,
    store_dir: &std::path::Path,
    name: &str,
) -> laminate::Result<()> {
    let config = LayerConfig::default();
    let store = FsContentStore::open(store_dir);
    let generator = LayerGenerator::new(
        name,
        bundle,
        &store,
        SquashfsBuilder::new(config.mksquashfs.clone()),
    );
    match generator.generate(&rootfs_path(bundle, rootfs))? {
        laminate::GenerateOutcome::NoChange => println!("no changes; no layer generated"),
        laminate::GenerateOutcome::LayerAdded { digest } => println!("generated layer {digest}"),
    }
    Ok(())
}

fn run_diff(bundle: &std::path::Path, rootfs: Option<&std::path::Path>) -> laminate::Result<()> {
    let meta = BundleMeta::read(bundle)?;
    let prior_path = bundle.join(manifest_filename(meta.current_digest()?));
    let prior = Manifest::read(&prior_path)?;
    let current = laminate::walk_rootfs(&rootfs_path(bundle, rootfs), true)?;
    let diffs = laminate::diff_manifests(&prior, &current);

    for entry in itertools::sorted(
        diffs
            .iter()
            .filter(|e| !matches!(e, DiffEntry::Same { .. }))
            .map(|e| describe_entry(e, &prior, &current)),
    ) {
        println!("{entry}");
    }
    Ok(())
}

/// One line of human-readable diff output: a change tag, the owning mode
/// (rendered the way `ls -l` would show it) and owner, and the path.
fn describe_entry(entry: &DiffEntry, prior: &Manifest, current: &Manifest) -> String {
    let tag = match entry {
        DiffEntry::Modified { .. } => "M",
        DiffEntry::Extra { .. } => "+",
        DiffEntry::Missing { .. } => "-",
        DiffEntry::Same { .. } => " ",
    };
    let reference = match entry {
        DiffEntry::Missing { .. } => prior.get(entry.apath()),
        _ => current.get(entry.apath()),
    };
    let mode_and_owner = reference
        .map(|e| format!("{} {}", unix_mode::to_string(e.mode), owner_name(e.uid)))
        .unwrap_or_default();
    format!("{tag} {mode_and_owner} {}", entry.apath())
}

#[cfg(unix)]
fn owner_name(uid: u32) -> String {
    uzers::get_user_by_uid(uid)
        .map(|u| u.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| uid.to_string())
}

#[cfg(not(unix))]
fn owner_name(uid: u32) -> String {
    uid.to_string()
}

fn run_extract(
    backend: StorageBackend,
    file: &std::path::Path,
    dir: &std::path::Path,
) -> laminate::Result<()> {
    LayerExtractor::new(backend).extract(file, dir)
}
