// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::{
    cli::{status, warning},
    config::PipelineConfig,
    format::axml::AxmlDocument,
    patch::manifest::{AppMetadata, ManifestPatcher, TestOnlyStrategy},
};

#[derive(Debug, Args)]
pub struct MetadataGroup {
    /// Application label.
    #[arg(long, value_name = "LABEL")]
    pub name: Option<String>,

    /// Package name.
    #[arg(long, value_name = "PACKAGE")]
    pub package: Option<String>,

    /// User-visible version string.
    #[arg(long, value_name = "VERSION")]
    pub version_name: Option<String>,

    /// Integer version code.
    #[arg(long, value_name = "CODE")]
    pub version_code: Option<u32>,

    /// Permission to request. Can be specified multiple times.
    #[arg(long, value_name = "PERMISSION")]
    pub permission: Vec<String>,

    /// Permission request to remove. Can be specified multiple times.
    #[arg(long, value_name = "PERMISSION")]
    pub remove_permission: Vec<String>,
}

impl MetadataGroup {
    pub fn to_metadata(&self) -> AppMetadata {
        AppMetadata {
            label: self.name.clone(),
            package: self.package.clone(),
            version_code: self.version_code,
            version_name: self.version_name.clone(),
            permissions: self.permission.clone(),
            removed_permissions: self.remove_permission.clone(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("Failed to load config: {p:?}")),
        None => Ok(PipelineConfig::default()),
    }
}

fn dump_subcommand(cli: &DumpCli) -> Result<()> {
    let data = fs::read(&cli.input).with_context(|| format!("Failed to read: {:?}", cli.input))?;
    let doc = AxmlDocument::parse(&data)
        .with_context(|| format!("Failed to parse binary XML: {:?}", cli.input))?;

    if cli.strings {
        for (i, s) in doc.pool.strings().iter().enumerate() {
            println!("{i:>5}: {s:?}");
        }
    } else {
        print!("{doc}");
    }

    Ok(())
}

fn patch_subcommand(cli: &PatchCli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let metadata = cli.metadata.to_metadata();

    let data = fs::read(&cli.input).with_context(|| format!("Failed to read: {:?}", cli.input))?;

    let patcher = ManifestPatcher {
        metadata: &metadata,
        test_only: cli.test_only_strategy.unwrap_or(config.test_only_strategy),
        placeholder_package: &config.placeholder_package,
        provider_suffixes: &config.provider_suffixes,
    };
    let patched = patcher
        .patch(&data)
        .with_context(|| format!("Failed to patch manifest: {:?}", cli.input))?;

    fs::write(&cli.output, &patched.data)
        .with_context(|| format!("Failed to write: {:?}", cli.output))?;

    if patched.test_only_markers == 0 {
        warning!("No test-only marker found");
    }
    if let (Some(old), Some(new)) = (&patched.old_package, &patched.new_package) {
        if old != new {
            status!(
                "Package changed from {old} to {new} ({} strings remapped)",
                patched.remapped_strings,
            );
        }
    }
    status!("Patched manifest written to {:?}", cli.output);

    Ok(())
}

pub fn manifest_main(cli: &ManifestCli) -> Result<()> {
    match &cli.command {
        ManifestCommand::Dump(c) => dump_subcommand(c),
        ManifestCommand::Patch(c) => patch_subcommand(c),
    }
}

/// Print the contents of a binary XML file.
#[derive(Debug, Parser)]
struct DumpCli {
    /// Path to binary XML file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Print the string pool instead of the element tree.
    #[arg(long)]
    strings: bool,
}

/// Apply application metadata to a standalone binary XML manifest.
#[derive(Debug, Parser)]
struct PatchCli {
    /// Path to input binary XML manifest.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output binary XML manifest.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Pipeline config file.
    #[arg(long, value_name = "FILE", value_parser)]
    config: Option<PathBuf>,

    /// How to neutralize the test-only marker. Overrides the config.
    #[arg(long, value_name = "STRATEGY")]
    test_only_strategy: Option<TestOnlyStrategy>,

    #[command(flatten)]
    metadata: MetadataGroup,
}

#[derive(Debug, Subcommand)]
enum ManifestCommand {
    Dump(DumpCli),
    Patch(PatchCli),
}

/// Inspect and patch binary XML manifests.
#[derive(Debug, Parser)]
pub struct ManifestCli {
    #[command(subcommand)]
    command: ManifestCommand,
}
