// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::{cli::status, config::PipelineConfig, patch::align, util};

pub fn align_main(cli: &AlignCli, cancel_signal: &AtomicBool) -> Result<()> {
    let reader = File::open(&cli.input)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;

    if cli.check {
        let count = align::verify_alignment(reader)
            .with_context(|| format!("Alignment check failed: {:?}", cli.input))?;

        status!("All {count} stored entries are aligned");

        return Ok(());
    }

    let Some(output) = &cli.output else {
        bail!("--output is required unless --check is specified");
    };

    let resource_table = match &cli.resource_table {
        Some(name) => name.clone(),
        None => PipelineConfig::default().resource_table,
    };

    let temp_file = util::output_temp_file(output)
        .with_context(|| format!("Failed to create temporary file for: {output:?}"))?;

    let layout = {
        let mut writer = BufWriter::new(temp_file.as_file());

        let layout = align::align_archive(reader, &mut writer, &resource_table, cancel_signal)
            .with_context(|| format!("Failed to align archive: {:?}", cli.input))?;

        writer
            .flush()
            .with_context(|| format!("Failed to flush output: {output:?}"))?;

        layout
    };

    util::persist_output(temp_file, output)
        .with_context(|| format!("Failed to write: {output:?}"))?;

    status!("Aligned {} entries into {output:?}", layout.entry_count);

    Ok(())
}

/// Align stored entries to 4-byte boundaries.
///
/// The resource table is always stored uncompressed. Compressed entries are
/// copied as-is.
#[derive(Debug, Parser)]
pub struct AlignCli {
    /// Path to input archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output archive.
    #[arg(
        short,
        long,
        value_name = "FILE",
        value_parser,
        required_unless_present = "check"
    )]
    pub output: Option<PathBuf>,

    /// Only check that the input is aligned.
    #[arg(long, conflicts_with = "output")]
    pub check: bool,

    /// Name of the resource table entry.
    #[arg(long, value_name = "NAME", conflicts_with = "check")]
    pub resource_table: Option<String>,
}
