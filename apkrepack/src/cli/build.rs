// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{path::PathBuf, sync::atomic::AtomicBool};

use anyhow::{Context, Result};
use clap::Parser;

use crate::{
    cli::{
        manifest::{self, MetadataGroup},
        sign::SigningGroup,
        status,
    },
    pipeline::{BuildRequest, Pipeline},
};

pub fn build_main(cli: &BuildCli, cancel_signal: &AtomicBool) -> Result<()> {
    let config = manifest::load_config(cli.config.as_deref())?;
    let pipeline = Pipeline::new(config).context("Invalid pipeline config")?;

    let request = BuildRequest {
        template: cli.template.clone(),
        project: cli.project.clone(),
        output: cli.output.clone(),
        metadata: cli.metadata.to_metadata(),
        signing: cli.signing.to_config(),
    };

    status!("Building {:?} from {:?}", request.output, request.template);

    let output = pipeline
        .build(&request, cancel_signal)
        .with_context(|| format!("Failed to build: {:?}", request.output))?;

    status!("Successfully built {output:?}");

    Ok(())
}

/// Build a signed archive from a template and a project directory.
#[derive(Debug, Parser)]
pub struct BuildCli {
    /// Path to template archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub template: PathBuf,

    /// Path to project directory.
    #[arg(short, long, value_name = "DIR", value_parser)]
    pub project: PathBuf,

    /// Path to output archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: PathBuf,

    /// Pipeline config file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub metadata: MetadataGroup,

    #[command(flatten)]
    pub signing: SigningGroup,
}
