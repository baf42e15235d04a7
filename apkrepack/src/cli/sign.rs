// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsString,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result};
use clap::{Args, Parser};

use crate::{
    cli::status,
    crypto::PassphraseSource,
    pipeline::SigningConfig,
    sign::{self, SignOptions},
    util,
};

fn passphrase_source(
    keystore: &Path,
    pass_file: Option<&Path>,
    pass_env_var: Option<&OsString>,
) -> Option<PassphraseSource> {
    if pass_file.is_none() && pass_env_var.is_none() {
        return None;
    }

    Some(PassphraseSource::new(
        keystore,
        pass_file,
        pass_env_var.map(|v| v.as_os_str()),
    ))
}

#[derive(Debug, Args)]
pub struct SigningGroup {
    /// PEM keystore containing the signing certificate and private key.
    ///
    /// If unspecified, the built-in debug key is used.
    #[arg(long, value_name = "FILE", value_parser)]
    pub keystore: Option<PathBuf>,

    /// Base name of the signature files in META-INF/.
    #[arg(long, value_name = "NAME", requires = "keystore")]
    pub alias: Option<String>,

    /// Environment variable containing the keystore passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "pass_store", requires = "keystore")]
    pub pass_store_env_var: Option<OsString>,

    /// File containing the keystore passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "pass_store", requires = "keystore")]
    pub pass_store_file: Option<PathBuf>,

    /// Environment variable containing the private key passphrase.
    ///
    /// Defaults to the keystore passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "pass_key", requires = "keystore")]
    pub pass_key_env_var: Option<OsString>,

    /// File containing the private key passphrase.
    ///
    /// Defaults to the keystore passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "pass_key", requires = "keystore")]
    pub pass_key_file: Option<PathBuf>,

    /// Do not add a JAR (v1) signature.
    #[arg(long, conflicts_with = "no_v2")]
    pub no_v1: bool,

    /// Do not add an APK signing block (v2) signature.
    #[arg(long)]
    pub no_v2: bool,
}

impl SigningGroup {
    pub fn to_config(&self) -> SigningConfig {
        let (store_pass, key_pass) = match &self.keystore {
            Some(keystore) => (
                passphrase_source(
                    keystore,
                    self.pass_store_file.as_deref(),
                    self.pass_store_env_var.as_ref(),
                ),
                passphrase_source(
                    keystore,
                    self.pass_key_file.as_deref(),
                    self.pass_key_env_var.as_ref(),
                ),
            ),
            None => (None, None),
        };

        SigningConfig {
            keystore: self.keystore.clone(),
            alias: self.alias.clone(),
            store_pass,
            key_pass,
            schemes: SignOptions {
                v1: !self.no_v1,
                v2: !self.no_v2,
            },
        }
    }
}

pub fn sign_main(cli: &SignCli, cancel_signal: &AtomicBool) -> Result<()> {
    let signing = cli.signing.to_config();
    let credential = signing
        .load_credential(sign::DEFAULT_ALIAS)
        .context("Failed to load signing credential")?;

    let reader = File::open(&cli.input)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;

    let temp_file = util::output_temp_file(&cli.output)
        .with_context(|| format!("Failed to create temporary file for: {:?}", cli.output))?;

    let digest = {
        let mut writer = BufWriter::new(temp_file.as_file());

        let digest = sign::sign_archive(
            reader,
            &mut writer,
            &credential,
            signing.schemes,
            cancel_signal,
        )
        .with_context(|| format!("Failed to sign archive: {:?}", cli.input))?;

        writer
            .flush()
            .with_context(|| format!("Failed to flush output: {:?}", cli.output))?;

        digest
    };

    util::persist_output(temp_file, &cli.output)
        .with_context(|| format!("Failed to write: {:?}", cli.output))?;

    if let Some(digest) = digest {
        status!("v2 content digest: {}", hex::encode(digest));
    }
    status!("Signed archive written to {:?}", cli.output);

    Ok(())
}

/// Sign an aligned archive.
///
/// Existing JAR signature files are replaced. The input must already be
/// aligned (see the `align` subcommand).
#[derive(Debug, Parser)]
pub struct SignCli {
    /// Path to input archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: PathBuf,

    #[command(flatten)]
    pub signing: SigningGroup,
}
