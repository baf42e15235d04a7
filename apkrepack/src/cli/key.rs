// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rsa::RsaPrivateKey;
use x509_cert::Certificate;

use crate::{
    cli::status,
    crypto::{self, PassphraseSource},
};

fn get_passphrase_source(group: &PassphraseGroup, key_path: &Path) -> PassphraseSource {
    PassphraseSource::new(
        key_path,
        group.pass_file.as_deref(),
        group.pass_env_var.as_deref(),
    )
}

fn days(validity: u64) -> Duration {
    Duration::from_secs(validity * 24 * 60 * 60)
}

fn generate_cert(key: &RsaPrivateKey, subject: &str, validity: u64) -> Result<Certificate> {
    crypto::generate_cert(key, rand::random(), days(validity), subject)
        .context("Failed to generate certificate")
}

fn create_keystore(cli: &CreateKeystoreCli) -> Result<()> {
    let (cert, key) = match (&cli.key, &cli.cert) {
        (Some(key_path), Some(cert_path)) => {
            let source = get_passphrase_source(&cli.key_passphrase.as_group(), key_path);
            let key = crypto::read_pem_key_file(key_path, &source)
                .with_context(|| format!("Failed to load key: {key_path:?}"))?;
            let cert = crypto::read_pem_cert_file(cert_path)
                .with_context(|| format!("Failed to load certificate: {cert_path:?}"))?;

            if !crypto::cert_matches_key(&cert, &key)
                .context("Failed to compare certificate and key")?
            {
                bail!("Certificate {cert_path:?} does not match key {key_path:?}");
            }

            (cert, key)
        }
        (None, None) => {
            let key = crypto::generate_rsa_key_pair(cli.generate.bits)
                .context("Failed to generate RSA keypair")?;
            let cert = generate_cert(&key, &cli.generate.cert.subject, cli.generate.cert.validity)?;

            (cert, key)
        }
        _ => unreachable!(),
    };

    let source = get_passphrase_source(&cli.passphrase, &cli.output);
    crypto::write_pem_keystore_file(&cli.output, &cert, &key, &source)
        .with_context(|| format!("Failed to write keystore: {:?}", cli.output))?;

    status!("Keystore written to {:?}", cli.output);

    Ok(())
}

pub fn key_main(cli: &KeyCli) -> Result<()> {
    match &cli.command {
        KeyCommand::GenerateKey(c) => {
            let source = get_passphrase_source(&c.passphrase, &c.output);
            let private_key =
                crypto::generate_rsa_key_pair(c.bits).context("Failed to generate RSA keypair")?;

            crypto::write_pem_key_file(&c.output, &private_key, &source)
                .with_context(|| format!("Failed to write private key: {:?}", c.output))?;
        }
        KeyCommand::GenerateCert(c) => {
            let source = get_passphrase_source(&c.passphrase, &c.key);
            let private_key = crypto::read_pem_key_file(&c.key, &source)
                .with_context(|| format!("Failed to load key: {:?}", c.key))?;

            let cert = generate_cert(&private_key, &c.cert.subject, c.cert.validity)?;

            crypto::write_pem_cert_file(&c.output, &cert)
                .with_context(|| format!("Failed to write certificate: {:?}", c.output))?;
        }
        KeyCommand::CreateKeystore(c) => create_keystore(c)?,
    }

    Ok(())
}

#[derive(Debug, Args)]
struct PassphraseGroup {
    /// Environment variable containing private key passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "pass")]
    pass_env_var: Option<OsString>,

    /// File containing private key passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "pass")]
    pass_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct InputPassphraseGroup {
    /// Environment variable containing the input private key passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "key_pass", requires = "key")]
    key_pass_env_var: Option<OsString>,

    /// File containing the input private key passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "key_pass", requires = "key")]
    key_pass_file: Option<PathBuf>,
}

impl InputPassphraseGroup {
    fn as_group(&self) -> PassphraseGroup {
        PassphraseGroup {
            pass_env_var: self.key_pass_env_var.clone(),
            pass_file: self.key_pass_file.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct CertGroup {
    /// Certificate subject with comma-separated components.
    #[arg(short, long, default_value = "CN=apkrepack")]
    subject: String,

    /// Certificate validity in days.
    #[arg(short, long, default_value = "10000")]
    validity: u64,
}

/// Generate an RSA keypair.
///
/// The output is saved in the standard PKCS8 format.
#[derive(Debug, Parser)]
struct GenerateKeyCli {
    /// Path to output private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Key size in bits.
    #[arg(long, default_value = "4096")]
    bits: usize,

    #[command(flatten)]
    passphrase: PassphraseGroup,
}

/// Generate a self-signed certificate.
#[derive(Debug, Parser)]
struct GenerateCertCli {
    /// Path to input private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    key: PathBuf,

    #[command(flatten)]
    passphrase: PassphraseGroup,

    /// Path to output certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    #[command(flatten)]
    cert: CertGroup,
}

#[derive(Debug, Args)]
struct GenerateGroup {
    /// Key size in bits for a newly generated key.
    #[arg(long, default_value = "4096", conflicts_with = "key")]
    bits: usize,

    #[command(flatten)]
    cert: CertGroup,
}

/// Create a PEM keystore usable for signing.
///
/// The keystore contains the certificate followed by the private key. If no
/// key and certificate are given, new ones are generated.
#[derive(Debug, Parser)]
struct CreateKeystoreCli {
    /// Path to output keystore.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Path to existing private key.
    #[arg(short, long, value_name = "FILE", value_parser, requires = "cert")]
    key: Option<PathBuf>,

    /// Path to existing certificate.
    #[arg(short, long, value_name = "FILE", value_parser, requires = "key")]
    cert: Option<PathBuf>,

    #[command(flatten)]
    key_passphrase: InputPassphraseGroup,

    #[command(flatten)]
    passphrase: PassphraseGroup,

    #[command(flatten)]
    generate: GenerateGroup,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    GenerateKey(GenerateKeyCli),
    GenerateCert(GenerateCertCli),
    CreateKeystore(CreateKeystoreCli),
}

/// Generate keys, certificates, and keystores.
#[derive(Debug, Parser)]
pub struct KeyCli {
    #[command(subcommand)]
    command: KeyCommand,
}
