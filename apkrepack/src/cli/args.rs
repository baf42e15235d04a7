// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt, io,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::cli::{align, build, completion, key, manifest, sign};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_possible_value().ok_or(fmt::Error)?.get_name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Message only.
    #[default]
    Short,
    /// Timestamp, level, and message.
    Medium,
    /// Timestamp, level, source location, and message.
    Long,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_possible_value().ok_or(fmt::Error)?.get_name())
    }
}

/// Set up the global tracing subscriber. Logs go to stderr so that they do not
/// mix with command output.
pub fn init_logging(log_level: LogLevel, log_format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(log_level.as_level());

    match log_format {
        LogFormat::Short => builder
            .without_time()
            .with_level(false)
            .with_target(false)
            .init(),
        LogFormat::Medium => builder.with_target(false).init(),
        LogFormat::Long => builder
            .with_file(true)
            .with_line_number(true)
            .init(),
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
pub enum Command {
    Build(build::BuildCli),
    Align(align::AlignCli),
    Sign(sign::SignCli),
    Manifest(manifest::ManifestCli),
    Key(key::KeyCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t)]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", default_value_t)]
    pub log_format: LogFormat,
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level, cli.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    match cli.command {
        Command::Build(c) => build::build_main(&c, cancel_signal),
        Command::Align(c) => align::align_main(&c, cancel_signal),
        Command::Sign(c) => sign::sign_main(&c, cancel_signal),
        Command::Manifest(c) => manifest::manifest_main(&c),
        Command::Key(c) => key::key_main(&c),
        Command::Completion(c) => completion::completion_main(&c),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_build() {
        let cli = Cli::try_parse_from([
            "apkrepack",
            "--log-level",
            "debug",
            "build",
            "--template",
            "template.apk",
            "--project",
            "www",
            "--output",
            "app.apk",
            "--package",
            "com.example.app",
            "--permission",
            "android.permission.CAMERA",
            "--permission",
            "android.permission.INTERNET",
            "--no-v1",
        ])
        .unwrap();

        assert_eq!(cli.log_level, LogLevel::Debug);
        let Command::Build(c) = cli.command else {
            panic!("Unexpected command: {:?}", cli.command);
        };
        assert_eq!(c.metadata.permission.len(), 2);
        assert!(c.signing.no_v1);
        assert!(!c.signing.no_v2);
    }

    #[test]
    fn reject_conflicting_passphrase_sources() {
        let result = Cli::try_parse_from([
            "apkrepack",
            "sign",
            "--input",
            "in.apk",
            "--output",
            "out.apk",
            "--keystore",
            "release.pem",
            "--pass-store-env-var",
            "PASS",
            "--pass-store-file",
            "pass.txt",
        ]);

        assert!(result.is_err());
    }
}
