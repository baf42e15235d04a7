// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    patch::{assemble::Assembler, manifest::TestOnlyStrategy},
    sign,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_PROVIDER_SUFFIXES: &[&str] = &[
    ".provider",
    ".fileprovider",
    ".androidx-startup",
    ".cacheprovider",
    ".securityprovider",
    ".downloadprovider",
    ".firebaseinitprovider",
    ".analyticsprovider",
    ".DYNAMIC_RECEIVER_NOT_EXPORTED_PERMISSION",
];

/// Fixed names and policies used by the build pipeline. Every field has a
/// default, so an empty config file is valid.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineConfig {
    pub resource_table: String,
    pub manifest: String,
    /// Prefix for project content inside the archive. Must end with `/`.
    pub content_namespace: String,
    /// Project-relative path of the metadata file that is never packaged.
    pub project_metadata: String,
    /// Package name that template-derived strings may be based on.
    pub placeholder_package: String,
    pub provider_suffixes: Vec<String>,
    pub min_archive_size: u64,
    pub test_only_strategy: TestOnlyStrategy,
    /// Alias used when the signing config does not specify one.
    pub default_alias: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resource_table: "resources.arsc".to_owned(),
            manifest: "AndroidManifest.xml".to_owned(),
            content_namespace: "assets/www/".to_owned(),
            project_metadata: "project.json".to_owned(),
            placeholder_package: "com.apkrepack.template".to_owned(),
            provider_suffixes: DEFAULT_PROVIDER_SUFFIXES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            min_archive_size: 1024,
            test_only_strategy: TestOnlyStrategy::default(),
            default_alias: sign::DEFAULT_ALIAS.to_owned(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(path: &Path, data: &str) -> Result<Self> {
        let config: Self =
            toml_edit::de::from_str(data).map_err(|e| Error::Parse(path.to_owned(), e))?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

        Self::from_toml(path, &data)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.content_namespace.ends_with('/') || self.content_namespace.starts_with('/') {
            return Err(Error::Invalid(format!(
                "content-namespace must be a relative directory ending in '/': {:?}",
                self.content_namespace,
            )));
        }

        for (field, value) in [
            ("resource-table", &self.resource_table),
            ("manifest", &self.manifest),
            ("project-metadata", &self.project_metadata),
            ("placeholder-package", &self.placeholder_package),
        ] {
            if value.is_empty() {
                return Err(Error::Invalid(format!("{field} must not be empty")));
            }
        }

        Ok(())
    }

    pub fn assembler(&self) -> Assembler<'_> {
        Assembler {
            resource_table: &self.resource_table,
            manifest: &self.manifest,
            content_namespace: &self.content_namespace,
            project_metadata: &self.project_metadata,
            min_size: self.min_archive_size,
        }
    }
}
