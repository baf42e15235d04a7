// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! The full build: template + project + metadata -> signed archive.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Cursor, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
    },
    thread,
    time::SystemTime,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{self, PipelineConfig},
    crypto::PassphraseSource,
    format::zip::{self, ZipReader},
    patch::{
        align,
        assemble,
        manifest::{self, AppMetadata, ManifestPatcher},
    },
    sign::{self, Credential, SignOptions},
    util,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Template not found: {0:?}")]
    MissingTemplate(PathBuf),
    #[error("Invalid template: {0:?}")]
    Template(PathBuf, #[source] zip::Error),
    #[error("Template has no manifest: {0:?}")]
    TemplateNoManifest(String),
    #[error("Assembled archive is {size} bytes, which is below the minimum of {min_size} bytes")]
    AssemblyTooSmall { size: u64, min_size: u64 },
    #[error("Failed to assemble archive")]
    Assembly(#[source] assemble::Error),
    #[error("Failed to patch manifest")]
    Manifest(#[source] manifest::Error),
    #[error("Failed to align archive")]
    Alignment(#[source] align::Error),
    #[error("Failed to sign archive")]
    Signing(#[source] sign::Error),
    #[error("Another build is already writing to {0:?}")]
    AlreadyRunning(PathBuf),
    #[error("Build was cancelled")]
    Cancelled,
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
    #[error("Invalid configuration")]
    Config(#[from] config::Error),
}

type Result<T> = std::result::Result<T, BuildError>;

/// Where the signing credential comes from.
#[derive(Clone, Debug, Default)]
pub struct SigningConfig {
    /// PEM keystore with a certificate and private key. If unset, the
    /// embedded debug credential is used.
    pub keystore: Option<PathBuf>,
    pub alias: Option<String>,
    pub store_pass: Option<PassphraseSource>,
    /// Passphrase for the private key. Falls back to the store passphrase.
    pub key_pass: Option<PassphraseSource>,
    pub schemes: SignOptions,
}

impl SigningConfig {
    pub fn load_credential(&self, default_alias: &str) -> std::result::Result<Credential, sign::Error> {
        let alias = self.alias.as_deref().unwrap_or(default_alias);

        match &self.keystore {
            Some(path) => {
                let source = self
                    .key_pass
                    .clone()
                    .or_else(|| self.store_pass.clone())
                    .unwrap_or_else(|| PassphraseSource::new(path, None, None));

                Credential::load(path, &source, alias)
            }
            None => {
                warn!("No keystore specified; signing with the debug key");
                Credential::debug()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub template: PathBuf,
    pub project: PathBuf,
    pub output: PathBuf,
    pub metadata: AppMetadata,
    pub signing: SigningConfig,
}

/// Marker file preventing concurrent builds to the same output. Removed when
/// dropped.
#[derive(Debug)]
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(output: &Path) -> Result<Self> {
        let path = util::path_with_suffix(output, ".lock");

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    BuildError::AlreadyRunning(output.to_owned())
                } else {
                    BuildError::Io(path.clone(), e)
                }
            })?;

        let lock = Self { path };

        writeln!(file, "{}", std::process::id()).map_err(|e| BuildError::Io(lock.path.clone(), e))?;

        Ok(lock)
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file: {:?}: {e}", self.path);
        }
    }
}

struct CachedTemplate {
    path: PathBuf,
    size: u64,
    modified: Option<SystemTime>,
    data: Arc<Vec<u8>>,
}

/// Builds archives from templates. A single pipeline can run multiple builds
/// concurrently as long as their outputs differ.
pub struct Pipeline {
    config: PipelineConfig,
    template_cache: Mutex<Option<CachedTemplate>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            template_cache: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the template, reusing the previous one if the file has not
    /// changed.
    fn load_template(&self, path: &Path) -> Result<Arc<Vec<u8>>> {
        let metadata = fs::metadata(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BuildError::MissingTemplate(path.to_owned())
            } else {
                BuildError::Io(path.to_owned(), e)
            }
        })?;
        if !metadata.is_file() {
            return Err(BuildError::MissingTemplate(path.to_owned()));
        }

        let size = metadata.len();
        let modified = metadata.modified().ok();

        let mut cache = self
            .template_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = cache.as_ref() {
            if cached.path == path && cached.size == size && cached.modified == modified {
                debug!("Using cached template: {path:?}");
                return Ok(cached.data.clone());
            }
        }

        let data = fs::read(path).map_err(|e| BuildError::Io(path.to_owned(), e))?;
        ZipReader::new(Cursor::new(data.as_slice()))
            .map_err(|e| BuildError::Template(path.to_owned(), e))?;

        let data = Arc::new(data);
        *cache = Some(CachedTemplate {
            path: path.to_owned(),
            size,
            modified,
            data: data.clone(),
        });

        Ok(data)
    }

    /// Run a build to completion. The output is only created if every step
    /// succeeds. Intermediate files are removed on every path.
    pub fn build(&self, request: &BuildRequest, cancel_signal: &AtomicBool) -> Result<PathBuf> {
        let result = self.build_inner(request, cancel_signal);

        match result {
            Err(_) if cancel_signal.load(Ordering::SeqCst) => Err(BuildError::Cancelled),
            r => r,
        }
    }

    /// Reject an output location inside the project directory. The lock file
    /// and temporary files would otherwise be packaged.
    fn check_output_location(request: &BuildRequest) -> Result<()> {
        let project = fs::canonicalize(&request.project)
            .map_err(|e| BuildError::Io(request.project.clone(), e))?;
        let output_dir = util::parent_path(&request.output);
        let output_dir =
            fs::canonicalize(output_dir).map_err(|e| BuildError::Io(output_dir.to_owned(), e))?;

        if output_dir.starts_with(&project) {
            return Err(config::Error::Invalid(format!(
                "Output {:?} is inside the project directory {:?}",
                request.output, request.project,
            ))
            .into());
        }

        Ok(())
    }

    fn build_inner(&self, request: &BuildRequest, cancel_signal: &AtomicBool) -> Result<PathBuf> {
        Self::check_output_location(request)?;
        let _lock = BuildLock::acquire(&request.output)?;
        let config = &self.config;

        let template = self.load_template(&request.template)?;
        let mut template_reader = ZipReader::new(Cursor::new(template.as_slice()))
            .map_err(|e| BuildError::Template(request.template.clone(), e))?;

        // Load the credential before doing any work in case it needs a
        // passphrase prompt.
        let credential = request
            .signing
            .load_credential(&config.default_alias)
            .map_err(BuildError::Signing)?;

        let manifest_entry = template_reader
            .find(&config.manifest)
            .cloned()
            .ok_or_else(|| BuildError::TemplateNoManifest(config.manifest.clone()))?;
        let manifest_data = template_reader
            .read_data(&manifest_entry)
            .map_err(|e| BuildError::Template(request.template.clone(), e))?;

        let patcher = ManifestPatcher {
            metadata: &request.metadata,
            test_only: config.test_only_strategy,
            placeholder_package: &config.placeholder_package,
            provider_suffixes: &config.provider_suffixes,
        };
        let patched = patcher
            .patch(&manifest_data)
            .map_err(BuildError::Manifest)?;

        let output_dir = util::parent_path(&request.output);
        let temp_dir = tempfile::Builder::new()
            .prefix(".apkrepack-")
            .tempdir_in(output_dir)
            .map_err(|e| BuildError::Io(output_dir.to_owned(), e))?;

        let assembled_path = temp_dir.path().join("assembled.apk");
        {
            let file = File::create(&assembled_path)
                .map_err(|e| BuildError::Io(assembled_path.clone(), e))?;
            let mut writer = BufWriter::new(file);

            let size = config
                .assembler()
                .assemble(
                    &mut template_reader,
                    &patched.data,
                    &request.project,
                    &mut writer,
                    cancel_signal,
                )
                .map_err(|e| match e {
                    assemble::Error::AssemblyTooSmall { size, min_size } => {
                        BuildError::AssemblyTooSmall { size, min_size }
                    }
                    e => BuildError::Assembly(e),
                })?;

            writer
                .flush()
                .map_err(|e| BuildError::Io(assembled_path.clone(), e))?;

            info!("Assembled {size} bytes");
        }

        let aligned_path = temp_dir.path().join("aligned.apk");
        {
            let reader = File::open(&assembled_path)
                .map(BufReader::new)
                .map_err(|e| BuildError::Io(assembled_path.clone(), e))?;
            let file = File::create(&aligned_path)
                .map_err(|e| BuildError::Io(aligned_path.clone(), e))?;
            let mut writer = BufWriter::new(file);

            align::align_archive(reader, &mut writer, &config.resource_table, cancel_signal)
                .map_err(BuildError::Alignment)?;

            writer
                .flush()
                .map_err(|e| BuildError::Io(aligned_path.clone(), e))?;
        }

        let temp_output = util::output_temp_file(&request.output)
            .map_err(|e| BuildError::Io(request.output.clone(), e))?;
        {
            let reader = File::open(&aligned_path)
                .map(BufReader::new)
                .map_err(|e| BuildError::Io(aligned_path.clone(), e))?;
            let mut writer = BufWriter::new(temp_output.as_file());

            sign::sign_archive(
                reader,
                &mut writer,
                &credential,
                request.signing.schemes,
                cancel_signal,
            )
            .map_err(BuildError::Signing)?;

            writer
                .flush()
                .map_err(|e| BuildError::Io(temp_output.path().to_owned(), e))?;
        }

        util::persist_output(temp_output, &request.output)
            .map_err(|e| BuildError::Io(request.output.clone(), e))?;

        info!("Wrote {:?}", request.output);

        Ok(request.output.clone())
    }

    /// Run a build on a worker thread. The result is delivered exactly once
    /// through the returned handle.
    pub fn spawn(
        self: Arc<Self>,
        request: BuildRequest,
        cancel_signal: Arc<AtomicBool>,
    ) -> BuildHandle {
        let (sender, receiver) = mpsc::sync_channel(1);

        thread::spawn(move || {
            let result = self.build(&request, &cancel_signal);
            // The receiver may have been dropped if nobody is interested.
            let _ = sender.send(result);
        });

        BuildHandle { receiver }
    }
}

/// Pending result of [`Pipeline::spawn`].
pub struct BuildHandle {
    receiver: Receiver<Result<PathBuf>>,
}

impl BuildHandle {
    /// Wait for the build to finish. If the worker thread died without
    /// reporting a result, the build is treated as cancelled.
    pub fn wait(self) -> Result<PathBuf> {
        self.receiver.recv().unwrap_or(Err(BuildError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app.apk");

        let lock = BuildLock::acquire(&output).unwrap();
        assert!(dir.path().join("app.apk.lock").exists());
        assert_matches!(
            BuildLock::acquire(&output),
            Err(BuildError::AlreadyRunning(_))
        );

        drop(lock);
        assert!(!dir.path().join("app.apk.lock").exists());
        BuildLock::acquire(&output).unwrap();
    }

    #[test]
    fn missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let cancel_signal = AtomicBool::new(false);
        let request = BuildRequest {
            template: dir.path().join("missing.apk"),
            project: dir.path().to_owned(),
            output: dir.path().join("out.apk"),
            metadata: AppMetadata::default(),
            signing: SigningConfig::default(),
        };

        assert_matches!(
            pipeline.build(&request, &cancel_signal),
            Err(BuildError::MissingTemplate(_))
        );
        assert!(!request.output.exists());
        assert!(!dir.path().join("out.apk.lock").exists());
    }
}
