// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::Cursor,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use apkrepack::{
    config::PipelineConfig,
    format::{
        axml::{
            Attribute, AxmlDocument, Chunk, EndElement, NO_INDEX, Namespace, ResValue,
            StartElement, StringPool,
        },
        signing_block::{SigningBlock, V2_SCHEME_ID},
        zip::{CompressionMethod, ZipEntry, ZipReader, ZipWriter},
    },
    patch::{
        align,
        manifest::{ANDROID_NS, ATTR_LABEL, ATTR_NAME, ATTR_TEST_ONLY, AppMetadata},
    },
    pipeline::{BuildError, BuildRequest, Pipeline, SigningConfig},
};
use assert_matches::assert_matches;
use tempfile::TempDir;

const ATTR_AUTHORITIES: u32 = 0x0101_0018;

fn end(name: u32) -> Chunk {
    Chunk::EndElement(EndElement {
        line: 0,
        comment: NO_INDEX,
        ns: NO_INDEX,
        name,
    })
}

fn template_manifest() -> Vec<u8> {
    let mut pool = StringPool::new(false);
    let name = pool.add("name");
    let label = pool.add("label");
    let test_only = pool.add("testOnly");
    let authorities = pool.add("authorities");
    let android = pool.add("android");
    let uri = pool.add(ANDROID_NS);
    let manifest = pool.add("manifest");
    let package = pool.add("package");
    let package_value = pool.add("com.example.template");
    let application = pool.add("application");
    let app_label = pool.add("Template");
    let provider = pool.add("provider");
    let provider_authority = pool.add("com.example.template.fileprovider");

    let ns = Namespace {
        line: 1,
        comment: NO_INDEX,
        prefix: android,
        uri,
    };

    let doc = AxmlDocument {
        pool,
        chunks: vec![
            Chunk::ResourceMap(vec![ATTR_NAME, ATTR_LABEL, ATTR_TEST_ONLY, ATTR_AUTHORITIES]),
            Chunk::StartNamespace(ns),
            Chunk::StartElement(StartElement::new(
                NO_INDEX,
                manifest,
                vec![Attribute::string(NO_INDEX, package, package_value)],
            )),
            Chunk::StartElement(StartElement::new(
                NO_INDEX,
                application,
                vec![
                    Attribute::string(uri, label, app_label),
                    Attribute::typed(uri, test_only, ResValue::boolean(true)),
                ],
            )),
            Chunk::StartElement(StartElement::new(
                NO_INDEX,
                provider,
                vec![Attribute::string(uri, authorities, provider_authority)],
            )),
            end(provider),
            end(application),
            end(manifest),
            Chunk::EndNamespace(ns),
        ],
    };

    doc.to_bytes().unwrap()
}

/// Pseudo-random bytes that do not compress well.
fn noise(len: usize, mut state: u32) -> Vec<u8> {
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut writer = ZipWriter::new(Vec::new());
        for entry in [
            ZipEntry::deflated("AndroidManifest.xml", &template_manifest()).unwrap(),
            ZipEntry::stored("classes.dex", noise(800, 0x1234_5678)),
            ZipEntry::deflated("resources.arsc", &noise(400, 0x9abc_def0)).unwrap(),
            ZipEntry::stored("res/raw/blob.bin", noise(3, 1)),
            ZipEntry::stored("META-INF/OLD.SF", b"stale".to_vec()),
        ] {
            writer.write_entry(&entry).unwrap();
        }
        let (template, _) = writer.finish().unwrap();
        assert!((1500..3000).contains(&template.len()));

        fs::write(dir.path().join("template.apk"), template).unwrap();

        let project = dir.path().join("www");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("index.html"), index_html()).unwrap();
        fs::write(project.join("project.json"), "{}").unwrap();

        fs::create_dir(dir.path().join("out")).unwrap();

        Self { dir }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn request(&self, output: &str) -> BuildRequest {
        BuildRequest {
            template: self.path("template.apk"),
            project: self.path("www"),
            output: self.path("out").join(output),
            metadata: AppMetadata {
                label: Some("My App".to_owned()),
                package: Some("com.example.mine".to_owned()),
                version_code: Some(7),
                version_name: Some("1.0.7".to_owned()),
                ..Default::default()
            },
            signing: SigningConfig::default(),
        }
    }
}

fn index_html() -> Vec<u8> {
    let data = b"<!doctype html><html><body>hello</body></html>\n\n\n".to_vec();
    assert_eq!(data.len(), 50);
    data
}

fn dir_names(path: &Path) -> Vec<String> {
    let mut names = fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn build_end_to_end() {
    let workspace = Workspace::new();
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let cancel_signal = AtomicBool::new(false);
    let request = workspace.request("app.apk");

    let output = pipeline.build(&request, &cancel_signal).unwrap();
    assert_eq!(output, request.output);
    assert_eq!(dir_names(&workspace.path("out")), ["app.apk"]);

    let data = fs::read(&output).unwrap();
    align::verify_alignment(Cursor::new(&data)).unwrap();

    let mut reader = ZipReader::new(Cursor::new(&data)).unwrap();
    let entries = reader.entries().to_vec();
    let names = entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();

    assert_eq!(names[0], "resources.arsc");
    assert_eq!(entries[0].method, CompressionMethod::Stored);
    assert!(!names.contains(&"META-INF/OLD.SF"));
    assert!(!names.contains(&"assets/www/project.json"));
    assert_eq!(
        &names[names.len() - 3..],
        ["META-INF/MANIFEST.MF", "META-INF/CERT.SF", "META-INF/CERT.RSA"],
    );

    let html = reader.find("assets/www/index.html").unwrap().clone();
    assert_eq!(reader.read_data(&html).unwrap(), index_html());

    let manifest = reader.find("AndroidManifest.xml").unwrap().clone();
    let manifest = reader.read_data(&manifest).unwrap();
    assert!(
        memchr::memmem::find(&manifest, &ATTR_TEST_ONLY.to_le_bytes()).is_none(),
        "Test-only marker still present",
    );

    let doc = AxmlDocument::parse(&manifest).unwrap();
    let strings = doc.pool.strings();
    assert!(strings.iter().any(|s| s == "My App"));
    assert!(strings.iter().any(|s| s == "com.example.mine.fileprovider"));
    assert!(!strings.iter().any(|s| s == "com.example.template.fileprovider"));

    let cd_offset = reader.layout().cd_offset as usize;
    let (_, block) = SigningBlock::parse_trailing(&data[..cd_offset]).unwrap();
    assert!(block.get(V2_SCHEME_ID).is_some());

    assert!(!workspace.path("out/app.apk.lock").exists());
}

#[test]
fn too_small_leaves_no_output() {
    let workspace = Workspace::new();
    let config = PipelineConfig {
        min_archive_size: 1 << 20,
        ..Default::default()
    };
    let pipeline = Pipeline::new(config).unwrap();
    let cancel_signal = AtomicBool::new(false);
    let request = workspace.request("app.apk");

    assert_matches!(
        pipeline.build(&request, &cancel_signal),
        Err(BuildError::AssemblyTooSmall { min_size: 1048576, .. })
    );
    assert!(dir_names(&workspace.path("out")).is_empty());
}

#[test]
fn concurrent_build_is_rejected() {
    let workspace = Workspace::new();
    let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()).unwrap());
    let request = workspace.request("app.apk");

    // Simulate another build holding the lock.
    fs::write(workspace.path("out/app.apk.lock"), "1").unwrap();

    let handle = pipeline
        .clone()
        .spawn(request.clone(), Arc::new(AtomicBool::new(false)));
    assert_matches!(handle.wait(), Err(BuildError::AlreadyRunning(_)));
    assert_eq!(dir_names(&workspace.path("out")), ["app.apk.lock"]);

    fs::remove_file(workspace.path("out/app.apk.lock")).unwrap();

    let handle = pipeline.spawn(request, Arc::new(AtomicBool::new(false)));
    handle.wait().unwrap();
    assert_eq!(dir_names(&workspace.path("out")), ["app.apk"]);
}

#[test]
fn cancelled_build_cleans_up() {
    let workspace = Workspace::new();
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let cancel_signal = AtomicBool::new(true);

    assert_matches!(
        pipeline.build(&workspace.request("app.apk"), &cancel_signal),
        Err(BuildError::Cancelled)
    );
    assert!(dir_names(&workspace.path("out")).is_empty());

    cancel_signal.store(false, Ordering::SeqCst);
    pipeline
        .build(&workspace.request("app.apk"), &cancel_signal)
        .unwrap();
}

#[test]
fn rebuild_is_deterministic() {
    let workspace = Workspace::new();
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let cancel_signal = AtomicBool::new(false);

    let first = pipeline
        .build(&workspace.request("first.apk"), &cancel_signal)
        .unwrap();
    let second = pipeline
        .build(&workspace.request("second.apk"), &cancel_signal)
        .unwrap();

    assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
}

#[test]
fn missing_template() {
    let workspace = Workspace::new();
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let cancel_signal = AtomicBool::new(false);
    let mut request = workspace.request("app.apk");
    request.template = workspace.path("missing.apk");

    assert_matches!(
        pipeline.build(&request, &cancel_signal),
        Err(BuildError::MissingTemplate(_))
    );
}

#[test]
fn output_inside_project_is_rejected() {
    let workspace = Workspace::new();
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let cancel_signal = AtomicBool::new(false);
    let mut request = workspace.request("app.apk");
    request.output = workspace.path("www").join("app.apk");

    assert_matches!(
        pipeline.build(&request, &cancel_signal),
        Err(BuildError::Config(_))
    );

    // Neither a lock file nor temporary files were left in the project.
    assert_eq!(dir_names(&workspace.path("www")), ["index.html", "project.json"]);

    // Nested directories are rejected too.
    fs::create_dir(workspace.path("www").join("dist")).unwrap();
    request.output = workspace.path("www").join("dist").join("app.apk");

    assert_matches!(
        pipeline.build(&request, &cancel_signal),
        Err(BuildError::Config(_))
    );
    assert_eq!(dir_names(&workspace.path("www").join("dist")), Vec::<String>::new());
}
