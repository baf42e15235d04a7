// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Patching of the binary `AndroidManifest.xml`.

use std::{collections::HashMap, fmt};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::format::axml::{self, Attribute, AxmlDocument, NO_INDEX, ResValue, StartElement};

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

pub const ATTR_LABEL: u32 = 0x0101_0001;
pub const ATTR_NAME: u32 = 0x0101_0003;
pub const ATTR_VERSION_CODE: u32 = 0x0101_021b;
pub const ATTR_VERSION_NAME: u32 = 0x0101_021c;
pub const ATTR_TEST_ONLY: u32 = 0x0101_0272;

const ELEMENT_MANIFEST: &str = "manifest";
const ELEMENT_APPLICATION: &str = "application";
const ELEMENT_USES_PERMISSION: &str = "uses-permission";

/// Components whose `android:name` may be relative to the package.
const COMPONENT_ELEMENTS: &[&str] = &[
    "application",
    "activity",
    "activity-alias",
    "service",
    "receiver",
    "provider",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Manifest has no <{0}> element")]
    MissingElement(&'static str),
    #[error("Manifest does not declare the android namespace")]
    MissingNamespace,
    #[error("Invalid package name: {0:?}")]
    InvalidPackage(String),
    #[error("Binary XML error")]
    Axml(#[from] axml::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// How the `android:testOnly` marker is neutralized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TestOnlyStrategy {
    /// Zero every occurrence of the attribute's resource ID. The attribute
    /// stays in the document, but is no longer recognized.
    #[default]
    BytePatch,
    /// Remove the attribute from every element.
    RemoveAttribute,
}

impl fmt::Display for TestOnlyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_possible_value().ok_or(fmt::Error)?.get_name())
    }
}

/// User-facing application fields. Unset fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppMetadata {
    pub label: Option<String>,
    pub package: Option<String>,
    pub version_code: Option<u32>,
    pub version_name: Option<String>,
    pub permissions: Vec<String>,
    pub removed_permissions: Vec<String>,
}

/// Field-level edits of an application manifest.
pub trait ManifestFieldEditor {
    type Error;

    fn package_name(&self) -> Option<&str>;

    fn set_app_label(&mut self, label: &str) -> std::result::Result<(), Self::Error>;

    fn set_package_name(&mut self, package: &str) -> std::result::Result<(), Self::Error>;

    fn set_version_code(&mut self, code: u32) -> std::result::Result<(), Self::Error>;

    fn set_version_name(&mut self, name: &str) -> std::result::Result<(), Self::Error>;

    /// Returns false if the permission is already requested.
    fn add_permission(&mut self, permission: &str) -> std::result::Result<bool, Self::Error>;

    /// Returns the number of matching requests that were removed.
    fn remove_permission(&mut self, permission: &str) -> std::result::Result<usize, Self::Error>;
}

/// Apply every set field of `metadata` through `editor`.
pub fn apply_metadata<E: ManifestFieldEditor>(
    editor: &mut E,
    metadata: &AppMetadata,
) -> std::result::Result<(), E::Error> {
    if let Some(label) = &metadata.label {
        editor.set_app_label(label)?;
    }
    if let Some(package) = &metadata.package {
        editor.set_package_name(package)?;
    }
    if let Some(code) = metadata.version_code {
        editor.set_version_code(code)?;
    }
    if let Some(name) = &metadata.version_name {
        editor.set_version_name(name)?;
    }
    for permission in &metadata.removed_permissions {
        if editor.remove_permission(permission)? == 0 {
            debug!("Permission was not requested: {permission}");
        }
    }
    for permission in &metadata.permissions {
        if !editor.add_permission(permission)? {
            debug!("Permission already requested: {permission}");
        }
    }

    Ok(())
}

fn validate_package(package: &str) -> Result<()> {
    let valid = package.contains('.')
        && package.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if !valid {
        return Err(Error::InvalidPackage(package.to_owned()));
    }

    Ok(())
}

/// [`ManifestFieldEditor`] operating on the structural AXML model.
#[derive(Clone, Debug)]
pub struct AxmlFieldEditor {
    doc: AxmlDocument,
}

impl AxmlFieldEditor {
    pub fn new(doc: AxmlDocument) -> Self {
        Self { doc }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self::new(AxmlDocument::parse(data)?))
    }

    pub fn document(&self) -> &AxmlDocument {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut AxmlDocument {
        &mut self.doc
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.doc.to_bytes()?)
    }

    fn manifest_index(&self) -> Result<usize> {
        self.doc
            .find_element(ELEMENT_MANIFEST)
            .ok_or(Error::MissingElement(ELEMENT_MANIFEST))
    }

    fn android_ns(&self) -> Result<u32> {
        self.doc.namespace(ANDROID_NS).ok_or(Error::MissingNamespace)
    }

    /// Set a string attribute in the android namespace.
    fn set_android_string(&mut self, element: usize, name: &str, res_id: u32, value: &str) -> Result<()> {
        let ns = self.android_ns()?;
        let name = self.doc.attribute_name(name, res_id);
        let value = self.doc.pool.find_or_add(value);

        self.doc
            .set_attribute(element, Attribute::string(ns, name, value))?;

        Ok(())
    }

    fn android_name<'a>(&'a self, element: &StartElement) -> Option<&'a str> {
        let index = self.doc.attribute_by_id(element, ATTR_NAME)?;
        self.doc.attribute_string(&element.attributes[index])
    }

    /// Expand `android:name` values like `.MainActivity` to fully qualified
    /// class names so that they survive a package change.
    fn qualify_component_names(&mut self, old_package: &str) -> Result<usize> {
        let mut updates = vec![];

        for element_name in COMPONENT_ELEMENTS {
            for index in self.doc.find_elements(element_name) {
                let Some(element) = self.doc.element(index) else {
                    continue;
                };
                let Some(position) = self.doc.attribute_by_id(element, ATTR_NAME) else {
                    continue;
                };
                let attr = element.attributes[position];

                if let Some(name) = self.doc.attribute_string(&attr) {
                    if name.starts_with('.') {
                        updates.push((index, attr, format!("{old_package}{name}")));
                    }
                }
            }
        }

        for (index, attr, qualified) in &updates {
            let value = self.doc.pool.find_or_add(qualified);
            self.doc
                .set_attribute(*index, Attribute::string(attr.ns, attr.name, value))?;
        }

        Ok(updates.len())
    }

    fn permission_elements(&self, permission: &str) -> Vec<usize> {
        self.doc
            .find_elements(ELEMENT_USES_PERMISSION)
            .into_iter()
            .filter(|i| {
                self.doc
                    .element(*i)
                    .and_then(|e| self.android_name(e))
                    == Some(permission)
            })
            .collect()
    }
}

impl ManifestFieldEditor for AxmlFieldEditor {
    type Error = Error;

    fn package_name(&self) -> Option<&str> {
        let index = self.doc.find_element(ELEMENT_MANIFEST)?;
        let element = self.doc.element(index)?;
        let position = self.doc.attribute_by_name(element, "package")?;

        self.doc.attribute_string(&element.attributes[position])
    }

    fn set_app_label(&mut self, label: &str) -> Result<()> {
        let index = self
            .doc
            .find_element(ELEMENT_APPLICATION)
            .ok_or(Error::MissingElement(ELEMENT_APPLICATION))?;

        self.set_android_string(index, "label", ATTR_LABEL, label)
    }

    fn set_package_name(&mut self, package: &str) -> Result<()> {
        validate_package(package)?;

        let index = self.manifest_index()?;

        if let Some(old) = self.package_name().map(ToOwned::to_owned) {
            if old == package {
                return Ok(());
            }

            let qualified = self.qualify_component_names(&old)?;
            debug!("Qualified {qualified} relative component names");
        }

        let name = self.doc.pool.find_or_add("package");
        let value = self.doc.pool.find_or_add(package);
        self.doc
            .set_attribute(index, Attribute::string(NO_INDEX, name, value))?;

        Ok(())
    }

    fn set_version_code(&mut self, code: u32) -> Result<()> {
        let index = self.manifest_index()?;
        let ns = self.android_ns()?;
        let name = self.doc.attribute_name("versionCode", ATTR_VERSION_CODE);

        self.doc
            .set_attribute(index, Attribute::typed(ns, name, ResValue::int_dec(code)))?;

        Ok(())
    }

    fn set_version_name(&mut self, name: &str) -> Result<()> {
        let index = self.manifest_index()?;

        self.set_android_string(index, "versionName", ATTR_VERSION_NAME, name)
    }

    fn add_permission(&mut self, permission: &str) -> Result<bool> {
        if !self.permission_elements(permission).is_empty() {
            return Ok(false);
        }

        let manifest = self.manifest_index()?;
        let ns = self.android_ns()?;
        let attr_name = self.doc.attribute_name("name", ATTR_NAME);
        let element_name = self.doc.pool.find_or_add(ELEMENT_USES_PERMISSION);
        let value = self.doc.pool.find_or_add(permission);

        // Permissions conventionally precede <application>.
        let position = match self.doc.find_element(ELEMENT_APPLICATION) {
            Some(i) => i,
            None => self.doc.subtree_end(manifest)?,
        };

        self.doc.insert_element(
            position,
            StartElement::new(
                NO_INDEX,
                element_name,
                vec![Attribute::string(ns, attr_name, value)],
            ),
        );

        Ok(true)
    }

    fn remove_permission(&mut self, permission: &str) -> Result<usize> {
        let elements = self.permission_elements(permission);

        for index in elements.iter().rev() {
            self.doc.remove_subtree(*index)?;
        }

        Ok(elements.len())
    }
}

/// Build the exact-match string mapping for moving provider authorities and
/// other package-derived strings from `old_package` to `new_package`.
pub fn authority_mapping(
    old_package: Option<&str>,
    new_package: &str,
    placeholder: &str,
    suffixes: &[String],
) -> HashMap<String, String> {
    let mut mapping = HashMap::new();

    for suffix in suffixes {
        for source in [old_package, Some(placeholder)].into_iter().flatten() {
            if source != new_package {
                mapping.insert(format!("{source}{suffix}"), format!("{new_package}{suffix}"));
            }
        }
    }

    if placeholder != new_package {
        mapping.insert(placeholder.to_owned(), new_package.to_owned());
    }

    mapping
}

/// Summary of the changes made by [`ManifestPatcher::patch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchedManifest {
    pub data: Vec<u8>,
    pub old_package: Option<String>,
    pub new_package: Option<String>,
    /// Number of neutralized test-only markers.
    pub test_only_markers: usize,
    /// Number of remapped package-derived strings.
    pub remapped_strings: usize,
}

#[derive(Clone, Debug)]
pub struct ManifestPatcher<'a> {
    pub metadata: &'a AppMetadata,
    pub test_only: TestOnlyStrategy,
    pub placeholder_package: &'a str,
    pub provider_suffixes: &'a [String],
}

impl ManifestPatcher<'_> {
    /// Apply the metadata, neutralize the test-only marker, and remap
    /// package-derived strings if the package changed.
    pub fn patch(&self, data: &[u8]) -> Result<PatchedManifest> {
        let mut editor = AxmlFieldEditor::parse(data)?;
        let old_package = editor.package_name().map(ToOwned::to_owned);

        apply_metadata(&mut editor, self.metadata)?;

        let new_package = editor.package_name().map(ToOwned::to_owned);

        let (mut data, test_only_markers) = match self.test_only {
            TestOnlyStrategy::BytePatch => {
                let mut data = editor.to_bytes()?;
                let count = axml::zero_pattern(&mut data, ATTR_TEST_ONLY);
                (data, count)
            }
            TestOnlyStrategy::RemoveAttribute => {
                let count = editor.document_mut().remove_attributes_by_id(ATTR_TEST_ONLY);
                (editor.to_bytes()?, count)
            }
        };

        if test_only_markers == 0 {
            warn!("Manifest has no test-only marker");
        } else {
            debug!(
                "Neutralized {test_only_markers} test-only markers with {}",
                self.test_only,
            );
        }

        let mut remapped_strings = 0;

        if let Some(new) = &new_package {
            if old_package.as_ref() != Some(new) {
                let mapping = authority_mapping(
                    old_package.as_deref(),
                    new,
                    self.placeholder_package,
                    self.provider_suffixes,
                );

                let (rewritten, count) = axml::rewrite_string_pool(&data, &mapping)?;
                data = rewritten;
                remapped_strings = count;

                if count == 0 {
                    info!("No provider authorities needed remapping");
                } else {
                    info!("Remapped {count} package-derived strings to {new}");
                }
            }
        }

        Ok(PatchedManifest {
            data,
            old_package,
            new_package,
            test_only_markers,
            remapped_strings,
        })
    }
}
