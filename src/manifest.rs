use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{OptionalArtifact, list_files};

pub const MANIFEST_FILE: &str = "metadata.json";
pub const MANIFEST_VERSION: u32 = 0;
pub const BUNDLER_NAME: &str = "metro";

/// Script chunks for the web platform, relative to the publish directory.
pub const SCRIPT_DIR: &str = "_expo/static/js/web";
pub const STYLE_DIR: &str = "_expo/static/css";

const BUNDLE_MARKER: &str = "entry-";
const CSS_MARKER: &str = "web-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub version: u32,
    pub bundler: String,
    pub file_metadata: FileMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub web: WebFileMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebFileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

impl BuildManifest {
    pub fn new(bundle: Option<String>, css: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            bundler: BUNDLER_NAME.to_string(),
            file_metadata: FileMetadata {
                web: WebFileMetadata { bundle, css },
            },
        }
    }

    pub fn bundle(&self) -> Option<&str> {
        self.file_metadata.web.bundle.as_deref()
    }

    pub fn css(&self) -> Option<&str> {
        self.file_metadata.web.css.as_deref()
    }
}

/// Picks the first file starting with `marker`, else the first file at all.
pub fn find_entry(dir: &Path, extension: &str, marker: &str) -> OptionalArtifact {
    let names = list_files(dir, extension);
    names
        .iter()
        .find(|name| name.starts_with(marker))
        .or_else(|| names.first())
        .map(|name| OptionalArtifact::Found(dir.join(name)))
        .unwrap_or(OptionalArtifact::Absent)
}

pub fn generate_manifest(publish_dir: &Path) -> Result<BuildManifest> {
    let bundle = find_entry(&publish_dir.join(SCRIPT_DIR), "js", BUNDLE_MARKER);
    let css = find_entry(&publish_dir.join(STYLE_DIR), "css", CSS_MARKER);

    let manifest = BuildManifest::new(
        bundle.file_name().map(|name| format!("{SCRIPT_DIR}/{name}")),
        css.file_name().map(|name| format!("{STYLE_DIR}/{name}")),
    );

    let manifest_path = publish_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    info!(
        "Generated {MANIFEST_FILE} with bundle: {}, css: {}",
        bundle.file_name().as_deref().unwrap_or("none"),
        css.file_name().as_deref().unwrap_or("none")
    );
    Ok(manifest)
}
