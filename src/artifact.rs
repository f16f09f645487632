use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Result of looking for a file the build may or may not have produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalArtifact {
    Found(PathBuf),
    Absent,
}

impl OptionalArtifact {
    pub fn locate(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_file() {
            OptionalArtifact::Found(path)
        } else {
            OptionalArtifact::Absent
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            OptionalArtifact::Found(path) => Some(path),
            OptionalArtifact::Absent => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, OptionalArtifact::Found(_))
    }

    pub fn file_name(&self) -> Option<String> {
        self.path()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
    }
}

pub fn locate_candidates(base: &Path, candidates: &[&str]) -> Vec<OptionalArtifact> {
    candidates
        .iter()
        .map(|candidate| OptionalArtifact::locate(base.join(candidate)))
        .collect()
}

/// Regular files in `dir` ending in `.{extension}`, in lexical order.
pub fn list_files(dir: &Path, extension: &str) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if dir.exists() {
                warn!("Could not list {}: {err}", dir.display());
            }
            return Vec::new();
        }
    };

    let suffix = format!(".{extension}");
    let mut names = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(&suffix))
        .collect::<Vec<_>>();
    names.sort();
    names
}
