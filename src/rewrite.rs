use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::artifact::list_files;
use crate::placeholder::PlaceholderToken;

pub const CDN_BASE_EXPR: &str = r#"(window.cdnBaseUrl||"")"#;
pub const BASE_URL_EXPR: &str = r#"(window.baseUrl||"")"#;

const CHUNK_PREFIX: &str = "/_expo";
const ASSET_PREFIX: &str = "/assets";
/// Absolute chunk path emitted by bundlers that predate the placeholder.
const LEGACY_CHUNK_PATH: &str = "\"/_expo/static/js/web/";

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(
        "no placeholder references were rewritten in {dir}; the bundler output format may have changed (pass --allow-unmatched to continue anyway)"
    )]
    NoMatches { dir: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkReplacements {
    pub expo: usize,
    pub assets: usize,
    pub legacy: usize,
}

impl ChunkReplacements {
    pub fn total(&self) -> usize {
        self.expo + self.assets + self.legacy
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub files_scanned: usize,
    pub files_updated: usize,
    pub replacements: usize,
}

pub fn rewrite_chunk_references(
    content: &str,
    token: &PlaceholderToken,
) -> (String, ChunkReplacements) {
    let (rewritten, expo) = replace_counted(
        content,
        &format!("\"{token}{CHUNK_PREFIX}"),
        &format!("{CDN_BASE_EXPR}+\"{CHUNK_PREFIX}"),
    );
    let (rewritten, assets) = replace_counted(
        &rewritten,
        &format!("\"{token}{ASSET_PREFIX}"),
        &format!("{CDN_BASE_EXPR}+\"{ASSET_PREFIX}"),
    );
    let (rewritten, legacy) = prefix_legacy_chunk_paths(&rewritten);
    (
        rewritten,
        ChunkReplacements {
            expo,
            assets,
            legacy,
        },
    )
}

pub fn rewrite_base_url_references(content: &str, token: &PlaceholderToken) -> (String, usize) {
    replace_counted(content, &format!("\"{token}\""), BASE_URL_EXPR)
}

pub fn rewrite_chunk_references_in(dir: &Path, token: &PlaceholderToken) -> Result<RewriteReport> {
    info!("Replacing chunk references with configurable CDN URLs");
    let report = rewrite_scripts(dir, |file, content| {
        let (rewritten, counts) = rewrite_chunk_references(content, token);
        if counts.total() > 0 {
            info!(
                "Updated {file}: {} _expo, {} assets, {} old pattern references replaced",
                counts.expo, counts.assets, counts.legacy
            );
        }
        (rewritten, counts.total())
    })?;
    info!("Total chunk references replaced: {}", report.replacements);
    Ok(report)
}

pub fn rewrite_base_url_references_in(
    dir: &Path,
    token: &PlaceholderToken,
) -> Result<RewriteReport> {
    info!("Replacing baseUrl references with configurable window.baseUrl");
    let report = rewrite_scripts(dir, |file, content| {
        let (rewritten, count) = rewrite_base_url_references(content, token);
        if count > 0 {
            info!("Updated {file}: {count} baseUrl references replaced");
        }
        (rewritten, count)
    })?;
    info!("Total baseUrl references replaced: {}", report.replacements);
    Ok(report)
}

/// Whether any script in `dir` already carries a runtime lookup from an earlier pass.
pub fn contains_runtime_lookups(dir: &Path) -> Result<bool> {
    for file in list_files(dir, "js") {
        let path = dir.join(&file);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        if content.contains(CDN_BASE_EXPR) || content.contains(BASE_URL_EXPR) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies `rewrite` to every script in `dir`, writing back only files that changed.
///
/// An unreadable or unwritable script aborts the pass.
fn rewrite_scripts<F>(dir: &Path, mut rewrite: F) -> Result<RewriteReport>
where
    F: FnMut(&str, &str) -> (String, usize),
{
    let mut report = RewriteReport::default();
    let files = list_files(dir, "js");
    if files.is_empty() {
        info!("No JavaScript files found to process");
        return Ok(report);
    }

    for file in files {
        let path = dir.join(&file);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        report.files_scanned += 1;

        let (rewritten, count) = rewrite(&file, &content);
        if count == 0 {
            continue;
        }
        fs::write(&path, rewritten)
            .with_context(|| format!("failed to write script {}", path.display()))?;
        report.files_updated += 1;
        report.replacements += count;
    }
    Ok(report)
}

fn replace_counted(content: &str, pattern: &str, replacement: &str) -> (String, usize) {
    let count = content.matches(pattern).count();
    if count == 0 {
        (content.to_string(), 0)
    } else {
        (content.replace(pattern, replacement), count)
    }
}

// Occurrences already behind the CDN expression are left alone, so a second
// run is a no-op.
fn prefix_legacy_chunk_paths(content: &str) -> (String, usize) {
    let guard = format!("{CDN_BASE_EXPR}+");
    let mut out = String::with_capacity(content.len());
    let mut count = 0;
    let mut last = 0;
    for (idx, _) in content.match_indices(LEGACY_CHUNK_PATH) {
        out.push_str(&content[last..idx]);
        if !content[..idx].ends_with(&guard) {
            out.push_str(&guard);
            count += 1;
        }
        out.push_str(LEGACY_CHUNK_PATH);
        last = idx + LEGACY_CHUNK_PATH.len();
    }
    out.push_str(&content[last..]);
    (out, count)
}
