use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::artifact::{OptionalArtifact, locate_candidates};
use crate::bundler;
use crate::config::{BuildOptions, Config, Mode};
use crate::manifest::{BuildManifest, SCRIPT_DIR, generate_manifest};
use crate::placeholder::PlaceholderToken;
use crate::rewrite::{
    RewriteError, contains_runtime_lookups, rewrite_base_url_references_in,
    rewrite_chunk_references_in,
};

/// Places the bundler may leave its build-analysis output, relative to the app dir.
const DIAGNOSTICS_CANDIDATES: [&str; 4] = [
    ".expo/atlas.jsonl",
    "atlas.jsonl",
    "_expo/atlas.jsonl",
    "web-build/atlas.jsonl",
];

pub fn run(config: &Config) -> Result<BuildManifest> {
    match &config.mode {
        Mode::Build(opts) => build(&config.publish_dir, opts),
        Mode::Postprocess(opts) => {
            postprocess(&config.publish_dir, &opts.placeholder, opts.strict_patterns)
        }
        Mode::Serve(_) => Err(anyhow!("the serve command does not run the build pipeline")),
    }
}

pub fn build(publish_dir: &Path, options: &BuildOptions) -> Result<BuildManifest> {
    info!("Starting build process...");
    let token = PlaceholderToken::generate();
    info!("Generated unique baseUrl placeholder: {token}");

    prepare(publish_dir, options)?;
    bundler::invoke(options, &token)?;

    let diagnostics = if options.diagnostics {
        find_diagnostics(&options.app_dir)
    } else {
        Vec::new()
    };

    info!("Copying build files...");
    let copied = copy_dir_all(&options.bundler_output_dir, publish_dir)?;
    info!(
        "Copied {copied} files from {} to {}",
        options.bundler_output_dir.display(),
        publish_dir.display()
    );
    copy_diagnostics(&diagnostics, publish_dir);

    let manifest = postprocess(publish_dir, &token, options.strict_patterns)?;

    info!("Build completed successfully!");
    info!("Files available in: {}", publish_dir.display());
    info!("Bundle: {}", manifest.bundle().unwrap_or("not found"));
    info!("CSS: {}", manifest.css().unwrap_or("not found"));
    Ok(manifest)
}

/// Clears every directory a previous build could have left behind.
pub fn prepare(publish_dir: &Path, options: &BuildOptions) -> Result<()> {
    clean_directory(publish_dir)?;
    fs::create_dir_all(publish_dir)
        .with_context(|| format!("failed to create {}", publish_dir.display()))?;
    info!("Created directory: {}", publish_dir.display());

    clean_directory(&options.bundler_output_dir)?;
    clean_directory(&options.cache_dir)?;
    Ok(())
}

/// Rewrites placeholder references in the published scripts, then writes the manifest.
pub fn postprocess(
    publish_dir: &Path,
    token: &PlaceholderToken,
    strict_patterns: bool,
) -> Result<BuildManifest> {
    let script_dir = publish_dir.join(SCRIPT_DIR);

    info!("Processing chunk references...");
    let chunks = rewrite_chunk_references_in(&script_dir, token)?;
    info!("Processing baseUrl references...");
    let base_urls = rewrite_base_url_references_in(&script_dir, token)?;

    if chunks.files_scanned > 0 && chunks.replacements + base_urls.replacements == 0 {
        if contains_runtime_lookups(&script_dir)? {
            info!("Scripts in {} are already rewritten", script_dir.display());
        } else if strict_patterns {
            return Err(RewriteError::NoMatches { dir: script_dir }.into());
        } else {
            warn!(
                "No placeholder references found in {}; the bundler output format may have changed",
                script_dir.display()
            );
        }
    }

    info!("Generating metadata...");
    generate_manifest(publish_dir)
}

pub fn find_diagnostics(app_dir: &Path) -> Vec<OptionalArtifact> {
    info!("Checking for Atlas output files...");
    let found = locate_candidates(app_dir, &DIAGNOSTICS_CANDIDATES)
        .into_iter()
        .filter(OptionalArtifact::is_found)
        .collect::<Vec<_>>();

    if found.is_empty() {
        warn!("No Atlas files found in expected locations; Atlas may not have been generated");
    }
    for artifact in &found {
        if let Some(path) = artifact.path() {
            info!("Atlas file found: {}", path.display());
        }
    }
    found
}

fn copy_diagnostics(artifacts: &[OptionalArtifact], publish_dir: &Path) {
    for artifact in artifacts {
        let (Some(path), Some(name)) = (artifact.path(), artifact.file_name()) else {
            continue;
        };
        let dest = publish_dir.join(&name);
        match fs::copy(path, &dest) {
            Ok(_) => info!("Copied Atlas file: {name} -> {}", dest.display()),
            Err(err) => warn!("Failed to copy Atlas file {name}: {err}"),
        }
    }
}

fn clean_directory(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        info!("Cleaned directory: {}", dir.display());
    }
    Ok(())
}

/// Copies the contents of `src` into `dest`, returning the number of files copied.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(anyhow!(
            "bundler output directory {} does not exist",
            src.display()
        ));
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}
