use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::info;

use crate::config::BuildOptions;
use crate::placeholder::{PLACEHOLDER_ENV, PlaceholderToken};

const DIAGNOSTICS_ENV: [(&str, &str); 2] =
    [("EXPO_UNSTABLE_ATLAS", "true"), ("DEBUG", "expo:atlas*")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BundlerCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("failed to start bundler `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bundler `{command}` failed with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// Runs the bundler to completion in the application directory.
///
/// Stdio is inherited so the bundler's own diagnostics reach the operator.
pub fn invoke(options: &BuildOptions, token: &PlaceholderToken) -> Result<(), BundlerError> {
    let bundler = &options.bundler;
    let mut command = Command::new(&bundler.program);
    command
        .args(&bundler.args)
        .current_dir(&options.app_dir)
        .env(PLACEHOLDER_ENV, token.as_str());

    if options.diagnostics {
        info!("Running {} with diagnostics enabled", bundler.display());
        for (key, value) in DIAGNOSTICS_ENV {
            info!("{key}: {value}");
            command.env(key, value);
        }
    } else {
        info!("Running {} (diagnostics disabled)", bundler.display());
        info!("To capture build analysis, pass --diagnostics or set ENABLE_EXPO_ATLAS=true");
    }

    let status = command.status().map_err(|source| BundlerError::Spawn {
        program: bundler.program.clone(),
        source,
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(BundlerError::Failed {
            command: bundler.display(),
            status,
        })
    }
}
