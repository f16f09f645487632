use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};

use crate::bundler::BundlerCommand;
use crate::placeholder::{PLACEHOLDER_ENV, PlaceholderToken};

const DEFAULT_BUNDLER: &str = "npx";
const DEFAULT_BUNDLER_ARGS: [&str; 5] = [
    "expo",
    "export",
    "--output-dir",
    "./web-build",
    "--platform=web",
];

#[derive(Debug, Parser)]
#[command(
    name = "bundle-cdn",
    version,
    about = "Package a web bundle for CDN delivery and serve it for local development."
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Directory the processed bundle is published to.
    #[arg(long, global = true, env = "BUNDLE_CDN_PUBLISH_DIR", default_value = "build")]
    pub publish_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bundler, rewrite base-URL references and write metadata.json.
    Build(BuildArgs),
    /// Rewrite an already published bundle using an existing placeholder.
    Postprocess(PostprocessArgs),
    /// Serve the publish directory over HTTP, simulating a CDN origin.
    Serve(ServeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    /// Application directory the bundler runs in.
    #[arg(long, env = "BUNDLE_CDN_APP_DIR", default_value = "../main")]
    pub app_dir: PathBuf,

    /// Bundler output directory, relative to the application directory.
    #[arg(long, default_value = "web-build")]
    pub bundler_output: PathBuf,

    /// Bundler cache directory, relative to the application directory. Cleared before every build.
    #[arg(long, default_value = ".expo")]
    pub cache_dir: PathBuf,

    /// Bundler executable.
    #[arg(long, default_value = DEFAULT_BUNDLER)]
    pub bundler: String,

    /// Argument passed to the bundler. Repeat for several arguments.
    #[arg(
        long = "bundler-arg",
        allow_hyphen_values = true,
        default_values = DEFAULT_BUNDLER_ARGS
    )]
    pub bundler_args: Vec<String>,

    /// Ask the bundler for build-analysis output and copy it into the publish directory.
    #[arg(long, env = "ENABLE_EXPO_ATLAS", value_parser = parse_opt_in)]
    pub diagnostics: bool,

    /// Only warn when no placeholder reference is found in the emitted scripts.
    #[arg(long)]
    pub allow_unmatched: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PostprocessArgs {
    /// Placeholder the bundle was built with.
    #[arg(long, env = PLACEHOLDER_ENV)]
    pub placeholder: String,

    /// Only warn when no placeholder reference is found in the emitted scripts.
    #[arg(long)]
    pub allow_unmatched: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "BUNDLE_CDN_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "PORT", default_value_t = 4567)]
    pub port: u16,

    /// URL path prefix the publish directory is mounted under.
    #[arg(long, env = "BUNDLE_CDN_MOUNT", default_value = "build")]
    pub mount: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub publish_dir: PathBuf,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Build(BuildOptions),
    Postprocess(PostprocessOptions),
    Serve(ServeOptions),
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub app_dir: PathBuf,
    pub bundler_output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub bundler: BundlerCommand,
    pub diagnostics: bool,
    pub strict_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct PostprocessOptions {
    pub placeholder: PlaceholderToken,
    pub strict_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub bind: IpAddr,
    pub port: u16,
    pub mount: String,
}

impl Config {
    pub fn from_cli() -> Result<Self> {
        let cli = Cli::parse();
        Config::from_parts(cli.common, cli.command)
    }

    fn from_parts(common: CommonArgs, command: Command) -> Result<Self> {
        let mode = match command {
            Command::Build(args) => {
                if args.bundler.trim().is_empty() {
                    return Err(anyhow!("bundler executable must not be empty"));
                }
                Mode::Build(BuildOptions {
                    bundler_output_dir: args.app_dir.join(&args.bundler_output),
                    cache_dir: args.app_dir.join(&args.cache_dir),
                    app_dir: args.app_dir,
                    bundler: BundlerCommand {
                        program: args.bundler,
                        args: args.bundler_args,
                    },
                    diagnostics: args.diagnostics,
                    strict_patterns: !args.allow_unmatched,
                })
            }
            Command::Postprocess(args) => Mode::Postprocess(PostprocessOptions {
                placeholder: PlaceholderToken::new(args.placeholder)?,
                strict_patterns: !args.allow_unmatched,
            }),
            Command::Serve(args) => Mode::Serve(ServeOptions {
                bind: args.bind,
                port: args.port,
                mount: normalize_mount(&args.mount)?,
            }),
        };

        Ok(Self {
            publish_dir: common.publish_dir,
            mode,
        })
    }

    pub fn serve_options(&self) -> Option<&ServeOptions> {
        if let Mode::Serve(opts) = &self.mode {
            Some(opts)
        } else {
            None
        }
    }
}

/// Only the literal `true` opts in; any other value leaves the feature off.
fn parse_opt_in(value: &str) -> Result<bool, std::convert::Infallible> {
    Ok(value == "true")
}

/// Strips surrounding slashes so `/build/` and `build` mount the same way.
pub fn normalize_mount(mount: &str) -> Result<String> {
    let trimmed = mount.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(anyhow!("mount path must not be empty"));
    }
    if trimmed.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(anyhow!("invalid mount path: {mount}"));
    }
    Ok(trimmed.to_string())
}
