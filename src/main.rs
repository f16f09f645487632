use anyhow::Result;
use bundle_cdn::Config;
use bundle_cdn::config::Mode;
use bundle_cdn::{pipeline, server};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .without_time()
        .init();
}

async fn run() -> Result<()> {
    let config = Config::from_cli()?;
    match &config.mode {
        Mode::Build(_) | Mode::Postprocess(_) => {
            tokio::task::spawn_blocking(move || pipeline::run(&config)).await??;
            Ok(())
        }
        Mode::Serve(_) => server::run_server(config).await,
    }
}
