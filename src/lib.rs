pub mod artifact;
pub mod bundler;
pub mod config;
pub mod manifest;
pub mod pipeline;
pub mod placeholder;
pub mod rewrite;
pub mod server;

pub use config::Config;
