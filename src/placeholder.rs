use std::fmt;

use anyhow::{Result, anyhow};
use chrono::Utc;
use rand::Rng;

/// Environment variable the bundler reads the placeholder from.
pub const PLACEHOLDER_ENV: &str = "WCPOS_BASEURL_PLACEHOLDER";

const SUFFIX_LEN: usize = 13;
const SUFFIX_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Per-build marker the bundler bakes into emitted base-URL literals.
///
/// The leading slash keeps the bundler treating it as an absolute base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderToken(String);

impl PlaceholderToken {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect();
        Self(format!(
            "/__WCPOS_BASEURL_PLACEHOLDER_{}_{}__",
            Utc::now().timestamp_millis(),
            suffix
        ))
    }

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(anyhow!("placeholder must not be empty"));
        }
        if value.contains('"') {
            return Err(anyhow!("placeholder must not contain a double quote"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaceholderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
