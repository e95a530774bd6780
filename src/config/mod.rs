//! Configuration loading and validation.
//!
//! Defines the [`ConfigSource`] trait for pluggable config formats, the
//! [`ConfigVersion`] content hash reported by `/health`, and
//! [`discover`] which picks a source from an explicit path or the
//! well-known file names in the working directory. Submodules provide the
//! data model, validation logic, and concrete source implementations.

pub mod model;
pub mod sources;
pub mod validation;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::FulcrumError;
use model::Config;

/// File names probed, in order, when no `--config` is given.
pub const CANDIDATES: [&str; 4] = [
    "fulcrum.yaml",
    "fulcrum.yml",
    "fulcrum.json",
    "fulcrum.toml",
];

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl ConfigVersion {
    /// First eight hex digits of the hash.
    #[must_use]
    pub fn short(&self) -> &str {
        match self {
            Self::Hash(h) => h.get(..8).unwrap_or(h),
        }
    }
}

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>
// and native async fn in traits (Rust 1.75+) does not support dyn dispatch.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn location(&self) -> String;
    async fn load(&self) -> Result<(Config, ConfigVersion), FulcrumError>;
}

/// Resolve the config source for `run`: the explicit path when given,
/// otherwise the first of [`CANDIDATES`] present in the working directory.
pub async fn discover(explicit: Option<&Path>) -> Result<Box<dyn ConfigSource>, FulcrumError> {
    if let Some(path) = explicit {
        return sources::from_path(path);
    }

    for name in &CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return sources::from_path(&path);
        }
    }

    Err(FulcrumError::NoConfigSource {
        hint: "Provide --config <file> or create ./fulcrum.yaml.\n  \
               Run 'fulcrum init' to create a config file."
            .into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_version_truncates_hash() {
        let version = ConfigVersion::Hash("0123456789abcdef".into());
        assert_eq!(version.short(), "01234567");
        assert_eq!(ConfigVersion::Hash("abc".into()).short(), "abc");
    }

    #[tokio::test]
    async fn explicit_path_with_unknown_extension_is_rejected() {
        let result = discover(Some(Path::new("fulcrum.ini"))).await;
        assert!(matches!(result, Err(FulcrumError::UnsupportedFormat(ext)) if ext == "ini"));
    }
}
