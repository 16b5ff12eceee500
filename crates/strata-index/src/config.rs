use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkerConfig, ChunkerKind};
use crate::error::{RagError, Result};
use crate::retry::RetryConfig;
use crate::search::SearchConfig;
use crate::source::DirectoryConfig;
use crate::store::StoreConfig;
use crate::watcher::WatcherConfig;

/// Top-level settings, loaded from TOML with `STRATA_*` overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`RagError::Config`] for an inconsistent chunker or an empty
    /// store name.
    pub fn validate(&self) -> Result<()> {
        if self.store.name.trim().is_empty() {
            return Err(RagError::Config("store name must not be empty".into()));
        }
        self.chunker
            .validate()
            .map_err(|e| RagError::Config(format!("invalid chunker configuration: {e}")))?;
        if self.search.top_k == 0 {
            return Err(RagError::Config("search top_k must be positive".into()));
        }
        if self.watcher.channel_capacity == 0 {
            return Err(RagError::Config("watcher channel capacity must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_store();
        self.apply_env_overrides_pipeline();
    }

    fn apply_env_overrides_store(&mut self) {
        if let Ok(v) = std::env::var("STRATA_STORE_NAME")
            && !v.trim().is_empty()
        {
            self.store.name = v;
        }
        if let Ok(v) = std::env::var("STRATA_COLLECTION") {
            self.store.collection = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = std::env::var("STRATA_MAX_CONCURRENT") {
            if let Ok(n) = v.parse::<usize>() {
                self.store.max_concurrent = n;
            } else {
                tracing::warn!("ignoring invalid STRATA_MAX_CONCURRENT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_INCREMENTAL") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.store.incremental = enabled;
            } else {
                tracing::warn!("ignoring invalid STRATA_INCREMENTAL value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_CHECKPOINT_DIR")
            && !v.is_empty()
        {
            self.store.checkpoint.dir = Some(PathBuf::from(v));
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("STRATA_CHUNK_STRATEGY") {
            match v.parse::<ChunkerKind>() {
                Ok(kind) => self.chunker.strategy = kind,
                Err(_) => tracing::warn!("ignoring invalid STRATA_CHUNK_STRATEGY value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("STRATA_CHUNK_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                self.chunker.size = size;
            } else {
                tracing::warn!("ignoring invalid STRATA_CHUNK_SIZE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_CHUNK_OVERLAP") {
            if let Ok(overlap) = v.parse::<usize>() {
                self.chunker.overlap = overlap;
            } else {
                tracing::warn!("ignoring invalid STRATA_CHUNK_OVERLAP value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_RETRY_MAX") {
            if let Ok(n) = v.parse::<u32>() {
                self.retry.max_retries = n;
            } else {
                tracing::warn!("ignoring invalid STRATA_RETRY_MAX value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_SEARCH_TOP_K") {
            if let Ok(n) = v.parse::<usize>() {
                self.search.top_k = n;
            } else {
                tracing::warn!("ignoring invalid STRATA_SEARCH_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_SEARCH_HYDE") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.search.hyde = enabled;
            } else {
                tracing::warn!("ignoring invalid STRATA_SEARCH_HYDE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_SEARCH_RERANK") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.search.rerank = enabled;
            } else {
                tracing::warn!("ignoring invalid STRATA_SEARCH_RERANK value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_SEARCH_MULTI_QUERY") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.search.multi_query = enabled;
            } else {
                tracing::warn!("ignoring invalid STRATA_SEARCH_MULTI_QUERY value: {v}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    const ENV_KEYS: [&str; 13] = [
        "STRATA_STORE_NAME",
        "STRATA_COLLECTION",
        "STRATA_MAX_CONCURRENT",
        "STRATA_INCREMENTAL",
        "STRATA_CHUNK_STRATEGY",
        "STRATA_CHUNK_SIZE",
        "STRATA_CHUNK_OVERLAP",
        "STRATA_RETRY_MAX",
        "STRATA_SEARCH_TOP_K",
        "STRATA_SEARCH_HYDE",
        "STRATA_SEARCH_RERANK",
        "STRATA_SEARCH_MULTI_QUERY",
        "STRATA_CHECKPOINT_DIR",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        clear_env();
        let config = RagConfig::load(Path::new("/nonexistent/strata.toml")).unwrap();
        assert_eq!(config, RagConfig::default());
        assert_eq!(config.store.name, "default");
        assert_eq!(config.chunker.size, 1000);
        assert_eq!(config.chunker.overlap, 200);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.watcher.debounce_ms, 100);
        assert!(config.store.checkpoint.enabled);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn parses_partial_toml() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[store]
name = "docs"
max_concurrent = 4
incremental = true

[chunker]
strategy = "semantic"
size = 500
overlap = 50

[search]
hyde = true
threshold = 0.3

[directory]
path = "/srv/docs"
include = ["**/*.md"]
"#
        )
        .unwrap();

        let config = RagConfig::load(file.path()).unwrap();
        assert_eq!(config.store.name, "docs");
        assert_eq!(config.store.max_concurrent, 4);
        assert!(config.store.incremental);
        assert_eq!(config.chunker.strategy, ChunkerKind::Semantic);
        assert_eq!(config.chunker.size, 500);
        assert_eq!(config.chunker.max_size, 2000);
        assert!(config.search.hyde);
        assert_eq!(config.search.threshold, Some(0.3));
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.directory.path, PathBuf::from("/srv/docs"));
        assert!(config.directory.exclude_dirs.iter().any(|d| d == ".git"));
    }

    #[test]
    #[serial]
    fn malformed_toml_is_an_error() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[store\nname = ").unwrap();
        let err = RagConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        clear_env();
        unsafe {
            std::env::set_var("STRATA_STORE_NAME", "kb");
            std::env::set_var("STRATA_COLLECTION", "kb_chunks");
            std::env::set_var("STRATA_MAX_CONCURRENT", "2");
            std::env::set_var("STRATA_INCREMENTAL", "true");
            std::env::set_var("STRATA_CHUNK_STRATEGY", "Overlapping");
            std::env::set_var("STRATA_CHUNK_SIZE", "400");
            std::env::set_var("STRATA_CHUNK_OVERLAP", "40");
            std::env::set_var("STRATA_RETRY_MAX", "0");
            std::env::set_var("STRATA_SEARCH_TOP_K", "5");
            std::env::set_var("STRATA_SEARCH_HYDE", "true");
            std::env::set_var("STRATA_SEARCH_RERANK", "true");
            std::env::set_var("STRATA_SEARCH_MULTI_QUERY", "true");
            std::env::set_var("STRATA_CHECKPOINT_DIR", "/tmp/strata-ckpt");
        }

        let config = RagConfig::load(Path::new("/nonexistent/strata.toml")).unwrap();
        clear_env();

        assert_eq!(config.store.name, "kb");
        assert_eq!(config.store.collection.as_deref(), Some("kb_chunks"));
        assert_eq!(config.store.max_concurrent, 2);
        assert!(config.store.incremental);
        assert_eq!(config.chunker.strategy, ChunkerKind::Overlapping);
        assert_eq!(config.chunker.size, 400);
        assert_eq!(config.chunker.overlap, 40);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.search.top_k, 5);
        assert!(config.search.hyde && config.search.rerank && config.search.multi_query);
        assert_eq!(config.store.checkpoint.dir, Some(PathBuf::from("/tmp/strata-ckpt")));
    }

    #[test]
    #[serial]
    fn invalid_env_values_are_ignored() {
        clear_env();
        unsafe {
            std::env::set_var("STRATA_MAX_CONCURRENT", "many");
            std::env::set_var("STRATA_CHUNK_STRATEGY", "fractal");
            std::env::set_var("STRATA_SEARCH_HYDE", "sometimes");
        }
        let config = RagConfig::load(Path::new("/nonexistent/strata.toml")).unwrap();
        clear_env();

        assert_eq!(config.store.max_concurrent, 0);
        assert_eq!(config.chunker.strategy, ChunkerKind::default());
        assert!(!config.search.hyde);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = RagConfig::default();
        config.chunker.overlap = config.chunker.size;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));

        let mut config = RagConfig::default();
        config.chunker.size = 0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.store.name = "  ".into();
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.search.top_k = 0;
        assert!(config.validate().is_err());
    }
}
