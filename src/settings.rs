//! Resolved runtime settings.
//!
//! Each key is looked up in order: command-line flag, `DOCVEC_<KEY>`
//! environment variable, the value stored in [`ConfigDb`], then the
//! built-in default.

use std::{fmt, str::FromStr, sync::Arc};

use serde::Serialize;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    embedding::{DEFAULT_BATCH_SIZE, DEFAULT_DIMENSION, Embedder, HashEmbedder},
    error::{Error, Result},
    manager::IndexOptions,
    ollama::{self, OllamaEmbedder},
};

/// Every key understood by [`Settings::set`].
pub const KEYS: &[&str] = &[
    "chunk_size",
    "chunk_overlap",
    "dimension",
    "batch_size",
    "embedder",
    "ollama_url",
    "ollama_model",
];

const ENV_PREFIX: &str = "DOCVEC_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Hash,
    Ollama,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(EmbedderKind::Hash),
            "ollama" => Ok(EmbedderKind::Ollama),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected 'hash' or 'ollama')"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmbedderKind::Hash => "hash",
            EmbedderKind::Ollama => "ollama",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub dimension: usize,
    pub batch_size: usize,
    pub embedder: EmbedderKind,
    pub ollama_url: String,
    pub ollama_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            dimension: DEFAULT_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
            embedder: EmbedderKind::Hash,
            ollama_url: ollama::DEFAULT_URL.to_string(),
            ollama_model: ollama::DEFAULT_MODEL.to_string(),
        }
    }
}

impl Settings {
    /// Resolve settings from flags, the process environment and `db`.
    pub fn resolve(db: &ConfigDb, flags: &[(&str, String)]) -> Result<Self> {
        Self::resolve_with(db, flags, |key| {
            std::env::var(format!("{ENV_PREFIX}{}", key.to_ascii_uppercase()))
                .ok()
        })
    }

    /// Like [`Settings::resolve`] with an explicit environment lookup.
    pub fn resolve_with(
        db: &ConfigDb,
        flags: &[(&str, String)],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Settings::default();

        for &key in KEYS {
            let flag = flags
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone());
            let value = match flag.or_else(|| env(key)) {
                Some(value) => Some(value),
                None => db.get_setting(key)?,
            };
            if let Some(value) = value {
                settings.set(key, &value)?;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Parse and assign one key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "chunk_size" => self.chunk_size = parse_number(key, value)?,
            "chunk_overlap" => self.chunk_overlap = parse_number(key, value)?,
            "dimension" => self.dimension = parse_number(key, value)?,
            "batch_size" => self.batch_size = parse_number(key, value)?,
            "embedder" => self.embedder = value.parse()?,
            "ollama_url" => self.ollama_url = value.trim().to_string(),
            "ollama_model" => self.ollama_model = value.trim().to_string(),
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "chunk_size" => self.chunk_size.to_string(),
            "chunk_overlap" => self.chunk_overlap.to_string(),
            "dimension" => self.dimension.to_string(),
            "batch_size" => self.batch_size.to_string(),
            "embedder" => self.embedder.to_string(),
            "ollama_url" => self.ollama_url.clone(),
            "ollama_model" => self.ollama_model.clone(),
            _ => return Err(unknown_key(key)),
        })
    }

    pub fn validate(&self) -> Result<()> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
            .map_err(|e| Error::Config(e.to_string()))?;
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.embedder == EmbedderKind::Ollama && self.ollama_url.is_empty()
        {
            return Err(Error::Config("ollama_url must not be empty".into()));
        }
        Ok(())
    }

    pub fn index_options(&self) -> Result<IndexOptions> {
        Ok(IndexOptions {
            chunking: ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
                .map_err(|e| Error::Config(e.to_string()))?,
            dimension: self.dimension,
            batch_size: self.batch_size,
        })
    }

    pub fn build_embedder(&self) -> Arc<dyn Embedder> {
        match self.embedder {
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(self.dimension)),
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
                &self.ollama_url,
                &self.ollama_model,
                self.dimension,
            )),
        }
    }
}

/// Check that `value` is acceptable for `key` before it is stored.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    Settings::default().set(key, value)
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}

fn unknown_key(key: &str) -> Error {
    Error::Config(format!(
        "unknown setting '{key}' (known: {})",
        KEYS.join(", ")
    ))
}
