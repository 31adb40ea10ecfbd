//! Environment-driven settings for the embedding provider and pipeline.

use std::str::FromStr;

use crate::{EmbeddingModelConfig, Error, Provider, Result, DEFAULT_TOP_K, EMBED_BATCH_SIZE};

/// Settings read from `CLEAVE_*` environment variables.
///
/// | Variable | Default |
/// |----------|---------|
/// | `CLEAVE_EMBED_PROVIDER` | `ollama` |
/// | `CLEAVE_EMBED_URL` | `http://localhost:11434` |
/// | `CLEAVE_EMBED_MODEL` | `nomic-embed-text` |
/// | `CLEAVE_EMBED_DIMENSIONS` | `768` |
/// | `CLEAVE_QUERY_PREFIX` | none |
/// | `CLEAVE_DOCUMENT_PREFIX` | none |
/// | `CLEAVE_EMBED_API_KEY` | none |
/// | `CLEAVE_BATCH_SIZE` | `50` |
/// | `CLEAVE_TOP_K` | `5` |
///
/// Empty values count as unset.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Provider protocol.
    pub provider: Provider,
    /// Provider base URL.
    pub url: String,
    /// Model name.
    pub model: String,
    /// Output vector length.
    pub dimensions: usize,
    /// Prefix for query texts.
    pub query_prefix: Option<String>,
    /// Prefix for document texts.
    pub document_prefix: Option<String>,
    /// Bearer key for OpenAI-compatible servers.
    pub api_key: Option<String>,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Results retrieved per phrase.
    pub top_k: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            query_prefix: None,
            document_prefix: None,
            api_key: None,
            batch_size: EMBED_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, after loading `.env` if
    /// one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    ///
    /// ```rust
    /// use cleave::{Provider, Settings};
    ///
    /// let settings = Settings::from_lookup(|key| match key {
    ///     "CLEAVE_EMBED_PROVIDER" => Some("openai".into()),
    ///     "CLEAVE_TOP_K" => Some("10".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(settings.provider, Provider::OpenAiCompatible);
    /// assert_eq!(settings.top_k, 10);
    /// assert_eq!(settings.batch_size, 50);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] for unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            provider: parse_or(get("CLEAVE_EMBED_PROVIDER"), "CLEAVE_EMBED_PROVIDER", defaults.provider)?,
            url: get("CLEAVE_EMBED_URL").unwrap_or(defaults.url),
            model: get("CLEAVE_EMBED_MODEL").unwrap_or(defaults.model),
            dimensions: parse_or(get("CLEAVE_EMBED_DIMENSIONS"), "CLEAVE_EMBED_DIMENSIONS", defaults.dimensions)?,
            query_prefix: get("CLEAVE_QUERY_PREFIX"),
            document_prefix: get("CLEAVE_DOCUMENT_PREFIX"),
            api_key: get("CLEAVE_EMBED_API_KEY"),
            batch_size: parse_or(get("CLEAVE_BATCH_SIZE"), "CLEAVE_BATCH_SIZE", defaults.batch_size)?,
            top_k: parse_or(get("CLEAVE_TOP_K"), "CLEAVE_TOP_K", defaults.top_k)?,
        })
    }

    /// The validated model description these settings name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] if the model config is invalid.
    pub fn model_config(&self) -> Result<EmbeddingModelConfig> {
        let mut builder = EmbeddingModelConfig::builder(&self.model, self.provider, self.dimensions)
            .endpoint(&self.url);
        if let Some(prefix) = &self.query_prefix {
            builder = builder.query_prefix(prefix);
        }
        if let Some(prefix) = &self.document_prefix {
            builder = builder.document_prefix(prefix);
        }
        builder.build()
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::InvalidModelConfig(format!("{key}={raw:?}: {e}"))),
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("query_prefix", &self.query_prefix)
            .field("document_prefix", &self.document_prefix)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("batch_size", &self.batch_size)
            .field("top_k", &self.top_k)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.model_config().is_ok());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings = Settings::from_lookup(lookup(&[("CLEAVE_EMBED_MODEL", ""), ("CLEAVE_QUERY_PREFIX", " ")]))
            .unwrap();
        assert_eq!(settings.model, "nomic-embed-text");
        assert_eq!(settings.query_prefix, None);
    }

    #[test]
    fn test_prefixes_reach_model_config() {
        let settings = Settings::from_lookup(lookup(&[
            ("CLEAVE_QUERY_PREFIX", "search_query: "),
            ("CLEAVE_DOCUMENT_PREFIX", "search_document: "),
        ]))
        .unwrap();
        let model = settings.model_config().unwrap();
        assert_eq!(model.query_prefix(), Some("search_query: "));
        assert_eq!(model.document_prefix(), Some("search_document: "));
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let err = Settings::from_lookup(lookup(&[("CLEAVE_TOP_K", "five")])).unwrap_err();
        assert!(err.to_string().contains("CLEAVE_TOP_K"));
    }

    #[test]
    fn test_api_key_redacted() {
        let settings = Settings::from_lookup(lookup(&[("CLEAVE_EMBED_API_KEY", "sk-secret")])).unwrap();
        assert!(!format!("{settings:?}").contains("sk-secret"));
    }
}
