//! Provider registry: maps a provider scheme to a client factory.
//!
//! Provider ids are URI-like. A bare id (`gemini`, `openai`) is a scheme
//! with no host; a full URI (`bedrock://bedrock.us-east-1.amazonaws.com`)
//! carries host and query parameters to the factory so regions, endpoint
//! overrides, and deployment names do not multiply CLI flags.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;
use url::Url;

use super::error::LlmError;
use super::traits::Client;

/// Environment variable consulted when no provider id is given.
pub const LLM_CLIENT_ENV: &str = "LLM_CLIENT";

/// Parsed form of a provider id handed to factories.
#[derive(Debug, Clone)]
pub struct ProviderUri {
    pub scheme: String,
    pub host: Option<String>,
    pub query: Vec<(String, String)>,
}

impl ProviderUri {
    /// Parse a provider id. `gemini` and `bedrock://host?k=v` both work.
    pub fn parse(provider_id: &str) -> Result<Self, LlmError> {
        let trimmed = provider_id.trim();
        if trimmed.is_empty() {
            return Err(LlmError::configuration("provider id is empty"));
        }
        if !trimmed.contains("://") {
            return Ok(Self {
                scheme: trimmed.to_ascii_lowercase(),
                host: None,
                query: Vec::new(),
            });
        }
        let url = Url::parse(trimmed).map_err(|err| {
            LlmError::configuration(format!("parsing provider id {trimmed:?}: {err}"))
        })?;
        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().map(str::to_string),
            query: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        })
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub type FactoryFn = dyn Fn(&ProviderUri) -> Result<Arc<dyn Client>, LlmError> + Send + Sync;

#[derive(Default)]
struct Registry {
    factories: HashMap<String, Arc<FactoryFn>>,
    // Registration after the first lookup is rejected so tests and the
    // interactive loop always observe one consistent catalog.
    frozen: bool,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: std::sync::OnceLock<RwLock<Registry>> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

/// Register a factory for a provider scheme. Fails on duplicates and on
/// registration after the first lookup.
pub fn register<F>(id: &str, factory: F) -> Result<(), LlmError>
where
    F: Fn(&ProviderUri) -> Result<Arc<dyn Client>, LlmError> + Send + Sync + 'static,
{
    let mut reg = registry().write().expect("provider registry poisoned");
    if reg.frozen {
        return Err(LlmError::configuration(format!(
            "provider {id:?} registered after registry was first used"
        )));
    }
    let key = id.to_ascii_lowercase();
    if reg.factories.contains_key(&key) {
        return Err(LlmError::configuration(format!(
            "provider {id:?} is already registered"
        )));
    }
    reg.factories.insert(key, Arc::new(factory));
    Ok(())
}

/// Build a client for the given provider id, falling back to the
/// `LLM_CLIENT` environment variable when the id is empty.
pub fn new_client(provider_id: &str) -> Result<Arc<dyn Client>, LlmError> {
    let id = if provider_id.trim().is_empty() {
        std::env::var(LLM_CLIENT_ENV).ok().unwrap_or_default()
    } else {
        provider_id.to_string()
    };
    if id.trim().is_empty() {
        return Err(LlmError::configuration(format!(
            "no provider selected: pass --llm-provider or set {LLM_CLIENT_ENV}"
        )));
    }

    let uri = ProviderUri::parse(&id)?;
    let factory = {
        let mut reg = registry().write().expect("provider registry poisoned");
        reg.frozen = true;
        reg.factories.get(&uri.scheme).cloned()
    };
    let factory = factory.ok_or_else(|| {
        LlmError::configuration(format!("provider {:?} not registered", uri.scheme))
    })?;

    debug!(scheme = uri.scheme.as_str(), host = ?uri.host, "building LLM client");
    factory(&uri)
}

/// Install the built-in provider adapters. Safe to call once per process;
/// duplicate registration errors are surfaced to the caller.
pub fn register_defaults() -> Result<(), LlmError> {
    super::providers::register_all()
}

/// Test-only: drop all registrations and unfreeze the registry.
pub fn reset_for_tests() {
    let mut reg = registry().write().expect("provider registry poisoned");
    reg.factories.clear();
    reg.frozen = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_scheme() {
        let uri = ProviderUri::parse("gemini").expect("parses");
        assert_eq!(uri.scheme, "gemini");
        assert!(uri.host.is_none());
    }

    #[test]
    fn parses_full_uri_with_query() {
        let uri =
            ProviderUri::parse("bedrock://bedrock.us-east-1.amazonaws.com?profile=p").expect("parses");
        assert_eq!(uri.scheme, "bedrock");
        assert_eq!(uri.host.as_deref(), Some("bedrock.us-east-1.amazonaws.com"));
        assert_eq!(uri.query_param("profile"), Some("p"));
    }

    #[test]
    fn empty_provider_id_is_rejected() {
        let err = ProviderUri::parse("   ").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
