//! Secret retrieval.
//!
//! The hosted deployment injects a secret provider; everywhere else the
//! process environment is the fallback, which keeps local development and
//! tests free of extra machinery.

use std::collections::HashMap;

/// Yields named secrets on demand.
pub trait SecretProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed map of secrets (tests, embedded deployments).
#[derive(Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new(values: impl IntoIterator<Item = (String, String)>) -> Self {
        StaticSecrets {
            values: values.into_iter().collect(),
        }
    }
}

impl SecretProvider for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Resolve `name` from the provider, falling back to the environment.
pub fn resolve(provider: &dyn SecretProvider, name: &str) -> Option<String> {
    provider.get(name).or_else(|| EnvSecrets.get(name))
}
