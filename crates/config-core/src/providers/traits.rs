//! The pluggable crypto-provider contract and its process-wide registry.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_yaml::Mapping;

use crate::error::{ConfigError, Result};
use crate::input::Prompt;

/// A single argument a provider needs to initialize or rekey.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: &'static str,
    pub description: &'static str,
    pub default: Option<&'static str>,
    pub env_var_name: Option<&'static str>,
    pub repeatable: bool,
    pub is_switch: bool,
}

/// A value supplied either from the persisted `crypto` block or from CLI
/// flags; both are modeled the same way since a freshly-created provider
/// replaces itself with CLI-supplied values immediately after construction.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Str(String),
    Bool(bool),
    List(Vec<String>),
}

pub type ProviderArgs = HashMap<String, ArgValue>;

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::List(l) => Some(l),
            _ => None,
        }
    }
}

/// What a provider implements to operate on secrets.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// The name this provider is registered under (`kms`, `gpg`, `password`).
    fn name(&self) -> &'static str;

    /// True iff this provider can immediately encrypt/decrypt without
    /// further user interaction.
    fn enabled(&self) -> bool;

    /// Reinitializes the provider to encrypt with new crypto values,
    /// prompting via `prompt` for anything not supplied in `args`.
    async fn replace(&mut self, args: &ProviderArgs, prompt: &dyn Prompt) -> Result<()>;

    /// Renders `{provider: <name>, ...}` plus whatever this provider needs
    /// to rehydrate itself via its constructor.
    fn serialize(&self) -> Mapping;

    /// Encrypts `plaintext`, prompting via `prompt` if the provider needs
    /// to lazily unwrap its data key first (GPG, password).
    async fn encrypt(&mut self, plaintext: &[u8], prompt: &dyn Prompt) -> Result<Vec<u8>>;

    async fn decrypt(&mut self, ciphertext: &[u8], prompt: &dyn Prompt) -> Result<String>;
}

pub type Constructor = fn(&ProviderArgs) -> Result<Box<dyn CryptoProvider>>;

pub struct Registration {
    pub constructor: Constructor,
    pub flags: Vec<Argument>,
}

static REGISTRY: OnceLock<HashMap<&'static str, Registration>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, Registration> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            "kms",
            Registration {
                constructor: crate::providers::kms::construct,
                flags: crate::providers::kms::flags(),
            },
        );
        map.insert(
            "gpg",
            Registration {
                constructor: crate::providers::gpg::construct,
                flags: crate::providers::gpg::flags(),
            },
        );
        map.insert(
            "password",
            Registration {
                constructor: crate::providers::password::construct,
                flags: crate::providers::password::flags(),
            },
        );
        map
    })
}

/// The names of every registered provider.
pub fn provider_list() -> Vec<&'static str> {
    registry().keys().copied().collect()
}

/// Every flag every registered provider accepts, concatenated.
pub fn available_flags() -> Vec<Argument> {
    registry().values().flat_map(|r| r.flags.clone()).collect()
}

pub fn initialize_provider(name: &str, args: &ProviderArgs) -> Result<Box<dyn CryptoProvider>> {
    let registration = registry()
        .get(name)
        .ok_or_else(|| ConfigError::input_error(format!("unknown provider <{name}>")))?;
    (registration.constructor)(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_three_providers() {
        let mut names = provider_list();
        names.sort();
        assert_eq!(names, vec!["gpg", "kms", "password"]);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        assert!(initialize_provider("nope", &ProviderArgs::new()).is_err());
    }
}
