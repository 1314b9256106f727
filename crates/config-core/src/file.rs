//! The `ConfigFile` façade: loads a YAML document, exposes its `crypto`
//! block as a provider, and navigates/encrypts/decrypts values by path.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, Result};
use crate::input::Prompt;
use crate::providers::{self, ArgValue, CryptoProvider, ProviderArgs};
use crate::yaml::Tree;

pub struct ConfigFile {
    data: Tree,
    crypto: Option<Box<dyn CryptoProvider>>,
}

const CRYPTO_KEY: &str = "crypto";

impl ConfigFile {
    /// Creates a brand-new config file, initializing `providerName` with
    /// `providerArgs` and persisting its serialized state under `crypto`.
    pub async fn create(
        provider_name: &str,
        provider_args: &ProviderArgs,
        prompt: &dyn Prompt,
    ) -> Result<Self> {
        let mut provider = providers::initialize_provider(provider_name, provider_args)?;
        provider.replace(provider_args, prompt).await?;

        let mut root = Mapping::new();
        root.insert(
            Value::String(CRYPTO_KEY.to_string()),
            Value::Mapping(provider.serialize()),
        );

        Ok(ConfigFile {
            data: Tree::from_value(Value::Mapping(root)),
            crypto: Some(provider),
        })
    }

    /// Loads an existing config file from disk, hydrating its provider from
    /// the persisted `crypto` block without prompting for anything.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = Tree::from_path(path)?;

        let crypto = match data.root().get(CRYPTO_KEY) {
            Some(Value::Mapping(map)) => {
                let provider_name = map
                    .get("provider")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| {
                        tracing::warn!("crypto.provider is unset, defaulting to kms");
                        "kms"
                    })
                    .to_string();

                Some(providers::initialize_provider(
                    &provider_name,
                    &mapping_to_args(map),
                )?)
            }
            Some(_) => {
                return Err(ConfigError::parse_error(format!(
                    "invalid config, the {CRYPTO_KEY} property is not a map"
                )))
            }
            None => None,
        };

        Ok(ConfigFile { data, crypto })
    }

    pub fn has_crypto(&self) -> bool {
        self.crypto.as_ref().is_some_and(|c| c.enabled())
    }

    /// The name of the loaded provider (`kms`, `gpg`, `password`), if any.
    pub fn provider_name(&self) -> Option<&'static str> {
        self.crypto.as_ref().map(|c| c.name())
    }

    /// Returns the raw node at `path`, decrypting it if it's an encrypted
    /// leaf.
    pub async fn get(&mut self, path: &str, prompt: &dyn Prompt) -> Result<Value> {
        let node = self.data.get(path)?.clone();
        self.decrypt_node(node, path, prompt).await
    }

    /// Decrypts every encrypted leaf reachable from the document root.
    pub async fn get_all(&mut self, prompt: &dyn Prompt) -> Result<Value> {
        let root = self.data.root().clone();
        self.decrypt_tree(root, prompt).await
    }

    fn decrypt_tree<'a>(
        &'a mut self,
        node: Value,
        prompt: &'a dyn Prompt,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + 'a>> {
        Box::pin(async move {
            if Tree::is_encrypted(&node) {
                return self.decrypt_node(node, "<value>", prompt).await;
            }

            match node {
                Value::Mapping(map) => {
                    let mut out = Mapping::new();
                    for (k, v) in map {
                        let decrypted = self.decrypt_tree(v, prompt).await?;
                        out.insert(k, decrypted);
                    }
                    Ok(Value::Mapping(out))
                }
                Value::Sequence(seq) => {
                    let mut out = Vec::with_capacity(seq.len());
                    for item in seq {
                        out.push(self.decrypt_tree(item, prompt).await?);
                    }
                    Ok(Value::Sequence(out))
                }
                other => Ok(other),
            }
        })
    }

    async fn decrypt_node(
        &mut self,
        node: Value,
        path: &str,
        prompt: &dyn Prompt,
    ) -> Result<Value> {
        if !Tree::is_encrypted(&node) {
            return Ok(node);
        }

        let provider = self
            .crypto
            .as_mut()
            .filter(|p| p.enabled())
            .ok_or(ConfigError::CryptoDisabled)?;

        let ciphertext = Tree::ciphertext_bytes(&node).map_err(|_| {
            ConfigError::parse_error(format!(
                "Failed decrypt, {path}.ciphertext is not valid base64"
            ))
        })?;

        let plaintext = provider.decrypt(&ciphertext, prompt).await?;
        Ok(Value::String(plaintext))
    }

    /// Encrypts `plaintext` under the active provider and writes it at
    /// `path`.
    pub async fn set(&mut self, path: &str, plaintext: &[u8], prompt: &dyn Prompt) -> Result<()> {
        if path == CRYPTO_KEY || path.starts_with("crypto.") {
            return Err(ConfigError::input_error(format!(
                "the `{CRYPTO_KEY}` property cannot be modified via set, use rekey instead"
            )));
        }
        if !self.has_crypto() {
            return Err(ConfigError::input_error(
                "cannot encrypt, provider is not enabled for encryption. See logs",
            ));
        }
        let node = self.encrypt_cipher_text(plaintext, prompt).await?;
        self.data.set(path, node)
    }

    async fn encrypt_cipher_text(
        &mut self,
        plaintext: &[u8],
        prompt: &dyn Prompt,
    ) -> Result<Value> {
        let mut hasher = Sha256::new();
        hasher.update(plaintext);
        let hash = hex::encode(hasher.finalize());

        let provider = self.crypto.as_mut().expect("has_crypto checked by caller");
        let ciphertext = provider.encrypt(plaintext, prompt).await?;

        let mut map = Mapping::new();
        map.insert("encrypted".into(), true.into());
        map.insert(
            "ciphertext".into(),
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, ciphertext).into(),
        );
        map.insert("hash".into(), hash.into());
        Ok(Value::Mapping(map))
    }

    /// Writes `plaintext` verbatim (parsed as JSON if possible, else as a
    /// raw string), bypassing encryption entirely.
    pub fn set_plaintext_insecurely(&mut self, path: &str, plaintext: &[u8]) -> Result<()> {
        if path == CRYPTO_KEY || path.starts_with("crypto.") {
            return Err(ConfigError::input_error(format!(
                "the `{CRYPTO_KEY}` property cannot be modified via set, use rekey instead"
            )));
        }
        let value = serde_json::from_slice::<Value>(plaintext)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(plaintext).into_owned()));
        self.data.set(path, value)
    }

    /// Every dot-path of an encrypted leaf reachable from the root. Does not
    /// descend past an encrypted leaf once found.
    pub fn list_secrets(&self) -> Vec<String> {
        secrets_for_node(self.data.root(), "")
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.data.serialize()
    }

    /// Builds a brand-new config file under `new_provider`/`new_args`,
    /// copying every non-`crypto` top-level node, and re-encrypts every
    /// secret under the new provider. The original file is untouched.
    pub async fn rekey(
        &mut self,
        new_provider: &str,
        new_args: &ProviderArgs,
        prompt: &dyn Prompt,
    ) -> Result<ConfigFile> {
        if !self.has_crypto() {
            return Err(ConfigError::CryptoDisabled);
        }

        let mut rekeyed = ConfigFile::create(new_provider, new_args, prompt).await?;

        let original_entries: Vec<(Value, Value)> = match self.data.root() {
            Value::Mapping(root) => root
                .iter()
                .filter(|(k, _)| k.as_str() != Some(CRYPTO_KEY))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };

        if !rekeyed.data.root().is_mapping() {
            *rekeyed.data.root_mut() = Value::Mapping(Mapping::new());
        }
        let rekeyed_root = rekeyed
            .data
            .root_mut()
            .as_mapping_mut()
            .expect("normalized above");
        for (key, value) in original_entries {
            rekeyed_root.insert(key, value);
        }

        for path in self.list_secrets() {
            let value = self.get(&path, prompt).await?;
            let restringified = value_to_go_style_string(&value);
            rekeyed.set(&path, restringified.as_bytes(), prompt).await?;
        }

        Ok(rekeyed)
    }
}

/// Mirrors `fmt.Sprintf("%s", value)` against a decoded YAML scalar: scalars
/// print bare, everything else round-trips through YAML.
fn value_to_go_style_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

fn secrets_for_node(node: &Value, prefix: &str) -> Vec<String> {
    if Tree::is_encrypted(node) {
        return vec![prefix.trim_start_matches('.').to_string()];
    }

    let mut paths = Vec::new();
    match node {
        Value::Mapping(map) => {
            for (key, value) in map {
                if let Some(key) = key.as_str() {
                    let child_prefix = format!("{prefix}.{key}");
                    paths.extend(secrets_for_node(value, &child_prefix));
                }
            }
        }
        Value::Sequence(seq) => {
            for (index, value) in seq.iter().enumerate() {
                let child_prefix = format!("{prefix}.{index}");
                paths.extend(secrets_for_node(value, &child_prefix));
            }
        }
        _ => {}
    }
    paths
}

fn mapping_to_args(map: &Mapping) -> ProviderArgs {
    let mut args = ProviderArgs::new();
    for (key, value) in map {
        let Some(key) = key.as_str() else { continue };
        let arg_value = match value {
            Value::String(s) => ArgValue::Str(s.clone()),
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Sequence(seq) => ArgValue::List(
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            other => ArgValue::Str(serde_yaml::to_string(other).unwrap_or_default()),
        };
        args.insert(key.to_string(), arg_value);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedPrompt;

    #[tokio::test]
    async fn create_load_set_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut args = ProviderArgs::new();
        args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        let prompt = ScriptedPrompt::default();

        let mut file = ConfigFile::create("password", &args, &prompt)
            .await
            .unwrap();
        file.set("db.password", b"hunter2", &prompt).await.unwrap();
        std::fs::write(&path, file.serialize().unwrap()).unwrap();

        std::env::set_var("CONFIG_PASSWORD", "correct-horse-battery");
        let mut reloaded = ConfigFile::load(&path).unwrap();
        assert!(reloaded.has_crypto());
        let value = reloaded.get("db.password", &prompt).await.unwrap();
        std::env::remove_var("CONFIG_PASSWORD");
        assert_eq!(value.as_str(), Some("hunter2"));
    }

    #[tokio::test]
    async fn set_without_crypto_is_rejected_unless_plaintext() {
        let path = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(path.path(), "a: 1\n").unwrap();
        let mut file = ConfigFile::load(path.path()).unwrap();
        let prompt = ScriptedPrompt::default();
        assert!(file.set("a", b"2", &prompt).await.is_err());
        file.set_plaintext_insecurely("a", b"2").unwrap();
        assert_eq!(file.data.get("a").unwrap().as_i64(), Some(2));
    }

    #[test]
    fn list_secrets_does_not_descend_past_an_encrypted_leaf() {
        let data = Tree::from_bytes(
            b"top:\n  secret:\n    encrypted: true\n    ciphertext: aGVsbG8=\n    hash: abc\n  plain: 1\n",
        )
        .unwrap();
        let file = ConfigFile { data, crypto: None };
        assert_eq!(file.list_secrets(), vec!["top.secret".to_string()]);
    }

    #[tokio::test]
    async fn set_on_crypto_or_crypto_child_is_rejected() {
        let mut args = ProviderArgs::new();
        args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        let prompt = ScriptedPrompt::default();
        let mut file = ConfigFile::create("password", &args, &prompt)
            .await
            .unwrap();

        assert!(file.set("crypto", b"x", &prompt).await.is_err());
        assert!(file.set("crypto.anything", b"x", &prompt).await.is_err());
    }

    #[tokio::test]
    async fn ciphertext_corruption_produces_the_expected_message() {
        let mut args = ProviderArgs::new();
        args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        let prompt = ScriptedPrompt::default();
        let mut file = ConfigFile::create("password", &args, &prompt)
            .await
            .unwrap();

        let mut map = Mapping::new();
        map.insert("encrypted".into(), true.into());
        map.insert("ciphertext".into(), "not-valid-base64!!".into());
        map.insert("hash".into(), "abc".into());
        file.data.set("secret", Value::Mapping(map)).unwrap();

        let err = file.get("secret", &prompt).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "parse error: Failed decrypt, secret.ciphertext is not valid base64"
        );
    }

    #[tokio::test]
    async fn password_round_trip_preserves_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut args = ProviderArgs::new();
        args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        let prompt = ScriptedPrompt::default();

        let mut file = ConfigFile::create("password", &args, &prompt)
            .await
            .unwrap();
        file.set("secret", "\u{1f92b}".as_bytes(), &prompt)
            .await
            .unwrap();
        std::fs::write(&path, file.serialize().unwrap()).unwrap();

        std::env::set_var("CONFIG_PASSWORD", "correct-horse-battery");
        let mut reloaded = ConfigFile::load(&path).unwrap();
        let value = reloaded.get("secret", &prompt).await.unwrap();
        std::env::remove_var("CONFIG_PASSWORD");
        assert_eq!(value.as_str(), Some("\u{1f92b}"));
    }

    #[tokio::test]
    async fn rekey_preserves_the_set_of_secrets_and_their_plaintext() {
        let mut old_args = ProviderArgs::new();
        old_args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        let prompt = ScriptedPrompt::default();

        let mut original = ConfigFile::create("password", &old_args, &prompt)
            .await
            .unwrap();
        original.set("db.password", b"s", &prompt).await.unwrap();
        original.set("api.token", b"t", &prompt).await.unwrap();
        original
            .set_plaintext_insecurely("db.host", b"localhost")
            .unwrap();

        let before = original.list_secrets();

        let mut new_args = ProviderArgs::new();
        new_args.insert("password".into(), ArgValue::Str("abcdefghijkl2".into()));
        let mut rekeyed = original
            .rekey("password", &new_args, &prompt)
            .await
            .unwrap();

        let after = rekeyed.list_secrets();
        let mut before_sorted = before.clone();
        let mut after_sorted = after.clone();
        before_sorted.sort();
        after_sorted.sort();
        assert_eq!(before_sorted, after_sorted);

        for path in &before {
            let original_value = original.get(path, &prompt).await.unwrap();
            let rekeyed_value = rekeyed.get(path, &prompt).await.unwrap();
            assert_eq!(original_value, rekeyed_value);
        }

        assert_eq!(
            rekeyed.data.get("db.host").unwrap().as_str(),
            Some("localhost")
        );
    }
}
