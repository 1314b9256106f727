//! Password-derived crypto provider.
//!
//! A fresh 32-byte data key is generated per file and wrapped by a
//! scrypt-derived key-encryption-key; the wrapped key, salt included, is
//! persisted in the `crypto` block.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_yaml::Mapping;

use crate::aead::DataKey;
use crate::error::{ConfigError, Result};
use crate::input::Prompt;
use crate::providers::traits::{ArgValue, Argument, CryptoProvider, ProviderArgs};

const VALIDATION_MIN_LENGTH: usize = 12;
const VALIDATION_DICTIONARY_FOLDER: &str = "/usr/share/dict";
const SALT_SIZE: usize = 12;
// N=2^15, r=8, p=1 — the 2017-era interactive-login recommendation from the
// scrypt paper.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

pub fn flags() -> Vec<Argument> {
    vec![
        Argument {
            name: "password",
            description: "A password to use for encryption and decryption",
            default: None,
            env_var_name: Some("CONFIG_PASSWORD"),
            repeatable: false,
            is_switch: false,
        },
        Argument {
            name: "skip-password-validation",
            description:
                "Skips password validation, potentially making encrypted secrets easier to crack",
            default: None,
            env_var_name: None,
            repeatable: false,
            is_switch: true,
        },
    ]
}

pub fn construct(args: &ProviderArgs) -> Result<Box<dyn CryptoProvider>> {
    let service = match args.get("key").and_then(ArgValue::as_str) {
        Some(key) => Some(PasswordService::from_persisted_key(key)?),
        None => None,
    };
    Ok(Box::new(PasswordProvider { service }))
}

fn key_from_password(password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|e| ConfigError::provider_error(format!("invalid scrypt parameters: {e}")))?;
    let mut output = vec![0u8; 32];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut output)
        .map_err(|e| ConfigError::provider_error(format!("scrypt derivation failed: {e}")))?;
    Ok(output)
}

struct PasswordService {
    encrypted_key: Vec<u8>,
    data_key: Option<DataKey>,
    salt: Vec<u8>,
}

impl PasswordService {
    fn generate(password: &str) -> Result<Self> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);

        let kek = DataKey::from_bytes(key_from_password(password, &salt)?);
        let file_key = DataKey::generate();
        let encrypted_key = kek.encrypt(file_key.as_bytes())?;

        Ok(PasswordService {
            encrypted_key,
            data_key: Some(file_key),
            salt,
        })
    }

    fn from_persisted_key(key: &str) -> Result<Self> {
        let bytes = BASE64.decode(key).map_err(|e| {
            ConfigError::parse_error(format!("crypto.key is not valid base64: {e}"))
        })?;
        if bytes.len() <= SALT_SIZE {
            return Err(ConfigError::parse_error("crypto.key is too short"));
        }
        let (salt, encrypted_key) = bytes.split_at(SALT_SIZE);
        Ok(PasswordService {
            encrypted_key: encrypted_key.to_vec(),
            data_key: None,
            salt: salt.to_vec(),
        })
    }

    fn serialize(&self) -> String {
        let mut encoded = self.salt.clone();
        encoded.extend_from_slice(&self.encrypted_key);
        BASE64.encode(encoded)
    }

    fn is_available(&self) -> bool {
        self.data_key.is_some()
    }

    fn decrypt_key(&mut self, password: &str) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }
        let kek = DataKey::from_bytes(key_from_password(password, &self.salt)?);
        let file_key = kek.decrypt(&self.encrypted_key).map_err(|_| {
            ConfigError::provider_error(format!(
                "could not initialize password service, invalid password: ({} bytes)",
                self.encrypted_key.len()
            ))
        })?;
        self.data_key = Some(DataKey::from_bytes(file_key));
        Ok(())
    }
}

pub struct PasswordProvider {
    service: Option<PasswordService>,
}

impl PasswordProvider {
    fn ready_for_crypto(&mut self, prompt: &dyn Prompt) -> Result<()> {
        let service = self
            .service
            .as_mut()
            .ok_or_else(|| ConfigError::provider_error("password provider has no key"))?;
        if service.is_available() {
            return Ok(());
        }
        let password = get_password("please enter this file's password", prompt)?;
        service.decrypt_key(&password)
    }
}

fn get_password(prompt_text: &str, prompt: &dyn Prompt) -> Result<String> {
    if let Ok(password) = std::env::var("CONFIG_PASSWORD") {
        return Ok(password);
    }
    let secret = prompt.read_secret(prompt_text, true)?;
    let secret = crate::input::check_input_size(secret)
        .map_err(|_| ConfigError::input_error("no password supplied"))?;
    Ok(String::from_utf8_lossy(&secret).into_owned())
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < VALIDATION_MIN_LENGTH {
        return Err(ConfigError::input_error(
            "chosen password is too short, please use at least 12 characters",
        ));
    }

    if is_in_system_dictionary(password) {
        return Err(ConfigError::input_error(
            "password seems easy to guess or has very low entropy",
        ));
    }

    if char_class_count(password) < 2 && password.len() < 20 {
        return Err(ConfigError::input_error(
            "password seems easy to guess or has very low entropy",
        ));
    }

    Ok(())
}

fn char_class_count(password: &str) -> usize {
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());
    [has_lower, has_upper, has_digit, has_symbol]
        .iter()
        .filter(|x| **x)
        .count()
}

fn is_in_system_dictionary(password: &str) -> bool {
    let lower = password.to_lowercase();
    let dir = Path::new(VALIDATION_DICTIONARY_FOLDER);
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(contents) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if contents
            .lines()
            .any(|line| line.trim().to_lowercase() == lower)
        {
            return true;
        }
    }
    false
}

#[async_trait]
impl CryptoProvider for PasswordProvider {
    fn name(&self) -> &'static str {
        "password"
    }

    fn enabled(&self) -> bool {
        self.service.is_some()
    }

    async fn replace(&mut self, args: &ProviderArgs, prompt: &dyn Prompt) -> Result<()> {
        let password = match args.get("password").and_then(ArgValue::as_str) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => get_password("enter the new password", prompt)?,
        };

        let skip_validation = args
            .get("skip-password-validation")
            .and_then(ArgValue::as_bool)
            .unwrap_or(false);

        if skip_validation {
            tracing::warn!("password complexity validation skipped");
        } else {
            validate_password(&password)?;
        }

        self.service = Some(PasswordService::generate(&password)?);
        Ok(())
    }

    fn serialize(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert("provider".into(), "password".into());
        if let Some(service) = &self.service {
            map.insert("key".into(), service.serialize().into());
        }
        map
    }

    async fn encrypt(&mut self, plaintext: &[u8], prompt: &dyn Prompt) -> Result<Vec<u8>> {
        self.ready_for_crypto(prompt)?;
        self.service
            .as_ref()
            .unwrap()
            .data_key
            .as_ref()
            .unwrap()
            .encrypt(plaintext)
    }

    async fn decrypt(&mut self, ciphertext: &[u8], prompt: &dyn Prompt) -> Result<String> {
        self.ready_for_crypto(prompt)?;
        self.service
            .as_ref()
            .unwrap()
            .data_key
            .as_ref()
            .unwrap()
            .decrypt_to_string(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedPrompt;

    #[tokio::test]
    async fn round_trips_through_replace_serialize_and_reload() {
        let mut provider = construct(&ProviderArgs::new()).unwrap();
        let mut args = ProviderArgs::new();
        args.insert(
            "password".into(),
            ArgValue::Str("correct-horse-battery".into()),
        );
        provider
            .replace(&args, &ScriptedPrompt::default())
            .await
            .unwrap();
        assert!(provider.enabled());

        let blob = provider
            .encrypt(b"top secret", &ScriptedPrompt::default())
            .await
            .unwrap();
        let serialized = provider.serialize();

        let mut reload_args = ProviderArgs::new();
        reload_args.insert(
            "key".into(),
            ArgValue::Str(serialized.get("key").unwrap().as_str().unwrap().to_string()),
        );
        let mut reloaded = construct(&reload_args).unwrap();
        std::env::set_var("CONFIG_PASSWORD", "correct-horse-battery");
        let plain = reloaded
            .decrypt(&blob, &ScriptedPrompt::default())
            .await
            .unwrap();
        std::env::remove_var("CONFIG_PASSWORD");
        assert_eq!(plain, "top secret");
    }

    #[test]
    fn rejects_short_passwords() {
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn accepts_reasonably_complex_passwords() {
        assert!(validate_password("Tr0ub4dor&3xyz").is_ok());
    }
}
