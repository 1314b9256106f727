//! GPG-backed crypto provider.
//!
//! A fresh 32-byte data key is generated per file and sealed to one or more
//! recipients as an armored OpenPGP message; AEAD (see [`crate::aead`]) then
//! wraps every value under that data key. Recipients' public keys and the
//! decryption of the sealed data key are delegated to the local `gpg`
//! installation, matching how this provider's original implementation
//! talked to a running `gpg-agent`.

use std::io::Write;
use std::process::{Command, Stdio};

use async_trait::async_trait;
use pgp::composed::{Deserializable, Message, SignedPublicKey};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use serde_yaml::Mapping;

use crate::aead::DataKey;
use crate::error::{ConfigError, Result};
use crate::input::Prompt;
use crate::providers::traits::{ArgValue, Argument, CryptoProvider, ProviderArgs};

pub fn flags() -> Vec<Argument> {
    vec![Argument {
        name: "public-key",
        description: "The gpg public key identity to use (fingerprint or email), can be specified multiple times.",
        default: None,
        env_var_name: None,
        repeatable: true,
        is_switch: false,
    }]
}

pub fn construct(args: &ProviderArgs) -> Result<Box<dyn CryptoProvider>> {
    let key = args.get("key").and_then(ArgValue::as_str);
    let recipients = args.get("recipients").and_then(ArgValue::as_list);

    let service = match (key, recipients) {
        (Some(key), Some(recipients)) => Some(GpgService::from_persisted(key, recipients.to_vec())),
        _ => None,
    };

    Ok(Box::new(GpgProvider { service }))
}

struct GpgService {
    encrypted_key: String,
    data_key: Option<DataKey>,
    recipients: Vec<String>,
}

impl GpgService {
    fn generate(recipients: Vec<String>) -> Result<Self> {
        let file_key = DataKey::generate();
        let encrypted_key = gpg_encrypt_to_recipients(file_key.as_bytes(), &recipients)?;

        Ok(GpgService {
            encrypted_key,
            data_key: Some(file_key),
            recipients,
        })
    }

    fn from_persisted(encrypted_key: &str, recipients: Vec<String>) -> Self {
        GpgService {
            encrypted_key: encrypted_key.to_string(),
            data_key: None,
            recipients,
        }
    }

    fn is_available(&self) -> bool {
        self.data_key.is_some()
    }

    fn decrypt_key(&mut self) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }
        let plain = gpg_decrypt(&self.encrypted_key)?;
        self.data_key = Some(DataKey::from_bytes(plain));
        Ok(())
    }
}

pub struct GpgProvider {
    service: Option<GpgService>,
}

impl GpgProvider {
    fn ready_for_crypto(&mut self) -> Result<()> {
        let service = self.service.as_mut().ok_or(ConfigError::CryptoDisabled)?;
        service.decrypt_key()
    }
}

#[async_trait]
impl CryptoProvider for GpgProvider {
    fn name(&self) -> &'static str {
        "gpg"
    }

    fn enabled(&self) -> bool {
        self.service.is_some()
    }

    async fn replace(&mut self, args: &ProviderArgs, prompt: &dyn Prompt) -> Result<()> {
        let recipients = if let Some(list) = args.get("recipients").and_then(ArgValue::as_list) {
            list.to_vec()
        } else if let Some(list) = args.get("public-key").and_then(ArgValue::as_list) {
            list.to_vec()
        } else {
            tracing::debug!("no gpg recipients specified, querying agent for keys");
            let keys = gpg_list_public_keys()?;
            prompt.select_many(&keys, "select a gpg identity")?
        };

        self.service = Some(GpgService::generate(recipients)?);
        Ok(())
    }

    fn serialize(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert("provider".into(), "gpg".into());
        if let Some(service) = &self.service {
            map.insert("key".into(), service.encrypted_key.clone().into());
            map.insert("recipients".into(), service.recipients.to_vec().into());
        }
        map
    }

    async fn encrypt(&mut self, plaintext: &[u8], _prompt: &dyn Prompt) -> Result<Vec<u8>> {
        self.ready_for_crypto()?;
        self.service
            .as_ref()
            .unwrap()
            .data_key
            .as_ref()
            .unwrap()
            .encrypt(plaintext)
    }

    async fn decrypt(&mut self, ciphertext: &[u8], _prompt: &dyn Prompt) -> Result<String> {
        self.ready_for_crypto()?;
        self.service
            .as_ref()
            .unwrap()
            .data_key
            .as_ref()
            .unwrap()
            .decrypt_to_string(ciphertext)
    }
}

/// Exports each recipient's public key from the local keyring and OpenPGP-
/// encrypts `plaintext` to all of them, armored.
fn gpg_encrypt_to_recipients(plaintext: &[u8], recipients: &[String]) -> Result<String> {
    let mut keys = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let armored = gpg_export_public_key(recipient)?;
        let (key, _headers) =
            SignedPublicKey::from_armor_single(armored.as_slice()).map_err(|e| {
                ConfigError::provider_error(format!("could not parse key for {recipient}: {e}"))
            })?;
        keys.push(key);
    }
    let key_refs: Vec<&SignedPublicKey> = keys.iter().collect();

    let message = Message::new_literal_bytes("data-key", plaintext);
    let mut rng = rand::thread_rng();
    let encrypted = message
        .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, &key_refs)
        .map_err(|e| ConfigError::provider_error(format!("gpg encryption failed: {e}")))?;

    encrypted
        .to_armored_string(Default::default())
        .map_err(|e| ConfigError::provider_error(format!("could not armor gpg message: {e}")))
}

fn gpg_export_public_key(identity: &str) -> Result<Vec<u8>> {
    let output = Command::new("gpg")
        .args(["--armor", "--export", identity])
        .output()
        .map_err(|e| ConfigError::provider_error(format!("could not run gpg: {e}")))?;
    if !output.status.success() || output.stdout.is_empty() {
        return Err(ConfigError::provider_error(format!(
            "could not find a key for {identity}"
        )));
    }
    Ok(output.stdout)
}

fn gpg_list_public_keys() -> Result<Vec<String>> {
    let output = Command::new("gpg")
        .args(["--list-public-keys", "--with-colons"])
        .output()
        .map_err(|e| ConfigError::provider_error(format!("could not run gpg: {e}")))?;
    if !output.status.success() {
        return Err(ConfigError::provider_error("unable to list all keys"));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut emails = Vec::new();
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("uid:") {
            let fields: Vec<&str> = rest.split(':').collect();
            if let Some(uid) = fields.get(8) {
                if let Some(start) = uid.find('<') {
                    if let Some(end) = uid.find('>') {
                        if end > start {
                            emails.push(uid[start + 1..end].to_string());
                        }
                    }
                }
            }
        }
    }
    Ok(emails)
}

/// Decrypts an armored gpg message using the local secret keyring /
/// gpg-agent, returning the plaintext bytes.
fn gpg_decrypt(armored: &str) -> Result<Vec<u8>> {
    let mut child = Command::new("gpg")
        .args(["--batch", "--yes", "--decrypt"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ConfigError::provider_error(format!("could not run gpg: {e}")))?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(armored.as_bytes())
        .map_err(|e| ConfigError::provider_error(format!("could not write to gpg: {e}")))?;

    let output = child
        .wait_with_output()
        .map_err(|e| ConfigError::provider_error(format!("gpg decrypt failed: {e}")))?;

    if !output.status.success() {
        return Err(ConfigError::provider_error(format!(
            "gpg decrypt failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(output.stdout)
}
