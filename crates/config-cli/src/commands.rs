//! Command implementations, mirroring the original tool's `get`/`set`/
//! `init`/`rekey` semantics.

use std::path::{Path, PathBuf};

use config_core::error::{ConfigError, Result};
use config_core::providers::{ArgValue, ProviderArgs};
use config_core::ConfigFile;
use serde_yaml::Value;

use crate::prompt::TerminalPrompt;

fn provider_args(
    key: Option<String>,
    recipients: Vec<String>,
    password: Option<String>,
) -> ProviderArgs {
    let mut args = ProviderArgs::new();
    if let Some(key) = key {
        args.insert("key".into(), ArgValue::Str(key));
    }
    if !recipients.is_empty() {
        args.insert("recipients".into(), ArgValue::List(recipients));
    }
    if let Some(password) = password {
        args.insert("password".into(), ArgValue::Str(password));
    }
    args
}

pub async fn get(file: &Path, key: Option<&str>) -> Result<()> {
    let prompt = TerminalPrompt;
    let mut config = ConfigFile::load(file)?;

    let value = match key {
        Some(key) => config.get(key, &prompt).await?,
        None => config.get_all(&prompt).await?,
    };

    print_value(&value);
    Ok(())
}

fn print_value(value: &Value) {
    match value {
        Value::Bool(_) | Value::Sequence(_) | Value::Mapping(_) => {
            let json = serde_yaml_value_to_json(value);
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_default()
            );
        }
        Value::String(s) => println!("{s}"),
        Value::Number(n) => println!("{n}"),
        Value::Null => println!("null"),
        Value::Tagged(t) => print_value(&t.value),
    }
}

fn serde_yaml_value_to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

pub async fn set(
    file: &Path,
    key: &str,
    value: Option<String>,
    input_file: Option<PathBuf>,
    plain_text: bool,
) -> Result<()> {
    if key == "crypto" || key.starts_with("crypto.") {
        return Err(ConfigError::input_error(
            "unable to modify `crypto` property, use `rekey` instead",
        ));
    }

    let prompt = TerminalPrompt;
    let mut config = ConfigFile::load(file)?;

    if !config.has_crypto() && !plain_text {
        return Err(ConfigError::input_error(format!(
            "unable to store an encrypted value for '{key}', use --plain-text to store as a non-encrypted value"
        )));
    }

    let bytes = match (value, input_file) {
        (Some(value), _) => value.into_bytes(),
        (None, Some(path)) => std::fs::read(path)?,
        (None, None) => {
            use config_core::input::{check_input_size, Prompt};
            check_input_size(prompt.read_secret(&format!("enter a value for {key}"), !plain_text)?)?
        }
    };

    if plain_text {
        config.set_plaintext_insecurely(key, &bytes)?;
    } else {
        config.set(key, &bytes, &prompt).await?;
    }

    std::fs::write(file, config.serialize()?)?;
    update_defaults_file(file, key);
    Ok(())
}

/// Best-effort: if a sibling `default`/`defaults` file with the same
/// extension exists and doesn't already define `key`, seed it with a null
/// placeholder so the key is discoverable. Failures here are swallowed.
fn update_defaults_file(target: &Path, key: &str) {
    let Some(stem) = target.file_stem().and_then(|s| s.to_str()) else {
        return;
    };
    if stem.starts_with("default") {
        return;
    }
    let Some(extension) = target.extension().and_then(|e| e.to_str()) else {
        return;
    };
    let Some(parent) = target.parent() else {
        return;
    };

    for candidate in ["default", "defaults"] {
        let defaults_path = parent.join(format!("{candidate}.{extension}"));
        if !defaults_path.exists() {
            continue;
        }

        let Ok(mut defaults) = ConfigFile::load(&defaults_path) else {
            continue;
        };
        if defaults.list_secrets().contains(&key.to_string()) {
            continue;
        }
        let Ok(()) = defaults.set_plaintext_insecurely(key, b"null") else {
            continue;
        };
        let Ok(serialized) = defaults.serialize() else {
            continue;
        };
        let _ = std::fs::write(&defaults_path, serialized);
        return;
    }
}

pub async fn init(
    file: &Path,
    provider: &str,
    key: Option<String>,
    recipients: Vec<String>,
    password: Option<String>,
) -> Result<()> {
    if file.exists() {
        return Err(ConfigError::input_error(format!(
            "a file at {} already exists, won't overwrite",
            file.display()
        )));
    }

    let prompt = TerminalPrompt;
    let args = provider_args(key, recipients, password);
    let config = ConfigFile::create(provider, &args, &prompt).await?;
    std::fs::write(file, config.serialize()?)?;
    Ok(())
}

pub async fn rekey(
    file: &Path,
    provider: Option<String>,
    key: Option<String>,
    recipients: Vec<String>,
    password: Option<String>,
) -> Result<()> {
    let prompt = TerminalPrompt;
    let mut original = ConfigFile::load(file)?;

    let provider = match provider {
        Some(provider) => provider,
        None => {
            let existing = original.provider_name().ok_or_else(|| {
                ConfigError::input_error(
                    "file has no crypto provider to reuse, pass --provider explicitly",
                )
            })?;
            tracing::warn!(provider = existing, "no --provider given, reusing the file's existing provider");
            existing.to_string()
        }
    };

    let args = provider_args(key, recipients, password);
    let rekeyed = original.rekey(&provider, &args, &prompt).await?;
    std::fs::write(file, rekeyed.serialize()?)?;
    Ok(())
}
