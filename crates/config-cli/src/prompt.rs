//! A terminal [`Prompt`] backed by `dialoguer`.

use std::io::{IsTerminal, Read};

use config_core::error::{ConfigError, Result};
use config_core::input::{check_input_size, Prompt};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, MultiSelect, Password, Select};

pub struct TerminalPrompt;

/// Reads stdin to EOF, capped at [`config_core::input::MAX_SECRET_SIZE`].
fn read_stdin_raw() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .map_err(|e| ConfigError::input_error(format!("failed reading stdin: {e}")))?;
    check_input_size(buf)
}

impl Prompt for TerminalPrompt {
    fn select_one(&self, items: &[String], label: &str) -> Result<String> {
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .items(items)
            .default(0)
            .interact()
            .map_err(|e| ConfigError::input_error(format!("prompt failed: {e}")))?;
        Ok(items[index].clone())
    }

    fn select_many(&self, items: &[String], label: &str) -> Result<Vec<String>> {
        let indices = MultiSelect::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .items(items)
            .interact()
            .map_err(|e| ConfigError::input_error(format!("prompt failed: {e}")))?;

        if indices.is_empty() {
            return Err(ConfigError::input_error("no selection made"));
        }
        Ok(indices.into_iter().map(|i| items[i].clone()).collect())
    }

    fn read_password(&self, label: &str) -> Result<String> {
        if !std::io::stdin().is_terminal() {
            let bytes = read_stdin_raw()?;
            return String::from_utf8(bytes)
                .map_err(|_| ConfigError::input_error("stdin input was not valid utf-8"));
        }
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .interact()
            .map_err(|e| ConfigError::input_error(format!("prompt failed: {e}")))
    }

    fn read_secret(&self, label: &str, mask: bool) -> Result<Vec<u8>> {
        if !std::io::stdin().is_terminal() {
            return read_stdin_raw();
        }
        if mask {
            return Ok(self.read_password(label)?.into_bytes());
        }
        let value: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .interact_text()
            .map_err(|e| ConfigError::input_error(format!("prompt failed: {e}")))?;
        Ok(value.into_bytes())
    }
}
