//! Interactive-prompt abstraction, so core crypto logic is testable with a
//! scripted driver instead of a real terminal.

use crate::error::{ConfigError, Result};

/// How long a secret read from stdin (not a TTY) may be before it's
/// truncated with a warning.
pub const MAX_SECRET_SIZE: usize = 4 * 1024;

/// User-facing prompts a provider may need during `replace`.
pub trait Prompt: Send + Sync {
    /// Offers `items` under `label`, returning exactly one.
    fn select_one(&self, items: &[String], label: &str) -> Result<String>;

    /// Offers `items` under `label`, returning one or more.
    fn select_many(&self, items: &[String], label: &str) -> Result<Vec<String>>;

    /// Reads a password, masking input if connected to a TTY.
    fn read_password(&self, label: &str) -> Result<String>;

    /// Reads an arbitrary secret value, capped at [`MAX_SECRET_SIZE`] bytes.
    fn read_secret(&self, label: &str, mask: bool) -> Result<Vec<u8>>;
}

/// A driver for tests: returns scripted answers in order, erroring if it
/// runs out or if a selection isn't one of the offered items.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: std::sync::Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: Vec<&str>) -> Self {
        ScriptedPrompt {
            answers: std::sync::Mutex::new(answers.into_iter().map(String::from).rev().collect()),
        }
    }

    fn next(&self) -> Result<String> {
        self.answers
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ConfigError::input_error("no more scripted answers"))
    }
}

impl Prompt for ScriptedPrompt {
    fn select_one(&self, items: &[String], _label: &str) -> Result<String> {
        let answer = self.next()?;
        if !items.contains(&answer) {
            return Err(ConfigError::input_error(format!(
                "{answer} is not one of the offered items"
            )));
        }
        Ok(answer)
    }

    fn select_many(&self, items: &[String], label: &str) -> Result<Vec<String>> {
        Ok(vec![self.select_one(items, label)?])
    }

    fn read_password(&self, _label: &str) -> Result<String> {
        self.next()
    }

    fn read_secret(&self, _label: &str, _mask: bool) -> Result<Vec<u8>> {
        Ok(self.next()?.into_bytes())
    }
}

/// Truncates `bytes` to [`MAX_SECRET_SIZE`], warning if anything was
/// discarded. Errors if `bytes` is empty.
pub fn check_input_size(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Err(ConfigError::input_error("input was empty"));
    }

    if bytes.len() > MAX_SECRET_SIZE {
        tracing::warn!(
            max = MAX_SECRET_SIZE,
            "supplied more bytes than the limit, discarding the remainder"
        );
        return Ok(bytes[..MAX_SECRET_SIZE].to_vec());
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        assert!(check_input_size(Vec::new()).is_err());
    }

    #[test]
    fn truncates_oversized_input() {
        let big = vec![b'a'; MAX_SECRET_SIZE + 100];
        let truncated = check_input_size(big).unwrap();
        assert_eq!(truncated.len(), MAX_SECRET_SIZE);
    }

    #[test]
    fn scripted_prompt_replays_answers_in_order() {
        let prompt = ScriptedPrompt::new(vec!["first", "second"]);
        assert_eq!(prompt.read_password("p").unwrap(), "first");
        assert_eq!(prompt.read_password("p").unwrap(), "second");
        assert!(prompt.read_password("p").is_err());
    }

    #[test]
    fn select_one_rejects_answers_outside_the_offered_set() {
        let prompt = ScriptedPrompt::new(vec!["not-in-list"]);
        let items = vec!["a".to_string(), "b".to_string()];
        assert!(prompt.select_one(&items, "pick").is_err());
    }
}
