//! AWS KMS-backed crypto provider.
//!
//! Unlike GPG/password, there is no locally-held data key: every value is
//! encrypted and decrypted directly through a call to KMS.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kms::error::ProvideErrorMetadata;
use aws_smithy_types::Blob;
use serde_yaml::Mapping;

use crate::error::{ConfigError, Result};
use crate::input::Prompt;
use crate::providers::traits::{ArgValue, Argument, CryptoProvider, ProviderArgs};

/// A key ARN set to this sentinel means no real key has been chosen yet.
const INITIALIZATION_TEMPORARY_KEY: &str = "initialization-temporary-key";
const KEY_LIST_TIMEOUT: Duration = Duration::from_secs(15);

pub fn flags() -> Vec<Argument> {
    vec![Argument {
        name: "key",
        description: "The ARN of the KMS key to use for encryption and decryption",
        default: None,
        env_var_name: None,
        repeatable: false,
        is_switch: false,
    }]
}

/// A fully-qualified KMS key ARN carries its region as the 4th colon-split
/// field; reject anything that doesn't look like one up front.
fn valid_key(key: &str) -> Result<()> {
    if !key.contains("arn:aws:kms:") {
        return Err(ConfigError::input_error(format!(
            "unable to infer region from non fully-qualified KMS key ARN <{key}>"
        )));
    }
    Ok(())
}

pub fn construct(args: &ProviderArgs) -> Result<Box<dyn CryptoProvider>> {
    let key = args
        .get("key")
        .and_then(ArgValue::as_str)
        .map(str::to_string);

    let (key, region) = match key {
        Some(key) if !key.is_empty() => {
            valid_key(&key)?;
            let region = key.split(':').nth(3).map(str::to_string);
            (key, region)
        }
        _ => (INITIALIZATION_TEMPORARY_KEY.to_string(), None),
    };

    Ok(Box::new(KmsProvider { key, region }))
}

pub struct KmsProvider {
    key: String,
    region: Option<String>,
}

impl KmsProvider {
    async fn client(&self) -> aws_sdk_kms::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        aws_sdk_kms::Client::new(&loader.load().await)
    }

    async fn caller_identity(&self) -> String {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let sts = aws_sdk_sts::Client::new(&config);
        match sts.get_caller_identity().send().await {
            Ok(output) => output.arn().unwrap_or("<unknown caller>").to_string(),
            Err(_) => "<unknown caller>".to_string(),
        }
    }

    async fn catch_bad_credentials<E: ProvideErrorMetadata>(&self, err: &E) -> Option<ConfigError> {
        match err.code() {
            Some("AccessDeniedException") => {
                let caller = self.caller_identity().await;
                Some(ConfigError::provider_error(format!(
                    "access denied using key {} in region {:?} as {}: {}",
                    self.key,
                    self.region,
                    caller,
                    err.message().unwrap_or("no message"),
                )))
            }
            Some("NoCredentialProviders") => {
                Some(ConfigError::provider_error("no AWS credentials found"))
            }
            Some("RequestCanceled") => {
                tracing::warn!(region = ?self.region, "kms request canceled");
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl CryptoProvider for KmsProvider {
    fn name(&self) -> &'static str {
        "kms"
    }

    fn enabled(&self) -> bool {
        !self.key.is_empty() && self.key != INITIALIZATION_TEMPORARY_KEY
    }

    async fn replace(&mut self, args: &ProviderArgs, prompt: &dyn Prompt) -> Result<()> {
        if let Some(key) = args.get("key").and_then(ArgValue::as_str) {
            if !key.is_empty() {
                valid_key(key)?;
                self.key = key.to_string();
                self.region = key.split(':').nth(3).map(str::to_string);
                return Ok(());
            }
        }

        let keys = list_all_keys().await?;
        if keys.is_empty() {
            return Err(ConfigError::provider_error(
                "no KMS keys found in any region",
            ));
        }
        let chosen = prompt.select_one(&keys, "select a KMS key")?;
        self.key = chosen.clone();
        self.region = chosen.split(':').nth(3).map(str::to_string);
        Ok(())
    }

    fn serialize(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert("provider".into(), "kms".into());
        map.insert("key".into(), self.key.clone().into());
        map
    }

    async fn encrypt(&mut self, plaintext: &[u8], _prompt: &dyn Prompt) -> Result<Vec<u8>> {
        let client = self.client().await;
        let result = client
            .encrypt()
            .key_id(&self.key)
            .plaintext(Blob::new(plaintext))
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .ciphertext_blob()
                .ok_or_else(|| ConfigError::provider_error("kms returned no ciphertext"))?
                .clone()
                .into_inner()),
            Err(err) => {
                if let Some(mapped) = self.catch_bad_credentials(&err).await {
                    return Err(mapped);
                }
                Err(ConfigError::provider_error(format!(
                    "kms encrypt failed: {err}"
                )))
            }
        }
    }

    async fn decrypt(&mut self, ciphertext: &[u8], _prompt: &dyn Prompt) -> Result<String> {
        let client = self.client().await;
        let result = client
            .decrypt()
            .key_id(&self.key)
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await;

        match result {
            Ok(output) => {
                let plaintext = output
                    .plaintext()
                    .ok_or_else(|| ConfigError::provider_error("kms returned no plaintext"))?
                    .clone()
                    .into_inner();
                String::from_utf8(plaintext)
                    .map_err(|_| ConfigError::provider_error("kms plaintext was not valid utf-8"))
            }
            Err(err) => {
                if let Some(mapped) = self.catch_bad_credentials(&err).await {
                    return Err(mapped);
                }
                Err(ConfigError::provider_error(format!(
                    "kms decrypt failed: {err}"
                )))
            }
        }
    }
}

/// Fans out one task per AWS region, listing every `alias/aws*` KMS key
/// alias. `ap-east-1` is skipped unless explicitly opted into, since it
/// requires a separate account opt-in and routinely errors out otherwise.
async fn list_all_keys() -> Result<Vec<String>> {
    let ap_east_1_enabled = std::env::var("AWS_AP_EAST_1_ENABLED").is_ok();
    let regions: Vec<String> = known_regions()
        .into_iter()
        .filter(|r| ap_east_1_enabled || r != "ap-east-1")
        .collect();

    let found = Mutex::new(Vec::new());
    let mut tasks = Vec::new();
    for region in regions {
        tasks.push(tokio::spawn(async move {
            tokio::time::timeout(KEY_LIST_TIMEOUT, fetch_region_keys(region)).await
        }));
    }

    for task in tasks {
        if let Ok(Ok(Ok(keys))) = task.await {
            found.lock().unwrap().extend(keys);
        }
    }

    Ok(found.into_inner().unwrap())
}

async fn fetch_region_keys(region: String) -> Result<Vec<String>> {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region))
        .load()
        .await;
    let client = aws_sdk_kms::Client::new(&config);

    let mut keys = Vec::new();
    let mut marker = None;
    loop {
        let mut request = client.list_aliases();
        if let Some(marker) = &marker {
            request = request.marker(marker);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ConfigError::provider_error(format!("could not list kms aliases: {e}")))?;

        for alias in response.aliases() {
            if let Some(name) = alias.alias_name() {
                if name.starts_with("alias/aws") {
                    if let Some(arn) = alias.alias_arn() {
                        keys.push(arn.to_string());
                    }
                }
            }
        }

        if response.truncated() {
            marker = response.next_marker().map(str::to_string);
        } else {
            break;
        }
    }

    Ok(keys)
}

fn known_regions() -> Vec<String> {
    [
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "af-south-1",
        "ap-east-1",
        "ap-south-1",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-northeast-3",
        "ap-southeast-1",
        "ap-southeast-2",
        "ca-central-1",
        "eu-central-1",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-north-1",
        "eu-south-1",
        "me-south-1",
        "sa-east-1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_region_from_arn() {
        let mut args = ProviderArgs::new();
        args.insert(
            "key".into(),
            ArgValue::Str("arn:aws:kms:eu-west-1:111122223333:key/abcd".into()),
        );
        let provider = construct(&args).unwrap();
        let kms = provider.serialize();
        assert_eq!(
            kms.get("key").unwrap().as_str(),
            Some("arn:aws:kms:eu-west-1:111122223333:key/abcd")
        );
        assert!(provider.enabled());
    }

    #[test]
    fn sentinel_key_is_not_enabled() {
        let provider = construct(&ProviderArgs::new()).unwrap();
        assert!(!provider.enabled());
    }

    #[test]
    fn empty_key_arg_falls_back_to_sentinel() {
        let mut args = ProviderArgs::new();
        args.insert("key".into(), ArgValue::Str(String::new()));
        let provider = construct(&args).unwrap();
        assert!(!provider.enabled());
    }

    #[test]
    fn garbage_key_is_rejected() {
        let mut args = ProviderArgs::new();
        args.insert("key".into(), ArgValue::Str("not-an-arn".into()));
        match construct(&args) {
            Err(err) => assert!(matches!(err, ConfigError::InputError(_))),
            Ok(_) => panic!("expected a garbage ARN to be rejected"),
        }
    }

    #[tokio::test]
    async fn replace_rejects_a_garbage_key() {
        let mut provider = construct(&ProviderArgs::new()).unwrap();
        let mut args = ProviderArgs::new();
        args.insert("key".into(), ArgValue::Str("not-an-arn".into()));
        let prompt = crate::input::ScriptedPrompt::default();
        let err = provider.replace(&args, &prompt).await.unwrap_err();
        assert!(matches!(err, ConfigError::InputError(_)));
    }
}
