//! Typed per-feature configuration loaded from a YAML source.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::MuoError;

/// Key within the operator ConfigMap holding the YAML document.
pub const CONFIG_KEY: &str = "config.yaml";

/// Supplies the raw configuration document.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<String, MuoError>;
}

/// A configuration shape that can check its own values after decoding.
pub trait ConfigValidator {
    fn validate(&self) -> Result<(), MuoError>;
}

/// Reads `config.yaml` from a ConfigMap in the operator namespace.
pub struct ConfigMapSource {
    api: Api<ConfigMap>,
    name: String,
}

impl ConfigMapSource {
    pub fn new(client: kube::Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ConfigSource for ConfigMapSource {
    async fn fetch(&self) -> Result<String, MuoError> {
        let cm = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| MuoError::kube(&format!("configmap/{}", self.name), e))?;

        cm.data
            .and_then(|mut data| data.remove(CONFIG_KEY))
            .ok_or_else(|| MuoError::Config(format!("configmap/{} has no {CONFIG_KEY} key", self.name)))
    }
}

/// Resolves typed configuration from a [`ConfigSource`].
#[derive(Clone)]
pub struct ConfigManager {
    source: Arc<dyn ConfigSource>,
}

impl ConfigManager {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    /// Fetch, decode and validate a configuration shape.
    pub async fn populate<T>(&self) -> Result<T, MuoError>
    where
        T: DeserializeOwned + ConfigValidator,
    {
        let raw = self.source.fetch().await?;
        let config = parse::<T>(&raw)?;
        debug!(shape = std::any::type_name::<T>(), "Configuration populated");
        Ok(config)
    }
}

fn parse<T>(raw: &str) -> Result<T, MuoError>
where
    T: DeserializeOwned + ConfigValidator,
{
    let config: T =
        serde_yaml::from_str(raw).map_err(|e| MuoError::Config(format!("invalid YAML: {e}")))?;
    config.validate()?;
    Ok(config)
}
